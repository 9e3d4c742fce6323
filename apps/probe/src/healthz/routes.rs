use actix_web::{HttpResponse, Responder, get, web};
use tracing::error;

use super::HealthzState;

macros_utils::routes! {
    route ready_route,
    route alive_route,
    route metrics_route,
}

/// Readiness mirrors the scheduler's self-health
#[get("/ready")]
pub async fn ready_route(state: web::Data<HealthzState>) -> impl Responder {
    if state.scheduler.is_healthy() {
        HttpResponse::Ok().body("OK")
    } else {
        HttpResponse::ServiceUnavailable().body("Not Ready")
    }
}

/// Liveness route
/// The process answering is enough.
#[get("/alive")]
pub async fn alive_route() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

#[get("/metrics")]
pub async fn metrics_route(state: web::Data<HealthzState>) -> impl Responder {
    match state.metrics.encode() {
        Ok(text) => HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(text),
        Err(e) => {
            error!(error = %e, "unable to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
