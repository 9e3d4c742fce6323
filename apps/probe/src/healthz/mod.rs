//! Readiness, liveness and metrics over HTTP.

mod routes;

use actix_web::dev::ServerHandle;
use actix_web::{App, HttpServer, web};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::AppError;
use crate::metrics::PrometheusMetrics;
use crate::monitoring::Scheduler;

pub use routes::routes;

/// What the routes read from
pub struct HealthzState {
    pub scheduler: Arc<Scheduler>,
    pub metrics: Arc<PrometheusMetrics>,
}

/// Running healthz server
pub struct Healthz {
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

impl Healthz {
    /// Bind `listen_addr` and serve in the background
    pub fn start(listen_addr: &str, state: HealthzState) -> Result<Self, AppError> {
        let state = web::Data::new(state);
        let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
            .workers(1)
            .disable_signals()
            .bind(listen_addr)?
            .run();

        info!(listen_addr, "healthz listening");
        Ok(Self { handle: server.handle(), task: tokio::spawn(server) })
    }

    /// Stop accepting connections and wait for the server to finish
    pub async fn stop(self) {
        self.handle.stop(true).await;
        match self.task.await {
            Ok(Ok(())) => info!("healthz listener closed"),
            Ok(Err(e)) => warn!(error = %e, "healthz server failed"),
            Err(e) => warn!(error = %e, "healthz task panicked"),
        }
    }
}
