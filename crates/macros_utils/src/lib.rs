//! Small declarative helpers shared by the Uppe HTTP surfaces.

/// Generates a `routes` function registering the listed actix services.
///
/// ```ignore
/// macros_utils::routes! {
///     route ready_route,
///     route alive_route,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $handler:ident),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::actix_web::web::ServiceConfig) {
            $( cfg.service($handler); )*
        }
    };
}

#[cfg(feature = "actix")]
pub use actix_web;
