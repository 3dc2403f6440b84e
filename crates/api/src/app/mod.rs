//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: composition root (stores, buses, workers, trigger service)
//! - `routes/`: HTTP routes + handlers, one file per resource
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, build_services, build_services_with};

/// Build the full HTTP router around already-wired services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Tenant routes: require X-Tenant-Id.
    let tenant_scoped = routes::router().layer(axum::middleware::from_fn(middleware::tenant_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .merge(tenant_scoped)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
