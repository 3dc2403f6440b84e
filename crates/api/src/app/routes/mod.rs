use axum::{
    Router,
    routing::{delete, get, post},
};

pub mod breakers;
pub mod events;
pub mod invocations;
pub mod subscriptions;
pub mod system;
pub mod triggers;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/triggers", get(triggers::list_triggers))
        .nest("/trigger-subscriptions", subscriptions::router())
        .nest("/trigger-invocations", invocations::router())
        .route("/active-invocations", get(invocations::list_active))
        .route("/circuit-breakers", get(breakers::list_breakers))
        .route("/domain-events", post(events::publish_domain_event))
        .route("/tenant-data", delete(system::delete_tenant_data))
}
