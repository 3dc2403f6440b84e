use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.metrics.snapshot())
}

/// Offboarding: drop every subscription and pending invocation of the tenant.
pub async fn delete_tenant_data(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.service.delete_tenant(tenant.tenant_id()) {
        Ok(removed) => (StatusCode::OK, Json(json!({ "subscriptionsDeleted": removed }))).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}
