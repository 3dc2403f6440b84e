use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use ets_infra::workers::DomainEvent;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEventRequest {
    pub topic: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// Feed a platform event into the trigger pipeline. Processing is
/// asynchronous; events without a matching trigger are ignored.
pub async fn publish_domain_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<DomainEventRequest>,
) -> axum::response::Response {
    let mut event = DomainEvent::new(tenant.tenant_id().clone(), body.topic, body.event_type, body.payload);
    if let Some(id) = tenant.request_id() {
        event = event.with_request_id(id);
    }
    match services.publish_domain_event(event) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}
