use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use ets_core::{InvocationId, SubscriptionId, TriggerId};
use ets_infra::service::{CompleteInvocation, InvokeTestTrigger, InvokeTrigger};
use ets_infra::store::StatusQuery;
use ets_invocations::{Invocation, InvocationType};

use crate::app::dto::{
    CompleteInvocationRequest, InvocationDto, ListStatusParams, StartInvocationRequest, TestInvocationRequest,
};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;
use crate::middleware::forwarded_headers;

pub fn router() -> Router {
    Router::new()
        .route("/start", post(start_invocation))
        .route("/test", post(start_test_invocation))
        .route("/:id/complete", post(complete_invocation))
        .route("/status", get(list_statuses))
        .route("/status/:id", get(get_status))
}

fn parse_id(id: &str) -> Result<InvocationId, axum::response::Response> {
    id.parse().map_err(errors::ets_error_to_response)
}

fn invocations_response(result: Result<Vec<Invocation>, ets_core::EtsError>) -> axum::response::Response {
    match result {
        Ok(invocations) => {
            let dtos: Vec<InvocationDto> = invocations.into_iter().map(InvocationDto::from).collect();
            Json(dtos).into_response()
        }
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn start_invocation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    headers: HeaderMap,
    Json(body): Json<StartInvocationRequest>,
) -> axum::response::Response {
    let cmd = InvokeTrigger {
        request_id: tenant.request_id().map(str::to_string),
        input: body.input,
        context: body.content_json,
        headers: forwarded_headers(&headers),
        ..InvokeTrigger::default()
    };
    invocations_response(services.service.invoke_trigger(tenant.tenant_id(), &body.trigger_id, cmd))
}

pub async fn start_test_invocation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<TestInvocationRequest>,
) -> axum::response::Response {
    let cmd = InvokeTestTrigger {
        input: body.input,
        context: body.content_json,
        subscription_ids: body.subscription_ids,
    };
    invocations_response(services.service.invoke_test_trigger(tenant.tenant_id(), &body.trigger_id, cmd))
}

pub async fn complete_invocation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<CompleteInvocationRequest>,
) -> axum::response::Response {
    let invocation_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.is_untracked() {
        tracing::debug!(invocation_id = %invocation_id, "callback without invocationId ignored");
        return StatusCode::NO_CONTENT.into_response();
    }
    let cmd = CompleteInvocation {
        request_id: tenant.request_id().map(str::to_string),
        invocation_id,
        secret: body.secret().to_string(),
        output: body.output,
        error: body.error,
        subscription_id: None,
    };
    match services.service.complete_invocation(tenant.tenant_id(), cmd) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn list_statuses(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(params): Query<ListStatusParams>,
) -> axum::response::Response {
    let query = StatusQuery {
        trigger_id: params.trigger_id,
        subscription_id: params.subscription_id,
        completed: params.completed,
        offset: params.offset.unwrap_or(0),
        limit: params.limit,
    };
    match services.tracker.list(tenant.tenant_id(), &query) {
        Ok(statuses) => Json(statuses).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn get_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.tracker.get(tenant.tenant_id(), id) {
        Ok(status) => Json(status).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

/// A pending request/response invocation; the stored secret is a hash and
/// is never returned.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveInvocationDto {
    pub id: InvocationId,
    pub trigger_id: TriggerId,
    pub subscription_id: SubscriptionId,
    #[serde(rename = "type")]
    pub invocation_type: InvocationType,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

pub async fn list_active(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.service.list_active_invocations(tenant.tenant_id()) {
        Ok(invocations) => {
            let dtos: Vec<ActiveInvocationDto> = invocations
                .into_iter()
                .map(|inv| ActiveInvocationDto {
                    id: inv.id,
                    trigger_id: inv.trigger_id,
                    subscription_id: inv.subscription_id,
                    invocation_type: inv.invocation_type,
                    created: inv.created,
                    deadline: inv.deadline,
                })
                .collect();
            Json(dtos).into_response()
        }
        Err(e) => errors::ets_error_to_response(e),
    }
}
