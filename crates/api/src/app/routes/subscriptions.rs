use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use ets_core::SubscriptionId;
use ets_infra::service::SubscriptionDraft;
use ets_subscriptions::SubscriptionQuery;

use crate::app::dto::{ListSubscriptionsParams, SubscriptionDto, ValidateFilterRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

const DEFAULT_PAGE_SIZE: usize = 250;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_subscription).get(list_subscriptions))
        .route("/validate-filter", post(validate_filter))
        .route(
            "/:id",
            get(get_subscription)
                .put(update_subscription)
                .delete(delete_subscription),
        )
}

fn parse_id(id: &str) -> Result<SubscriptionId, axum::response::Response> {
    id.parse().map_err(errors::ets_error_to_response)
}

pub async fn create_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<SubscriptionDraft>,
) -> axum::response::Response {
    match services.service.subscribe(tenant.tenant_id(), body) {
        Ok(s) => (StatusCode::CREATED, Json(SubscriptionDto::from(s))).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn list_subscriptions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(params): Query<ListSubscriptionsParams>,
) -> axum::response::Response {
    let mut query = SubscriptionQuery::for_tenant(tenant.tenant_id().clone()).with_page(
        params.offset.unwrap_or(0),
        params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    if let Some(expr) = params.filters.as_deref().filter(|f| !f.trim().is_empty()) {
        query = match query.with_filter_expr(expr) {
            Ok(q) => q,
            Err(e) => return errors::ets_error_to_response(e),
        };
    }
    match services.service.list_subscriptions(&query) {
        Ok(list) => Json(list.into_iter().map(SubscriptionDto::from).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn get_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.service.get_subscription(tenant.tenant_id(), id) {
        Ok(s) => Json(SubscriptionDto::from(s)).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn update_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<SubscriptionDraft>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.service.update_subscription(tenant.tenant_id(), id, body) {
        Ok(s) => Json(SubscriptionDto::from(s)).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn delete_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.service.unsubscribe(tenant.tenant_id(), id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}

pub async fn validate_filter(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ValidateFilterRequest>,
) -> axum::response::Response {
    match services.service.validate_filter(&body.filter, &body.input) {
        Ok(matched) => Json(json!({ "isValid": matched })).into_response(),
        Err(e) => errors::ets_error_to_response(e),
    }
}
