use std::sync::Arc;

use axum::{Json, extract::Extension};

use ets_breaker::BreakerSnapshot;

use crate::app::services::AppServices;

/// Breakers known to this instance. Not tenant-filtered; destination names
/// carry the tenant prefix.
pub async fn list_breakers(Extension(services): Extension<Arc<AppServices>>) -> Json<Vec<BreakerSnapshot>> {
    Json(services.breakers.snapshot())
}
