use std::sync::Arc;

use axum::{Json, extract::Extension};

use crate::app::dto::TriggerDto;
use crate::app::services::AppServices;
use crate::context::TenantContext;

/// Triggers visible to the tenant.
pub async fn list_triggers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> Json<Vec<TriggerDto>> {
    let triggers = services
        .service
        .list_triggers(tenant.tenant_id())
        .iter()
        .map(|t| TriggerDto::from(t.as_ref()))
        .collect();
    Json(triggers)
}
