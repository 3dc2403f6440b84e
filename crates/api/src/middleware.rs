use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use ets_core::TenantId;
use ets_infra::service::REQUEST_ID_HEADER;

use crate::app::errors;
use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Resolve the tenant from `X-Tenant-Id` and stash it as a request extension.
pub async fn tenant_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let tenant_id = extract_tenant(req.headers()).map_err(|msg| {
        errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg)
    })?;
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    req.extensions_mut()
        .insert(TenantContext::new(tenant_id, request_id));

    Ok(next.run(req).await)
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, String> {
    let header = headers
        .get(TENANT_HEADER)
        .ok_or_else(|| format!("missing {TENANT_HEADER} header"))?;
    let value = header
        .to_str()
        .map_err(|_| format!("{TENANT_HEADER} is not valid ascii"))?
        .trim();
    TenantId::new(value).map_err(|e| e.to_string())
}

/// Headers forwarded to destinations with an invocation.
pub fn forwarded_headers(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name.eq_ignore_ascii_case(REQUEST_ID_HEADER) || name.starts_with("x-ets-")
        })
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect()
}
