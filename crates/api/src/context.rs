use ets_core::TenantId;

/// Tenant context for a request.
///
/// This is immutable and must be present for all tenant routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    request_id: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, request_id: Option<String>) -> Self {
        Self { tenant_id, request_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}
