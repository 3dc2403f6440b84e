use ets_core::TenantId;

use crate::EventEnvelope;

/// Messages that belong to a single tenant.
///
/// Lets workers be pinned to one tenant and drop everything else.
pub trait TenantScoped {
    fn tenant_id(&self) -> &TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> &TenantId {
        EventEnvelope::tenant_id(self)
    }
}
