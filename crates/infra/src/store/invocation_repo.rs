use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use ets_core::{InvocationId, TenantId};
use ets_invocations::Invocation;

use super::StoreError;

/// In-flight invocations awaiting a callback.
///
/// Only request/response invocations are saved here; a record disappears
/// when the invocation completes or the deadline sweeper expires it.
pub trait InvocationRepo: Send + Sync {
    fn save(&self, invocation: Invocation) -> Result<(), StoreError>;

    fn find_by_id(&self, id: InvocationId) -> Result<Option<Invocation>, StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: InvocationId) -> Result<bool, StoreError>;

    /// Up to `limit` invocations with `deadline < instant`, earliest first.
    fn find_by_deadline_before(
        &self,
        instant: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Invocation>, StoreError>;

    fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Invocation>, StoreError>;
}

impl<S> InvocationRepo for Arc<S>
where
    S: InvocationRepo + ?Sized,
{
    fn save(&self, invocation: Invocation) -> Result<(), StoreError> {
        (**self).save(invocation)
    }

    fn find_by_id(&self, id: InvocationId) -> Result<Option<Invocation>, StoreError> {
        (**self).find_by_id(id)
    }

    fn delete(&self, id: InvocationId) -> Result<bool, StoreError> {
        (**self).delete(id)
    }

    fn find_by_deadline_before(
        &self,
        instant: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Invocation>, StoreError> {
        (**self).find_by_deadline_before(instant, limit)
    }

    fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Invocation>, StoreError> {
        (**self).find_by_tenant(tenant_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInvocationRepo {
    inner: RwLock<HashMap<InvocationId, Invocation>>,
}

impl InMemoryInvocationRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InvocationRepo for InMemoryInvocationRepo {
    fn save(&self, invocation: Invocation) -> Result<(), StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Poisoned("invocation"))?;
        if map.contains_key(&invocation.id) {
            return Err(StoreError::Duplicate(invocation.id.to_string()));
        }
        map.insert(invocation.id, invocation);
        Ok(())
    }

    fn find_by_id(&self, id: InvocationId) -> Result<Option<Invocation>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Poisoned("invocation"))?;
        Ok(map.get(&id).cloned())
    }

    fn delete(&self, id: InvocationId) -> Result<bool, StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Poisoned("invocation"))?;
        Ok(map.remove(&id).is_some())
    }

    fn find_by_deadline_before(
        &self,
        instant: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Invocation>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Poisoned("invocation"))?;
        let mut overdue: Vec<Invocation> = map
            .values()
            .filter(|inv| inv.is_overdue(instant))
            .cloned()
            .collect();
        overdue.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
        overdue.truncate(limit);
        Ok(overdue)
    }

    fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Invocation>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Poisoned("invocation"))?;
        let mut found: Vec<Invocation> = map
            .values()
            .filter(|inv| &inv.tenant_id == tenant_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(found)
    }
}
