use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use ets_core::{InvocationId, SubscriptionId, TenantId, TriggerId};
use ets_invocations::{CompleteInvocationInput, InvocationStatus};

use super::StoreError;

/// Result of [`StatusStore::complete`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    AlreadyCompleted,
    Missing,
}

/// Listing criteria for status records. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusQuery {
    pub trigger_id: Option<TriggerId>,
    pub subscription_id: Option<SubscriptionId>,
    pub completed: Option<bool>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl StatusQuery {
    pub fn with_trigger(mut self, trigger_id: TriggerId) -> Self {
        self.trigger_id = Some(trigger_id);
        self
    }

    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, status: &InvocationStatus) -> bool {
        self.trigger_id.as_ref().is_none_or(|t| &status.trigger_id == t)
            && self.subscription_id.is_none_or(|s| status.subscription_id == s)
            && self.completed.is_none_or(|c| status.is_completed() == c)
    }
}

/// Invocation status records, keyed by (tenant, invocation id).
pub trait StatusStore: Send + Sync {
    /// Returns `false` when a record with the same key already exists.
    fn start(&self, status: InvocationStatus) -> Result<bool, StoreError>;

    fn complete(
        &self,
        tenant_id: &TenantId,
        id: InvocationId,
        at: DateTime<Utc>,
        input: CompleteInvocationInput,
    ) -> Result<CompleteOutcome, StoreError>;

    fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: InvocationId,
    ) -> Result<Option<InvocationStatus>, StoreError>;

    fn find_by_tenant(
        &self,
        tenant_id: &TenantId,
        query: &StatusQuery,
    ) -> Result<Vec<InvocationStatus>, StoreError>;

    /// Drop completed records whose retention elapsed; returns how many.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

impl<S> StatusStore for Arc<S>
where
    S: StatusStore + ?Sized,
{
    fn start(&self, status: InvocationStatus) -> Result<bool, StoreError> {
        (**self).start(status)
    }

    fn complete(
        &self,
        tenant_id: &TenantId,
        id: InvocationId,
        at: DateTime<Utc>,
        input: CompleteInvocationInput,
    ) -> Result<CompleteOutcome, StoreError> {
        (**self).complete(tenant_id, id, at, input)
    }

    fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: InvocationId,
    ) -> Result<Option<InvocationStatus>, StoreError> {
        (**self).find_by_id(tenant_id, id)
    }

    fn find_by_tenant(
        &self,
        tenant_id: &TenantId,
        query: &StatusQuery,
    ) -> Result<Vec<InvocationStatus>, StoreError> {
        (**self).find_by_tenant(tenant_id, query)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).purge_expired(now)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    inner: RwLock<HashMap<(TenantId, InvocationId), InvocationStatus>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for InMemoryStatusStore {
    fn start(&self, status: InvocationStatus) -> Result<bool, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned("status"))?;
        let key = (status.tenant_id.clone(), status.id);
        if map.contains_key(&key) {
            return Ok(false);
        }
        map.insert(key, status);
        Ok(true)
    }

    fn complete(
        &self,
        tenant_id: &TenantId,
        id: InvocationId,
        at: DateTime<Utc>,
        input: CompleteInvocationInput,
    ) -> Result<CompleteOutcome, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned("status"))?;
        match map.get_mut(&(tenant_id.clone(), id)) {
            None => Ok(CompleteOutcome::Missing),
            Some(status) => {
                if status.complete(at, input) {
                    Ok(CompleteOutcome::Completed)
                } else {
                    Ok(CompleteOutcome::AlreadyCompleted)
                }
            }
        }
    }

    fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: InvocationId,
    ) -> Result<Option<InvocationStatus>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned("status"))?;
        Ok(map.get(&(tenant_id.clone(), id)).cloned())
    }

    fn find_by_tenant(
        &self,
        tenant_id: &TenantId,
        query: &StatusQuery,
    ) -> Result<Vec<InvocationStatus>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned("status"))?;
        let mut found: Vec<InvocationStatus> = map
            .iter()
            .filter(|((t, _), s)| t == tenant_id && query.matches(s))
            .map(|(_, s)| s.clone())
            .collect();
        found.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));

        let page = found.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned("status"))?;
        let before = map.len();
        map.retain(|_, s| s.expires_at().is_none_or(|at| at > now));
        Ok(before - map.len())
    }
}
