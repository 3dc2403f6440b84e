use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ets_core::{SubscriptionId, TenantId, TriggerId};
use ets_subscriptions::{Subscription, SubscriptionQuery, SubscriptionType};

use super::StoreError;

/// Subscription persistence. Every lookup except `find_all_by_type` is
/// tenant scoped.
pub trait SubscriptionStore: Send + Sync {
    fn insert(&self, subscription: Subscription) -> Result<(), StoreError>;

    /// Replace an existing record with the same tenant and id.
    fn update(&self, subscription: Subscription) -> Result<(), StoreError>;

    fn delete(&self, tenant_id: &TenantId, id: SubscriptionId) -> Result<bool, StoreError>;

    fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError>;

    fn find_by_tenant_id_and_trigger_id(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
    ) -> Result<Vec<Subscription>, StoreError>;

    fn find_all_by_type(&self, subscription_type: SubscriptionType) -> Result<Vec<Subscription>, StoreError>;

    fn query(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>, StoreError>;

    fn count_by_tenant_and_trigger(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
    ) -> Result<usize, StoreError>;

    fn count_by_tenant_and_type(
        &self,
        tenant_id: &TenantId,
        subscription_type: SubscriptionType,
    ) -> Result<usize, StoreError>;
}

impl<S> SubscriptionStore for Arc<S>
where
    S: SubscriptionStore + ?Sized,
{
    fn insert(&self, subscription: Subscription) -> Result<(), StoreError> {
        (**self).insert(subscription)
    }

    fn update(&self, subscription: Subscription) -> Result<(), StoreError> {
        (**self).update(subscription)
    }

    fn delete(&self, tenant_id: &TenantId, id: SubscriptionId) -> Result<bool, StoreError> {
        (**self).delete(tenant_id, id)
    }

    fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        (**self).find_by_id(tenant_id, id)
    }

    fn find_by_tenant_id_and_trigger_id(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
    ) -> Result<Vec<Subscription>, StoreError> {
        (**self).find_by_tenant_id_and_trigger_id(tenant_id, trigger_id)
    }

    fn find_all_by_type(&self, subscription_type: SubscriptionType) -> Result<Vec<Subscription>, StoreError> {
        (**self).find_all_by_type(subscription_type)
    }

    fn query(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>, StoreError> {
        (**self).query(query)
    }

    fn count_by_tenant_and_trigger(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
    ) -> Result<usize, StoreError> {
        (**self).count_by_tenant_and_trigger(tenant_id, trigger_id)
    }

    fn count_by_tenant_and_type(
        &self,
        tenant_id: &TenantId,
        subscription_type: SubscriptionType,
    ) -> Result<usize, StoreError> {
        (**self).count_by_tenant_and_type(tenant_id, subscription_type)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    inner: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, pred: F) -> Result<Vec<Subscription>, StoreError>
    where
        F: Fn(&Subscription) -> bool,
    {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Poisoned("subscription"))?;
        let mut found: Vec<Subscription> = map.values().filter(|s| pred(s)).cloned().collect();
        found.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn count<F>(&self, pred: F) -> Result<usize, StoreError>
    where
        F: Fn(&Subscription) -> bool,
    {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Poisoned("subscription"))?;
        Ok(map.values().filter(|s| pred(s)).count())
    }
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn insert(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Poisoned("subscription"))?;
        if map.contains_key(&subscription.id) {
            return Err(StoreError::Duplicate(subscription.id.to_string()));
        }
        map.insert(subscription.id, subscription);
        Ok(())
    }

    fn update(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Poisoned("subscription"))?;
        match map.get(&subscription.id) {
            Some(existing) if existing.tenant_id == subscription.tenant_id => {
                map.insert(subscription.id, subscription);
                Ok(())
            }
            _ => Err(StoreError::NotFound(subscription.id.to_string())),
        }
    }

    fn delete(&self, tenant_id: &TenantId, id: SubscriptionId) -> Result<bool, StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Poisoned("subscription"))?;
        let owned = map.get(&id).is_some_and(|s| &s.tenant_id == tenant_id);
        Ok(owned && map.remove(&id).is_some())
    }

    fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Poisoned("subscription"))?;
        Ok(map.get(&id).filter(|s| &s.tenant_id == tenant_id).cloned())
    }

    fn find_by_tenant_id_and_trigger_id(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
    ) -> Result<Vec<Subscription>, StoreError> {
        self.collect(|s| &s.tenant_id == tenant_id && &s.trigger_id == trigger_id)
    }

    fn find_all_by_type(&self, subscription_type: SubscriptionType) -> Result<Vec<Subscription>, StoreError> {
        self.collect(|s| s.subscription_type == subscription_type)
    }

    fn query(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>, StoreError> {
        let page = self.collect(|s| query.matches(s))?.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    fn count_by_tenant_and_trigger(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
    ) -> Result<usize, StoreError> {
        self.count(|s| &s.tenant_id == tenant_id && &s.trigger_id == trigger_id)
    }

    fn count_by_tenant_and_type(
        &self,
        tenant_id: &TenantId,
        subscription_type: SubscriptionType,
    ) -> Result<usize, StoreError> {
        self.count(|s| &s.tenant_id == tenant_id && s.subscription_type == subscription_type)
    }
}
