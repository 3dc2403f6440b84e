//! Feature-flag seam deciding which triggers a tenant can see.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ets_core::{TenantId, TriggerId};

/// Feature-flag lookup.
pub trait FeatureStore: Send + Sync {
    fn is_enabled(&self, key: &str, tenant: &TenantId) -> bool;
}

impl<F> FeatureStore for Arc<F>
where
    F: FeatureStore + ?Sized,
{
    fn is_enabled(&self, key: &str, tenant: &TenantId) -> bool {
        (**self).is_enabled(key, tenant)
    }
}

/// Deterministic flag key for a trigger: `ETS_` + the id upper-cased with
/// every non-alphanumeric character replaced by `_`.
pub fn feature_key(trigger_id: &TriggerId) -> String {
    let sanitized: String = trigger_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("ETS_{sanitized}")
}

/// In-memory flags: tenant override, then global override, then default.
#[derive(Debug)]
pub struct InMemoryFeatureStore {
    default_enabled: bool,
    global: RwLock<HashMap<String, bool>>,
    per_tenant: RwLock<HashMap<(String, TenantId), bool>>,
}

impl InMemoryFeatureStore {
    pub fn new(default_enabled: bool) -> Self {
        Self {
            default_enabled,
            global: RwLock::new(HashMap::new()),
            per_tenant: RwLock::new(HashMap::new()),
        }
    }

    /// Every flag on unless overridden.
    pub fn all_enabled() -> Self {
        Self::new(true)
    }

    pub fn set(&self, key: impl Into<String>, enabled: bool) {
        if let Ok(mut map) = self.global.write() {
            map.insert(key.into(), enabled);
        }
    }

    pub fn set_for_tenant(&self, key: impl Into<String>, tenant: TenantId, enabled: bool) {
        if let Ok(mut map) = self.per_tenant.write() {
            map.insert((key.into(), tenant), enabled);
        }
    }
}

impl Default for InMemoryFeatureStore {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn is_enabled(&self, key: &str, tenant: &TenantId) -> bool {
        let tenant_flag = self
            .per_tenant
            .read()
            .ok()
            .and_then(|m| m.get(&(key.to_string(), tenant.clone())).copied());
        if let Some(enabled) = tenant_flag {
            return enabled;
        }

        self.global
            .read()
            .ok()
            .and_then(|m| m.get(key).copied())
            .unwrap_or(self.default_enabled)
    }
}
