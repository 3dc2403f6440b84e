//! Immutable registry of triggers.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use ets_core::{TenantId, TriggerId};

use crate::descriptor::{TriggerDescriptor, TriggerDescriptors};
use crate::feature::{FeatureStore, feature_key};
use crate::trigger::Trigger;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid trigger descriptor '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("duplicate trigger id '{0}'")]
    DuplicateTrigger(String),

    #[error("event source '{key}' is claimed by both '{first}' and '{second}'")]
    DuplicateEventSource {
        key: String,
        first: String,
        second: String,
    },

    #[error("failed to read trigger repository: {0}")]
    Io(String),

    #[error("failed to parse trigger repository: {0}")]
    Parse(String),
}

/// Read-only after construction; cheap to share behind an `Arc`.
pub struct TriggerCatalog {
    triggers: BTreeMap<TriggerId, Arc<Trigger>>,
    event_sources: HashMap<String, TriggerId>,
    features: Arc<dyn FeatureStore>,
}

impl TriggerCatalog {
    pub fn new(
        triggers: Vec<Trigger>,
        features: Arc<dyn FeatureStore>,
    ) -> Result<Self, CatalogError> {
        let mut by_id = BTreeMap::new();
        let mut event_sources: HashMap<String, TriggerId> = HashMap::new();

        for trigger in triggers {
            for es in trigger.event_sources() {
                let key = es.key();
                if let Some(first) = event_sources.get(&key) {
                    return Err(CatalogError::DuplicateEventSource {
                        key,
                        first: first.to_string(),
                        second: trigger.id().to_string(),
                    });
                }
                event_sources.insert(key, trigger.id().clone());
            }

            let id = trigger.id().clone();
            if by_id.insert(id.clone(), Arc::new(trigger)).is_some() {
                return Err(CatalogError::DuplicateTrigger(id.to_string()));
            }
        }

        Ok(Self {
            triggers: by_id,
            event_sources,
            features,
        })
    }

    pub fn from_descriptors(
        descriptors: Vec<TriggerDescriptor>,
        features: Arc<dyn FeatureStore>,
    ) -> Result<Self, CatalogError> {
        let triggers = descriptors
            .into_iter()
            .map(Trigger::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(triggers, features)
    }

    /// Parse a repository document (`{"triggers": [...]}`).
    pub fn from_json_str(json: &str, features: Arc<dyn FeatureStore>) -> Result<Self, CatalogError> {
        let doc: TriggerDescriptors =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::from_descriptors(doc.triggers, features)
    }

    /// Load from a repository file, or from a directory of one-descriptor
    /// `*.json` files. Unreadable files in a directory are logged and skipped;
    /// an invalid descriptor aborts the load.
    pub fn from_path(path: impl AsRef<Path>, features: Arc<dyn FeatureStore>) -> Result<Self, CatalogError> {
        let path = path.as_ref();

        if path.is_file() {
            let raw = fs::read_to_string(path).map_err(|e| CatalogError::Io(e.to_string()))?;
            return Self::from_json_str(&raw, features);
        }

        let mut entries: Vec<_> = fs::read_dir(path)
            .map_err(|e| CatalogError::Io(format!("{}: {e}", path.display())))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();

        let mut descriptors = Vec::new();
        for file in entries {
            let parsed = fs::read_to_string(&file)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<TriggerDescriptor>(&raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(d) => {
                    info!(file = %file.display(), "read trigger descriptor");
                    descriptors.push(d);
                }
                Err(e) => error!(file = %file.display(), error = %e, "could not read trigger file"),
            }
        }

        Self::from_descriptors(descriptors, features)
    }

    pub fn find_by_id(&self, id: &TriggerId) -> Option<Arc<Trigger>> {
        self.triggers.get(id).cloned()
    }

    pub fn find_by_event_source(&self, topic: &str, event_type: &str) -> Option<TriggerId> {
        self.event_sources
            .get(&crate::trigger::EventSource::key_for(topic, event_type))
            .cloned()
    }

    pub fn is_enabled_for_tenant(&self, id: &TriggerId, tenant: &TenantId) -> bool {
        self.features.is_enabled(&feature_key(id), tenant)
    }

    pub fn find_all(&self) -> impl Iterator<Item = &Arc<Trigger>> {
        self.triggers.values()
    }

    /// Triggers visible to `tenant`.
    pub fn find_all_enabled(&self, tenant: &TenantId) -> Vec<Arc<Trigger>> {
        self.triggers
            .values()
            .filter(|t| self.is_enabled_for_tenant(t.id(), tenant))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

impl core::fmt::Debug for TriggerCatalog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TriggerCatalog")
            .field("triggers", &self.triggers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fixtures::*;
    use crate::feature::InMemoryFeatureStore;

    fn catalog(features: Arc<InMemoryFeatureStore>) -> TriggerCatalog {
        TriggerCatalog::from_descriptors(
            vec![
                request_response("idn:access-request-pre-approval"),
                fire_and_forget("idn:identity-created", "identity", "IDENTITY_CREATED"),
            ],
            features,
        )
        .unwrap()
    }

    fn tenant() -> TenantId {
        TenantId::new("dev:acme").unwrap()
    }

    #[test]
    fn resolves_by_id_and_event_source() {
        let c = catalog(Arc::new(InMemoryFeatureStore::all_enabled()));
        let id = TriggerId::new("idn:identity-created").unwrap();

        assert!(c.find_by_id(&id).is_some());
        assert!(c.find_by_id(&TriggerId::new("nope").unwrap()).is_none());
        assert_eq!(c.find_by_event_source("IDENTITY", "identity_created"), Some(id));
        assert_eq!(c.find_by_event_source("identity", "deleted"), None);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn visibility_follows_feature_flags() {
        let features = Arc::new(InMemoryFeatureStore::all_enabled());
        let c = catalog(features.clone());
        let id = TriggerId::new("idn:access-request-pre-approval").unwrap();

        assert!(c.is_enabled_for_tenant(&id, &tenant()));
        features.set_for_tenant(feature_key(&id), tenant(), false);
        assert!(!c.is_enabled_for_tenant(&id, &tenant()));
        assert_eq!(c.find_all_enabled(&tenant()).len(), 1);
    }

    #[test]
    fn duplicate_ids_and_event_sources_are_rejected() {
        let features: Arc<dyn FeatureStore> = Arc::new(InMemoryFeatureStore::all_enabled());
        let err = TriggerCatalog::from_descriptors(
            vec![request_response("dup"), request_response("dup")],
            features.clone(),
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateTrigger("dup".into()));

        let err = TriggerCatalog::from_descriptors(
            vec![
                fire_and_forget("a", "identity", "CREATED"),
                fire_and_forget("b", "IDENTITY", "created"),
            ],
            features,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateEventSource { .. }));
    }

    #[test]
    fn loads_repository_document() {
        let doc = TriggerDescriptors {
            triggers: vec![request_response("idn:access-request-pre-approval")],
        };
        let json = serde_json::to_string(&doc).unwrap();
        let c = TriggerCatalog::from_json_str(&json, Arc::new(InMemoryFeatureStore::all_enabled()))
            .unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn loads_directory_and_skips_unreadable_files() {
        let dir = std::env::temp_dir().join(format!("ets-triggers-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("identity_created.json"),
            serde_json::to_string(&fire_and_forget("idn:identity-created", "identity", "CREATED")).unwrap(),
        )
        .unwrap();
        fs::write(dir.join("broken.json"), "{ not json").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let c = TriggerCatalog::from_path(&dir, Arc::new(InMemoryFeatureStore::all_enabled())).unwrap();
        assert_eq!(c.len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }
}
