//! Trigger definitions and the read-only catalog that resolves them.
//!
//! Triggers are loaded once at startup from JSON descriptors and never
//! change afterwards. Tenant visibility is delegated to a feature-flag
//! collaborator.

pub mod catalog;
pub mod descriptor;
pub mod feature;
pub mod trigger;

pub use catalog::{CatalogError, TriggerCatalog};
pub use descriptor::{TriggerDescriptor, TriggerDescriptors};
pub use feature::{FeatureStore, InMemoryFeatureStore, feature_key};
pub use trigger::{DEFAULT_TIMEOUT, EventSource, Trigger, TriggerType};
