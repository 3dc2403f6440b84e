//! Subscriptions: a tenant's binding of a destination to a trigger.
//!
//! This crate holds the record itself, typed views over its free-form config
//! map, the JSONPath-style filter evaluated against invocation input, the
//! store query model and the management rules (limits, duplicates, immutable
//! fields). Persistence lives in `ets-infra`.

pub mod config;
pub mod filter;
pub mod query;
pub mod rules;
pub mod subscription;

pub use config::{
    BasicAuthConfig, BearerTokenAuthConfig, EventBridgeConfig, HttpAuth, HttpConfig, InlineConfig,
    ResponseMode, ScriptConfig, ScriptLanguage, WorkflowConfig, normalize, view,
};
pub use filter::{Filter, FilterError};
pub use query::{FieldFilter, SubscriptionField, SubscriptionQuery};
pub use rules::{SubscriptionCounts, SubscriptionLimits};
pub use subscription::{Subscription, SubscriptionType};
