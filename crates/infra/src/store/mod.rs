//! Persistence seams for subscriptions, in-flight invocations and
//! invocation status records.
//!
//! Each store is a `Send + Sync` trait with an in-memory implementation for
//! tests and single-instance deployments. Durable backends plug in behind
//! the same traits.

pub mod invocation_repo;
pub mod status_store;
pub mod subscription_store;

use ets_core::EtsError;

pub use invocation_repo::{InMemoryInvocationRepo, InvocationRepo};
pub use status_store::{CompleteOutcome, InMemoryStatusStore, StatusQuery, StatusStore};
pub use subscription_store::{InMemorySubscriptionStore, SubscriptionStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} store lock poisoned")]
    Poisoned(&'static str),
    #[error("record already exists: {0}")]
    Duplicate(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for EtsError {
    fn from(err: StoreError) -> Self {
        EtsError::store(err.to_string())
    }
}
