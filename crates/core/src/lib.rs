//! `ets-core`: shared primitives for the Event Trigger Service.
//!
//! Pure value types only: identifiers, invocation secrets and the error
//! taxonomy every other crate maps into. No IO lives here.

pub mod error;
pub mod id;
pub mod secret;

pub use error::{EtsError, EtsResult};
pub use id::{InvocationId, SubscriptionId, TenantId, TriggerId, TriggerName};
pub use secret::{Secret, SecretHasher};
