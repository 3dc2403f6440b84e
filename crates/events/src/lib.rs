//! Event mechanics for ETS: envelopes, the pub/sub bus abstraction and the
//! handler seam used by background workers.
//!
//! Event payloads themselves live with the crates that own them.

pub mod bus;
pub mod envelope;
pub mod handler;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{BusSubscription, EventBus};
pub use envelope::EventEnvelope;
pub use handler::EventHandler;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
