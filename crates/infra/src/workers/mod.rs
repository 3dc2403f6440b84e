//! Background workers consuming the event buses.

pub mod breaker_sync;
pub mod event_worker;
pub mod handlers;

pub use breaker_sync::{BreakerSyncHandler, spawn_breaker_sync};
pub use event_worker::{EventWorker, WorkerHandle, WorkerStats};
pub use handlers::{DomainEvent, DomainEventHandler, InvocationEventHandler};
