//! Infrastructure-backed event bus implementations.
//!
//! The bus abstraction lives in `ets-events`; the in-memory bus there covers
//! a single process. Redis pub/sub fans events out across instances so
//! breaker transitions and ETS topics reach every replica.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubEventBus};
