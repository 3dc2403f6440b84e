//! Per-destination circuit breakers kept consistent across a fleet.
//!
//! Each instance owns a registry of breakers keyed by destination name.
//! Every local state transition is broadcast as a [`BreakerTransition`];
//! peers apply it only when their state differs, and applying a remote
//! transition never broadcasts again.

pub mod breaker;
pub mod config;
pub mod registry;
pub mod state;

pub use breaker::{BreakerMetrics, CircuitBreaker};
pub use config::{BreakerConfig, SlidingWindowType};
pub use registry::{
    BreakerSnapshot, CircuitBreakerRegistry, REJECTED_METRIC, TRANSITION_METRIC, TransitionSink,
};
pub use state::{BreakerState, BreakerTransition};
