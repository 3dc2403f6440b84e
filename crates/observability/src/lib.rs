//! Shared logging and metrics setup for the ETS binaries and services.

pub mod metrics;
pub mod tracing;

pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use tracing::{LogFormat, init, init_with};
