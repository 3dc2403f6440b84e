//! Background jobs.
//!
//! - `DeadlineSweeper`: periodically fails request/response invocations
//!   whose deadline passed and purges status records past their TTL

pub mod sweeper;

pub use sweeper::{DeadlineSweeper, EXPIRED_METRIC, SweeperConfig, SweeperHandle, SweeperStats, TIMED_OUT};
