use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlidingWindowType {
    /// Window holds the last `sliding_window_size` calls.
    #[default]
    CountBased,
    /// Window holds the calls of the last `sliding_window_size` seconds.
    TimeBased,
}

impl core::str::FromStr for SlidingWindowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COUNT_BASED" => Ok(Self::CountBased),
            "TIME_BASED" => Ok(Self::TimeBased),
            other => Err(format!("unknown sliding window type '{other}'")),
        }
    }
}

/// Settings shared by every breaker of a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Percentage (0-100) of failed calls that opens the breaker.
    pub failure_rate_threshold: f32,
    pub sliding_window_type: SlidingWindowType,
    pub sliding_window_size: u32,
    /// Calls required in the window before the failure rate is evaluated.
    pub minimum_number_of_calls: u32,
    pub permitted_calls_in_half_open: u32,
    pub wait_duration_in_open_state: Duration,
    pub automatic_transition_from_open_to_half_open: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_type: SlidingWindowType::CountBased,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            permitted_calls_in_half_open: 10,
            wait_duration_in_open_state: Duration::from_secs(60),
            automatic_transition_from_open_to_half_open: false,
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_rate_threshold(mut self, percent: f32) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    pub fn with_sliding_window(mut self, kind: SlidingWindowType, size: u32) -> Self {
        self.sliding_window_type = kind;
        self.sliding_window_size = size;
        self
    }

    pub fn with_minimum_number_of_calls(mut self, calls: u32) -> Self {
        self.minimum_number_of_calls = calls;
        self
    }

    /// At least one call is always let through in HALF_OPEN.
    pub fn with_permitted_calls_in_half_open(mut self, calls: u32) -> Self {
        self.permitted_calls_in_half_open = calls.max(1);
        self
    }

    pub fn with_wait_duration(mut self, wait: Duration) -> Self {
        self.wait_duration_in_open_state = wait;
        self
    }

    pub fn with_automatic_transition(mut self, enabled: bool) -> Self {
        self.automatic_transition_from_open_to_half_open = enabled;
        self
    }
}
