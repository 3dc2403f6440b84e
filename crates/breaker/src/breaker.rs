//! Single-destination breaker state machine.
//!
//! Time is passed in explicitly so transitions are deterministic under test;
//! the registry supplies `Instant::now()`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{BreakerConfig, SlidingWindowType};
use crate::state::BreakerState;

/// `(from, to)` of a state change.
pub type Transition = (BreakerState, BreakerState);

#[derive(Debug)]
enum Window {
    Count { size: usize, calls: VecDeque<bool> },
    Time { span: Duration, calls: VecDeque<(Instant, bool)> },
}

impl Window {
    fn new(kind: SlidingWindowType, size: u32) -> Self {
        match kind {
            SlidingWindowType::CountBased => Self::Count {
                size: size.max(1) as usize,
                calls: VecDeque::new(),
            },
            SlidingWindowType::TimeBased => Self::Time {
                span: Duration::from_secs(u64::from(size.max(1))),
                calls: VecDeque::new(),
            },
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        match self {
            Self::Count { size, calls } => {
                if calls.len() == *size {
                    calls.pop_front();
                }
                calls.push_back(failed);
            }
            Self::Time { calls, .. } => calls.push_back((now, failed)),
        }
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        if let Self::Time { span, calls } = self {
            while calls
                .front()
                .is_some_and(|(at, _)| now.saturating_duration_since(*at) > *span)
            {
                calls.pop_front();
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Count { calls, .. } => calls.len(),
            Self::Time { calls, .. } => calls.len(),
        }
    }

    fn failures(&self) -> usize {
        match self {
            Self::Count { calls, .. } => calls.iter().filter(|f| **f).count(),
            Self::Time { calls, .. } => calls.iter().filter(|(_, f)| *f).count(),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Count { calls, .. } => calls.clear(),
            Self::Time { calls, .. } => calls.clear(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    /// Percentage of failed calls, `-1.0` until the minimum is reached.
    pub failure_rate: f32,
    pub buffered_calls: usize,
    pub failed_calls: usize,
    pub not_permitted_calls: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: BreakerState,
    window: Window,
    opened_at: Option<Instant>,
    half_open_permits: u32,
    half_open_calls: u32,
    half_open_failures: u32,
    not_permitted: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let window = Window::new(config.sliding_window_type, config.sliding_window_size);
        Self {
            name: name.into(),
            config,
            state: BreakerState::Closed,
            window,
            opened_at: None,
            half_open_permits: 0,
            half_open_calls: 0,
            half_open_failures: 0,
            not_permitted: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Ask to make a call. OPEN moves to HALF_OPEN here once the wait is over.
    pub fn try_acquire(&mut self, now: Instant) -> (bool, Option<Transition>) {
        let mut transition = None;
        if self.state == BreakerState::Open && self.wait_elapsed(now) {
            transition = self.transition_to(BreakerState::HalfOpen, now);
        }

        let permitted = match self.state {
            BreakerState::Closed | BreakerState::Disabled => true,
            BreakerState::Open | BreakerState::ForcedOpen => false,
            BreakerState::HalfOpen => {
                if self.half_open_permits > 0 {
                    self.half_open_permits -= 1;
                    true
                } else {
                    false
                }
            }
        };
        if !permitted {
            self.not_permitted += 1;
        }
        (permitted, transition)
    }

    pub fn on_success(&mut self, now: Instant) -> Option<Transition> {
        self.record(now, false)
    }

    pub fn on_error(&mut self, now: Instant) -> Option<Transition> {
        self.record(now, true)
    }

    fn record(&mut self, now: Instant, failed: bool) -> Option<Transition> {
        match self.state {
            BreakerState::Closed => {
                self.window.record(now, failed);
                if self.window.len() >= self.minimum_calls()
                    && self.rate(self.window.failures(), self.window.len()) >= self.config.failure_rate_threshold
                {
                    return self.transition_to(BreakerState::Open, now);
                }
                None
            }
            BreakerState::HalfOpen => {
                self.half_open_calls += 1;
                if failed {
                    self.half_open_failures += 1;
                }
                if self.half_open_calls < self.half_open_trials() {
                    return None;
                }
                let rate = self.rate(self.half_open_failures as usize, self.half_open_calls as usize);
                let next = if rate >= self.config.failure_rate_threshold {
                    BreakerState::Open
                } else {
                    BreakerState::Closed
                };
                self.transition_to(next, now)
            }
            BreakerState::Open | BreakerState::ForcedOpen | BreakerState::Disabled => None,
        }
    }

    /// Move to `to`, resetting whatever the target state tracks. No-op when
    /// already there.
    pub fn transition_to(&mut self, to: BreakerState, now: Instant) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }

        match to {
            BreakerState::Closed | BreakerState::Disabled => {
                self.window.clear();
                self.opened_at = None;
            }
            BreakerState::Open | BreakerState::ForcedOpen => {
                self.opened_at = Some(now);
            }
            BreakerState::HalfOpen => {
                self.half_open_permits = self.half_open_trials();
                self.half_open_calls = 0;
                self.half_open_failures = 0;
            }
        }
        self.state = to;
        Some((from, to))
    }

    /// Time-driven OPEN -> HALF_OPEN when automatic transition is enabled.
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        self.window.evict(now);
        if self.config.automatic_transition_from_open_to_half_open
            && self.state == BreakerState::Open
            && self.wait_elapsed(now)
        {
            return self.transition_to(BreakerState::HalfOpen, now);
        }
        None
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let buffered = self.window.len();
        let failed = self.window.failures();
        let failure_rate = if buffered >= self.minimum_calls() {
            self.rate(failed, buffered)
        } else {
            -1.0
        };
        BreakerMetrics {
            failure_rate,
            buffered_calls: buffered,
            failed_calls: failed,
            not_permitted_calls: self.not_permitted,
        }
    }

    fn wait_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.wait_duration_in_open_state)
    }

    /// HALF_OPEN needs at least one trial call to ever leave the state.
    fn half_open_trials(&self) -> u32 {
        self.config.permitted_calls_in_half_open.max(1)
    }

    fn minimum_calls(&self) -> usize {
        let minimum = self.config.minimum_number_of_calls.max(1) as usize;
        match &self.window {
            Window::Count { size, .. } => minimum.min(*size),
            Window::Time { .. } => minimum,
        }
    }

    fn rate(&self, failed: usize, total: usize) -> f32 {
        if total == 0 {
            return 0.0;
        }
        failed as f32 * 100.0 / total as f32
    }
}
