//! Concurrent registry of breakers with transition broadcast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ets_core::EtsError;
use ets_events::EventBus;
use ets_observability::MetricsRegistry;
use ets_observability::metrics;

use crate::breaker::{BreakerMetrics, CircuitBreaker, Transition};
use crate::config::BreakerConfig;
use crate::state::{BreakerState, BreakerTransition};

/// Counter of local state transitions.
pub const TRANSITION_METRIC: &str = "ets_circuit_breaker_transition";
/// Counter of calls rejected by an open breaker.
pub const REJECTED_METRIC: &str = "ets_circuit_breaker_rejected";

/// Outbound side of the transition broadcast.
pub trait TransitionSink: Send + Sync {
    fn broadcast(&self, transition: BreakerTransition) -> Result<(), String>;
}

impl<B> TransitionSink for B
where
    B: EventBus<BreakerTransition>,
{
    fn broadcast(&self, transition: BreakerTransition) -> Result<(), String> {
        self.publish(transition).map_err(|e| format!("{e:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub metrics: BreakerMetrics,
}

type Shared = Arc<Mutex<CircuitBreaker>>;

pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Shared>>,
    sink: Arc<dyn TransitionSink>,
    instance_id: String,
    metrics: &'static MetricsRegistry,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig, sink: Arc<dyn TransitionSink>) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            sink,
            instance_id: Uuid::now_v7().to_string(),
            metrics: metrics::global(),
        }
    }

    pub fn with_metrics(mut self, metrics: &'static MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn get_or_create(&self, name: &str) -> Shared {
        if let Ok(map) = self.breakers.read() {
            if let Some(b) = map.get(name) {
                return b.clone();
            }
        }

        let mut map = match self.breakers.write() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(name, self.config.clone()))))
            .clone()
    }

    fn existing(&self) -> Vec<Shared> {
        match self.breakers.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    /// Gate a call to `destination`.
    pub fn try_acquire(&self, destination: &str) -> Result<(), EtsError> {
        let breaker = self.get_or_create(destination);
        let (permitted, transition) = lock(&breaker).try_acquire(Instant::now());
        self.emit(destination, transition);

        if permitted {
            Ok(())
        } else {
            self.metrics.increment(REJECTED_METRIC, &[("destination", destination)]);
            Err(EtsError::circuit_open(destination))
        }
    }

    pub fn on_success(&self, destination: &str, elapsed: Duration) {
        debug!(destination, elapsed_ms = elapsed.as_millis() as u64, "breaker success");
        let breaker = self.get_or_create(destination);
        let transition = lock(&breaker).on_success(Instant::now());
        self.emit(destination, transition);
    }

    pub fn on_error(&self, destination: &str, elapsed: Duration) {
        debug!(destination, elapsed_ms = elapsed.as_millis() as u64, "breaker error");
        let breaker = self.get_or_create(destination);
        let transition = lock(&breaker).on_error(Instant::now());
        self.emit(destination, transition);
    }

    pub fn force_open(&self, destination: &str) {
        self.transition_local(destination, BreakerState::ForcedOpen);
    }

    pub fn disable(&self, destination: &str) {
        self.transition_local(destination, BreakerState::Disabled);
    }

    /// Back to CLOSED with an empty window.
    pub fn reset(&self, destination: &str) {
        self.transition_local(destination, BreakerState::Closed);
    }

    fn transition_local(&self, destination: &str, to: BreakerState) {
        let breaker = self.get_or_create(destination);
        let transition = lock(&breaker).transition_to(to, Instant::now());
        self.emit(destination, transition);
    }

    /// Apply a peer's transition. Returns whether local state changed.
    /// Never broadcasts.
    pub fn apply_remote(&self, transition: &BreakerTransition) -> bool {
        if transition.origin == self.instance_id {
            return false;
        }

        let breaker = self.get_or_create(&transition.destination_name);
        let applied = lock(&breaker).transition_to(transition.to_state, Instant::now());

        if let Some((from, to)) = applied {
            info!(
                destination = %transition.destination_name,
                from = %from,
                to = %to,
                origin = %transition.origin,
                "applied remote breaker transition"
            );
        }
        applied.is_some()
    }

    /// Drive time-based transitions for every known breaker.
    pub fn tick(&self) {
        let now = Instant::now();
        for breaker in self.existing() {
            let (name, transition) = {
                let mut b = lock(&breaker);
                let t = b.tick(now);
                (b.name().to_string(), t)
            };
            self.emit(&name, transition);
        }
    }

    pub fn state(&self, destination: &str) -> Option<BreakerState> {
        let map = self.breakers.read().ok()?;
        map.get(destination).map(|b| lock(b).state())
    }

    /// Every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut out: Vec<BreakerSnapshot> = self
            .existing()
            .iter()
            .map(|b| {
                let b = lock(b);
                BreakerSnapshot {
                    name: b.name().to_string(),
                    state: b.state(),
                    metrics: b.metrics(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn emit(&self, destination: &str, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };

        info!(destination, from = %from, to = %to, "circuit breaker transition");
        self.metrics.increment(
            TRANSITION_METRIC,
            &[("destination", destination), ("from", from.as_str()), ("to", to.as_str())],
        );

        let message = BreakerTransition {
            destination_name: destination.to_string(),
            from_state: from,
            to_state: to,
            origin: self.instance_id.clone(),
        };
        if let Err(err) = self.sink.broadcast(message) {
            warn!(destination, error = %err, "failed to broadcast breaker transition");
        }
    }
}

impl core::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("instance_id", &self.instance_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock(b: &Mutex<CircuitBreaker>) -> MutexGuard<'_, CircuitBreaker> {
    match b.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
