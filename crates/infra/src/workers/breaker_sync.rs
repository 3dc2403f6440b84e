//! Keeps this instance's breakers in line with the rest of the fleet.

use std::io;
use std::sync::Arc;

use ets_breaker::{BreakerTransition, CircuitBreakerRegistry};
use ets_events::{EventBus, EventHandler};

use super::event_worker::{EventWorker, WorkerHandle};

/// Applies transitions broadcast by peers. Applying is idempotent and never
/// re-broadcasts, so redelivery and echoes of our own transitions are safe.
pub struct BreakerSyncHandler {
    registry: Arc<CircuitBreakerRegistry>,
}

impl BreakerSyncHandler {
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self { registry }
    }
}

impl EventHandler<BreakerTransition> for BreakerSyncHandler {
    type Error = std::convert::Infallible;

    fn handle(&self, message: &BreakerTransition) -> Result<(), Self::Error> {
        self.registry.apply_remote(message);
        Ok(())
    }
}

/// Spawn the sync worker. Quiet ticks drive the registry's time-based
/// transitions (OPEN to HALF_OPEN when automatic transition is on).
pub fn spawn_breaker_sync<B>(bus: &B, registry: Arc<CircuitBreakerRegistry>) -> io::Result<WorkerHandle>
where
    B: EventBus<BreakerTransition> + ?Sized,
{
    let ticker = registry.clone();
    EventWorker::spawn_with_idle(
        "ets-breaker-sync",
        bus,
        BreakerSyncHandler::new(registry),
        move || ticker.tick(),
    )
}
