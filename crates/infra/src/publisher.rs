//! Object-safe seam for publishing ETS events.
//!
//! Services hold an `Arc<dyn EventPublisher>` so they stay independent of
//! the bus type; any `EventBus<EtsEventEnvelope>` is a publisher.

use ets_core::EtsError;
use ets_events::EventBus;
use ets_invocations::EtsEventEnvelope;

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: EtsEventEnvelope) -> Result<(), EtsError>;
}

impl<B> EventPublisher for B
where
    B: EventBus<EtsEventEnvelope>,
{
    fn publish(&self, event: EtsEventEnvelope) -> Result<(), EtsError> {
        EventBus::publish(self, event).map_err(|e| EtsError::store(format!("event publish failed: {e:?}")))
    }
}
