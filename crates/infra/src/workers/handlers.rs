//! Bus handlers wiring consumed events into the trigger service.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use ets_core::EtsError;
use ets_events::{EventEnvelope, EventHandler};
use ets_invocations::{CompleteInvocationInput, EtsEvent, EtsEventEnvelope};

use crate::service::{InvokeTrigger, TriggerService};
use crate::status::InvocationStatusTracker;

/// Domain events from the rest of the platform, payload as plain JSON.
pub type DomainEvent = EventEnvelope<Map<String, Value>>;

/// Consumes the ETS topics.
///
/// `TriggerInvoked` records the started status and then dispatches, in that
/// order, so a status always exists before anything can complete it. The
/// ack events complete the status.
pub struct InvocationEventHandler {
    service: Arc<TriggerService>,
    tracker: Arc<InvocationStatusTracker>,
}

impl InvocationEventHandler {
    pub fn new(service: Arc<TriggerService>, tracker: Arc<InvocationStatusTracker>) -> Self {
        Self { service, tracker }
    }
}

impl EventHandler<EtsEventEnvelope> for InvocationEventHandler {
    type Error = EtsError;

    fn handle(&self, message: &EtsEventEnvelope) -> Result<(), Self::Error> {
        let tenant_id = message.tenant_id();
        match message.payload() {
            EtsEvent::TriggerInvoked(event) => {
                self.tracker.start_from_event(tenant_id, event)?;
                match self
                    .service
                    .handle_invoked(tenant_id, message.request_id(), message.headers(), event)
                {
                    // Left for the deadline sweeper.
                    Err(EtsError::CircuitOpen { destination }) => {
                        debug!(invocation_id = %event.invocation_id, destination = %destination, "dispatch skipped");
                        Ok(())
                    }
                    other => other,
                }
            }
            EtsEvent::InvocationCompleted(event) => self.tracker.complete(
                tenant_id,
                event.invocation_id,
                CompleteInvocationInput::succeeded(event.output.clone()),
            ),
            EtsEvent::InvocationFailed(event) => self.tracker.complete(
                tenant_id,
                event.invocation_id,
                CompleteInvocationInput::failed(event.reason.clone()),
            ),
            EtsEvent::TriggerWorkflow(_) => Ok(()),
        }
    }
}

/// Turns platform domain events into trigger invocations through the
/// catalog's event sources.
pub struct DomainEventHandler {
    service: Arc<TriggerService>,
}

impl DomainEventHandler {
    pub fn new(service: Arc<TriggerService>) -> Self {
        Self { service }
    }
}

impl EventHandler<DomainEvent> for DomainEventHandler {
    type Error = EtsError;

    fn handle(&self, message: &DomainEvent) -> Result<(), Self::Error> {
        let invoked = self.service.invoke_for_event_source(
            message.tenant_id(),
            message.topic(),
            message.event_type(),
            InvokeTrigger {
                request_id: message.request_id().map(str::to_string),
                input: message.payload().clone(),
                headers: message.headers().clone(),
                ..InvokeTrigger::default()
            },
        );
        match invoked {
            Ok(invocations) => {
                debug!(
                    topic = message.topic(),
                    event_type = message.event_type(),
                    invocations = invocations.len(),
                    "domain event handled"
                );
                Ok(())
            }
            // Bad input is not retried; the event is dropped.
            Err(err @ EtsError::Validation { .. }) => {
                warn!(
                    topic = message.topic(),
                    event_type = message.event_type(),
                    error = %err,
                    "domain event rejected"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use ets_core::TriggerId;
    use ets_subscriptions::{Subscription, SubscriptionType};

    use super::*;
    use crate::service::fixtures::*;
    use crate::service::{CompleteInvocation, destination_name};
    use crate::store::{InMemoryStatusStore, StatusQuery, SubscriptionStore};

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn subscribe(h: &Harness, trigger: &str, config: Value) {
        h.subscriptions
            .insert(
                Subscription::new(test_tenant(), TriggerId::new(trigger).unwrap(), SubscriptionType::Http, "hook")
                    .with_config(obj(config)),
            )
            .unwrap();
    }

    fn tracker(h: &Harness) -> Arc<InvocationStatusTracker> {
        Arc::new(InvocationStatusTracker::new(Arc::new(InMemoryStatusStore::new())).with_metrics(h.metrics))
    }

    fn invoke_rr(h: &Harness) -> ets_invocations::Invocation {
        h.service
            .invoke_trigger(
                &test_tenant(),
                &TriggerId::new(RR).unwrap(),
                InvokeTrigger {
                    input: obj(json!({ "accessRequestId": "ar-1" })),
                    ..Default::default()
                },
            )
            .unwrap()
            .remove(0)
    }

    /// Feed pending bus events to `handler` until the bus is quiet.
    fn pump<H: EventHandler<EtsEventEnvelope>>(h: &Harness, handler: &H) {
        loop {
            let batch = h.events.drain();
            if batch.is_empty() {
                break;
            }
            for event in &batch {
                handler.handle(event).unwrap();
            }
        }
    }

    #[test]
    fn domain_event_runs_through_to_completed_status() {
        let h = harness();
        subscribe(&h, FF, json!({ "url": "https://hooks.example.com" }));
        let tracker = tracker(&h);

        DomainEventHandler::new(h.service.clone())
            .handle(&DomainEvent::new(
                test_tenant(),
                "identity",
                "IDENTITY_CREATED",
                obj(json!({ "identity": { "id": "2c91", "name": "Ada" } })),
            ))
            .unwrap();
        pump(&h, &InvocationEventHandler::new(h.service.clone(), tracker.clone()));

        assert_eq!(h.deliverer.requests().len(), 1);
        let statuses = tracker.list(&test_tenant(), &StatusQuery::default()).unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].is_completed());
    }

    #[test]
    fn callback_completes_started_status() {
        let h = harness();
        subscribe(&h, RR, json!({ "url": "https://hooks.example.com", "httpDispatchMode": "ASYNC" }));
        let tracker = tracker(&h);
        let handler = InvocationEventHandler::new(h.service.clone(), tracker.clone());

        let inv = invoke_rr(&h);
        pump(&h, &handler);
        assert!(!tracker.get(&test_tenant(), inv.id).unwrap().is_completed());

        h.service
            .complete_invocation(
                &test_tenant(),
                CompleteInvocation {
                    invocation_id: inv.id,
                    secret: inv.secret.expose().to_string(),
                    output: Some(obj(json!({ "approved": true }))),
                    ..Default::default()
                },
            )
            .unwrap();
        pump(&h, &handler);

        let status = tracker.get(&test_tenant(), inv.id).unwrap();
        assert!(status.is_completed());
        assert_eq!(
            status.complete_invocation_input.and_then(|c| c.output),
            Some(obj(json!({ "approved": true })))
        );
    }

    #[test]
    fn open_circuit_is_not_a_handler_failure() {
        let h = harness();
        subscribe(&h, RR, json!({ "url": "https://hooks.example.com" }));
        h.service
            .breakers()
            .force_open(&destination_name(&test_tenant(), &TriggerId::new(RR).unwrap()));

        invoke_rr(&h);
        pump(&h, &InvocationEventHandler::new(h.service.clone(), tracker(&h)));
        assert!(h.deliverer.requests().is_empty());
    }

    #[test]
    fn domain_events_without_a_trigger_are_ignored() {
        let h = harness();
        let event = DomainEvent::new(test_tenant(), "identity", "IDENTITY_DELETED", Map::new());
        assert!(DomainEventHandler::new(h.service.clone()).handle(&event).is_ok());
        assert!(h.events.drain().is_empty());
    }

    #[test]
    fn invalid_domain_payload_is_dropped() {
        let h = harness();
        subscribe(&h, FF, json!({ "url": "https://hooks.example.com" }));
        let event = DomainEvent::new(test_tenant(), "identity", "IDENTITY_CREATED", Map::new());
        assert!(DomainEventHandler::new(h.service.clone()).handle(&event).is_ok());
        assert!(h.events.drain().is_empty());
    }
}
