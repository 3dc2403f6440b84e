use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use ets_core::{EtsError, SubscriptionId, TenantId, TriggerId};
use ets_invocations::{EtsEvent, Invocation, InvokeOptions, TriggerInvoked};
use ets_subscriptions::Subscription;
use ets_triggers::{Trigger, TriggerType};

use super::{INVOCATION_STARTED_METRIC, TriggerService};

/// Invoke a trigger for every matching subscription of the tenant.
#[derive(Debug, Clone, Default)]
pub struct InvokeTrigger {
    pub request_id: Option<String>,
    pub input: Map<String, Value>,
    pub context: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub deadline_override: Option<Duration>,
}

/// Invoke a trigger from the management API. Disabled flags and filters
/// are ignored; the example input stands in when none is given.
#[derive(Debug, Clone, Default)]
pub struct InvokeTestTrigger {
    pub input: Option<Map<String, Value>>,
    pub context: Map<String, Value>,
    pub subscription_ids: Option<Vec<SubscriptionId>>,
}

impl TriggerService {
    pub fn invoke_trigger(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
        cmd: InvokeTrigger,
    ) -> Result<Vec<Invocation>, EtsError> {
        let trigger = self
            .catalog
            .find_by_id(trigger_id)
            .ok_or_else(|| EtsError::not_found("trigger", trigger_id))?;

        if !self.catalog.is_enabled_for_tenant(trigger_id, tenant_id) {
            info!(tenant_id = %tenant_id, trigger_id = %trigger_id, "trigger not enabled for tenant");
            return Ok(Vec::new());
        }

        let subscriptions = self
            .subscriptions
            .find_by_tenant_id_and_trigger_id(tenant_id, trigger_id)?;

        let options = InvokeOptions {
            deadline_override: cmd.deadline_override,
            ..InvokeOptions::default()
        };

        let mut invoked = Vec::new();
        for subscription in subscriptions {
            if !subscription.enabled {
                continue;
            }
            match subscription.accepts(&cmd.input) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %err,
                        "subscription filter failed to evaluate; skipping"
                    );
                    continue;
                }
            }

            let result = self.invoke_one(
                &trigger,
                &subscription,
                &cmd.input,
                cmd.context.clone(),
                options,
                cmd.request_id.as_deref(),
                &cmd.headers,
            );
            collect_or_skip(&mut invoked, &subscription, result)?;
        }
        Ok(invoked)
    }

    pub fn invoke_test_trigger(
        &self,
        tenant_id: &TenantId,
        trigger_id: &TriggerId,
        cmd: InvokeTestTrigger,
    ) -> Result<Vec<Invocation>, EtsError> {
        let trigger = self
            .catalog
            .find_by_id(trigger_id)
            .ok_or_else(|| EtsError::not_found("trigger", trigger_id))?;
        if !self.catalog.is_enabled_for_tenant(trigger_id, tenant_id) {
            return Err(EtsError::not_found("trigger", trigger_id));
        }

        let input = cmd.input.unwrap_or_else(|| trigger.example_input().clone());
        let subscriptions = self
            .subscriptions
            .find_by_tenant_id_and_trigger_id(tenant_id, trigger_id)?;

        let mut invoked = Vec::new();
        for subscription in subscriptions {
            if let Some(ids) = &cmd.subscription_ids {
                if !ids.contains(&subscription.id) {
                    continue;
                }
            }
            let result = self.invoke_one(
                &trigger,
                &subscription,
                &input,
                cmd.context.clone(),
                InvokeOptions::test(),
                None,
                &BTreeMap::new(),
            );
            collect_or_skip(&mut invoked, &subscription, result)?;
        }
        Ok(invoked)
    }

    /// Resolve a domain event to its trigger and invoke it. Events without a
    /// trigger are ignored.
    pub fn invoke_for_event_source(
        &self,
        tenant_id: &TenantId,
        topic: &str,
        event_type: &str,
        cmd: InvokeTrigger,
    ) -> Result<Vec<Invocation>, EtsError> {
        match self.catalog.find_by_event_source(topic, event_type) {
            Some(trigger_id) => self.invoke_trigger(tenant_id, &trigger_id, cmd),
            None => Ok(Vec::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn invoke_one(
        &self,
        trigger: &Trigger,
        subscription: &Subscription,
        input: &Map<String, Value>,
        context: Map<String, Value>,
        options: InvokeOptions,
        request_id: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Invocation, EtsError> {
        let invoked = self
            .engine
            .invoke(trigger, subscription, input, context, options, Utc::now())?;
        let invocation = invoked.invocation;

        if trigger.trigger_type() == TriggerType::RequestResponse {
            self.invocations.save(invocation.hashed(&self.hasher))?;
        }

        let event = EtsEvent::TriggerInvoked(TriggerInvoked {
            invocation_id: invocation.id,
            trigger_id: invocation.trigger_id.clone(),
            trigger_type: trigger.trigger_type(),
            invocation_type: invocation.invocation_type,
            subscription_id: subscription.id,
            subscription_name: subscription.name.clone(),
            subscription_type: subscription.subscription_type,
            subscription_config: subscription.config.clone(),
            script_source: subscription.script_source.clone(),
            input: invoked.input,
            context: invocation.context.clone(),
            secret: invocation.secret.clone(),
            created: invocation.created,
            deadline: invocation.deadline,
        });
        self.publisher.publish(event.into_envelope(
            invocation.tenant_id.clone(),
            request_id,
            headers.clone(),
        ))?;

        self.metrics.increment(
            INVOCATION_STARTED_METRIC,
            &[
                ("trigger_id", invocation.trigger_id.as_str()),
                ("subscription_type", subscription.subscription_type.as_str()),
                ("invocation_type", invocation.invocation_type.as_str()),
            ],
        );
        info!(
            invocation_id = %invocation.id,
            tenant_id = %invocation.tenant_id,
            trigger_id = %invocation.trigger_id,
            subscription_id = %subscription.id,
            "trigger invoked"
        );
        Ok(invocation)
    }
}

/// The first failure propagates while nothing has gone out yet. After an
/// invocation has been published, later failures are logged and skipped so
/// the caller gets back exactly the invocations that were started.
fn collect_or_skip(
    invoked: &mut Vec<Invocation>,
    subscription: &Subscription,
    result: Result<Invocation, EtsError>,
) -> Result<(), EtsError> {
    match result {
        Ok(invocation) => invoked.push(invocation),
        Err(err) if invoked.is_empty() => return Err(err),
        Err(err) => error!(
            subscription_id = %subscription.id,
            error = %err,
            "subscription invocation failed; continuing with the rest"
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use ets_breaker::BreakerConfig;
    use ets_core::TriggerId;
    use ets_invocations::{EtsEvent, InvocationType};
    use ets_subscriptions::SubscriptionType;
    use ets_triggers::feature_key;

    use super::*;
    use crate::service::fixtures::*;
    use crate::store::{InvocationRepo, SubscriptionStore};

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn rr() -> TriggerId {
        TriggerId::new(RR).unwrap()
    }

    fn ff() -> TriggerId {
        TriggerId::new(FF).unwrap()
    }

    fn http_sub(trigger: TriggerId, name: &str) -> Subscription {
        Subscription::new(test_tenant(), trigger, SubscriptionType::Http, name)
            .with_config(obj(json!({ "url": "https://hooks.example.com/x" })))
    }

    #[test]
    fn unknown_trigger_is_not_found() {
        let h = harness();
        let err = h
            .service
            .invoke_trigger(&test_tenant(), &TriggerId::new("idn:nope").unwrap(), InvokeTrigger::default())
            .unwrap_err();
        assert!(matches!(err, EtsError::NotFound { kind: "trigger", .. }));
    }

    #[test]
    fn disabled_trigger_yields_nothing() {
        let h = harness();
        h.subscriptions.insert(http_sub(rr(), "s1")).unwrap();
        h.features.set(feature_key(&rr()), false);

        let out = h
            .service
            .invoke_trigger(
                &test_tenant(),
                &rr(),
                InvokeTrigger {
                    input: obj(json!({ "accessRequestId": "ar-1" })),
                    ..InvokeTrigger::default()
                },
            )
            .unwrap();
        assert!(out.is_empty());
        assert!(h.events.drain().is_empty());
    }

    #[test]
    fn request_response_is_persisted_hashed_and_published() {
        let h = harness();
        h.subscriptions.insert(http_sub(rr(), "s1")).unwrap();

        let out = h
            .service
            .invoke_trigger(
                &test_tenant(),
                &rr(),
                InvokeTrigger {
                    request_id: Some("req-1".into()),
                    input: obj(json!({ "accessRequestId": "ar-1", "secretField": "x" })),
                    ..InvokeTrigger::default()
                },
            )
            .unwrap();
        assert_eq!(out.len(), 1);
        let inv = &out[0];

        let stored = h.invocations.find_by_id(inv.id).unwrap().unwrap();
        assert_ne!(stored.secret, inv.secret);

        let events = h.events.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request_id(), Some("req-1"));
        match events[0].payload() {
            EtsEvent::TriggerInvoked(e) => {
                assert_eq!(e.secret, inv.secret);
                assert_eq!(Value::Object(e.input.clone()), json!({ "accessRequestId": "ar-1" }));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn later_subscription_failure_keeps_started_invocations() {
        let h = harness_over(BreakerConfig::default(), |inner| {
            Arc::new(FailingSaves { inner, remaining: AtomicUsize::new(1) })
        });
        h.subscriptions.insert(http_sub(rr(), "s1")).unwrap();
        h.subscriptions.insert(http_sub(rr(), "s2")).unwrap();

        let out = h
            .service
            .invoke_trigger(
                &test_tenant(),
                &rr(),
                InvokeTrigger {
                    input: obj(json!({ "accessRequestId": "ar-1" })),
                    ..InvokeTrigger::default()
                },
            )
            .unwrap();

        assert_eq!(out.len(), 1);
        assert!(h.invocations.find_by_id(out[0].id).unwrap().is_some());
        let events = h.events.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].payload(), EtsEvent::TriggerInvoked(e) if e.invocation_id == out[0].id));
    }

    #[test]
    fn failure_before_anything_started_is_returned() {
        let h = harness_over(BreakerConfig::default(), |inner| {
            Arc::new(FailingSaves { inner, remaining: AtomicUsize::new(0) })
        });
        h.subscriptions.insert(http_sub(rr(), "s1")).unwrap();

        let err = h
            .service
            .invoke_trigger(
                &test_tenant(),
                &rr(),
                InvokeTrigger {
                    input: obj(json!({ "accessRequestId": "ar-1" })),
                    ..InvokeTrigger::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EtsError::Store(_)));
        assert!(h.events.drain().is_empty());
    }

    #[test]
    fn fire_and_forget_is_not_persisted() {
        let h = harness();
        h.subscriptions.insert(http_sub(ff(), "a")).unwrap();
        h.subscriptions.insert(http_sub(ff(), "b")).unwrap();

        let out = h
            .service
            .invoke_for_event_source(
                &test_tenant(),
                "identity",
                "identity_created",
                InvokeTrigger {
                    input: obj(json!({ "identity": { "id": "1" } })),
                    ..InvokeTrigger::default()
                },
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(h.invocations.is_empty());
        assert_eq!(h.events.drain().len(), 2);
    }

    #[test]
    fn disabled_and_filtered_subscriptions_are_skipped() {
        let h = harness();
        h.subscriptions.insert(http_sub(ff(), "off").disabled()).unwrap();
        h.subscriptions
            .insert(http_sub(ff(), "ada-only").with_filter("$.identity[?(@.name == 'Ada')]"))
            .unwrap();
        h.subscriptions.insert(http_sub(ff(), "all")).unwrap();

        let invoke = |name: &str| {
            h.service
                .invoke_trigger(
                    &test_tenant(),
                    &ff(),
                    InvokeTrigger {
                        input: obj(json!({ "identity": { "id": "1", "name": name } })),
                        ..InvokeTrigger::default()
                    },
                )
                .unwrap()
                .len()
        };
        assert_eq!(invoke("Ada"), 2);
        assert_eq!(invoke("Bob"), 1);
    }

    #[test]
    fn invalid_input_creates_no_invocation() {
        let h = harness();
        h.subscriptions.insert(http_sub(rr(), "s1")).unwrap();

        let err = h
            .service
            .invoke_trigger(&test_tenant(), &rr(), InvokeTrigger::default())
            .unwrap_err();
        assert!(matches!(err, EtsError::Validation { .. }));
        assert!(h.invocations.is_empty());
        assert!(h.events.drain().is_empty());
    }

    #[test]
    fn test_invocation_uses_example_input_and_selected_subscriptions() {
        let h = harness();
        let chosen = http_sub(ff(), "chosen").disabled();
        h.subscriptions.insert(chosen.clone()).unwrap();
        h.subscriptions.insert(http_sub(ff(), "other")).unwrap();

        let out = h
            .service
            .invoke_test_trigger(
                &test_tenant(),
                &ff(),
                InvokeTestTrigger {
                    subscription_ids: Some(vec![chosen.id]),
                    ..InvokeTestTrigger::default()
                },
            )
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].subscription_id, chosen.id);
        assert_eq!(out[0].invocation_type, InvocationType::Test);
        match h.events.drain()[0].payload() {
            EtsEvent::TriggerInvoked(e) => assert_eq!(
                Value::Object(e.input.clone()),
                json!({ "identity": { "id": "2c91", "name": "Ada" } })
            ),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
