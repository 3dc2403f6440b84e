//! The pure invoke step: validate input, create the invocation and decide
//! whether it completes on the spot.
//!
//! Nothing here does IO. Persisting, publishing and delivering are the
//! caller's job (`ets-infra::service`).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use ets_core::{EtsError, InvocationId, Secret, TenantId};
use ets_schema::SchemaValidator;
use ets_subscriptions::{InlineConfig, Subscription, view};
use ets_triggers::Trigger;

use crate::invocation::{Invocation, InvocationType};
use crate::status::CompleteInvocationInput;

/// Error recorded when a callback carries neither output nor error.
pub const NO_OUTPUT_ERROR: &str = "no output was provided";

/// Upper bound on an explicit deadline override.
pub const DEFAULT_MAX_DEADLINE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    pub invocation_type: InvocationType,
    /// Takes precedence over the subscription and trigger deadlines.
    pub deadline_override: Option<Duration>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            invocation_type: InvocationType::RealTime,
            deadline_override: None,
        }
    }
}

impl InvokeOptions {
    pub fn test() -> Self {
        Self {
            invocation_type: InvocationType::Test,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_override = Some(deadline);
        self
    }
}

/// Result of [`InvocationEngine::invoke`].
#[derive(Debug, Clone, PartialEq)]
pub struct Invoked {
    /// Carries the raw secret.
    pub invocation: Invocation,
    /// Input after projection; this is what leaves the service.
    pub input: Map<String, Value>,
    /// Set when the invocation is complete at creation (fire-and-forget
    /// trigger or inline subscription).
    pub completion: Option<CompleteInvocationInput>,
}

#[derive(Debug, Clone, Copy)]
pub struct InvocationEngine {
    validator: SchemaValidator,
    max_deadline: Duration,
}

impl Default for InvocationEngine {
    fn default() -> Self {
        Self::new(SchemaValidator::new())
    }
}

impl InvocationEngine {
    pub fn new(validator: SchemaValidator) -> Self {
        Self {
            validator,
            max_deadline: DEFAULT_MAX_DEADLINE,
        }
    }

    pub fn with_max_deadline(mut self, max_deadline: Duration) -> Self {
        self.max_deadline = max_deadline;
        self
    }

    /// Deadline precedence: explicit override, then the subscription's
    /// response deadline, then the trigger timeout.
    pub fn deadline_for(
        &self,
        trigger: &Trigger,
        subscription: &Subscription,
        deadline_override: Option<Duration>,
    ) -> Result<Duration, EtsError> {
        match deadline_override {
            Some(d) if d > self.max_deadline => Err(EtsError::bad_request(format!(
                "deadline exceeds maximum of {} minutes",
                self.max_deadline.as_secs() / 60
            ))),
            Some(d) => Ok(d),
            None => Ok(subscription.response_deadline.unwrap_or_else(|| trigger.timeout())),
        }
    }

    pub fn invoke(
        &self,
        trigger: &Trigger,
        subscription: &Subscription,
        input: &Map<String, Value>,
        context: Map<String, Value>,
        options: InvokeOptions,
        now: DateTime<Utc>,
    ) -> Result<Invoked, EtsError> {
        let tenant = &subscription.tenant_id;
        let input = self
            .validator
            .validate(trigger.input_schema(), input, tenant)?
            .into_inner();

        let deadline = self.deadline_for(trigger, subscription, options.deadline_override)?;
        let deadline = chrono::Duration::from_std(deadline)
            .map_err(|e| EtsError::bad_request(format!("invalid deadline: {e}")))?;

        let invocation = Invocation {
            id: InvocationId::new(),
            created: now,
            tenant_id: tenant.clone(),
            trigger_id: trigger.id().clone(),
            subscription_id: subscription.id,
            context,
            deadline: now + deadline,
            secret: Secret::generate(),
            invocation_type: options.invocation_type,
        };

        let completion = if trigger.is_fire_and_forget() {
            Some(CompleteInvocationInput::succeeded(Map::new()))
        } else if subscription.is_inline() {
            let inline: InlineConfig = view(&subscription.config, "inline")?;
            Some(CompleteInvocationInput {
                output: inline.output,
                error: inline.error,
            })
        } else {
            None
        };

        debug!(
            invocation_id = %invocation.id,
            trigger_id = %invocation.trigger_id,
            subscription_id = %subscription.id,
            completed = completion.is_some(),
            "invocation created"
        );

        Ok(Invoked {
            invocation,
            input,
            completion,
        })
    }

    /// Check a canned output (inline subscriptions) against the trigger's
    /// output schema. Triggers without one accept anything.
    pub fn validate_output(
        &self,
        trigger: &Trigger,
        output: &Map<String, Value>,
        tenant_id: &TenantId,
    ) -> Result<Map<String, Value>, EtsError> {
        match trigger.output_schema() {
            Some(schema) => Ok(self.validator.validate(schema, output, tenant_id)?.into_inner()),
            None => Ok(output.clone()),
        }
    }

    /// Turn a callback's output/error into the recorded outcome.
    ///
    /// A non-empty error wins. Otherwise the output must be present and pass
    /// the trigger's output schema; the projected output is what gets
    /// recorded.
    pub fn check_output(
        &self,
        trigger: &Trigger,
        invocation: &Invocation,
        output: Option<Map<String, Value>>,
        error: Option<String>,
    ) -> CompleteInvocationInput {
        if let Some(error) = error.filter(|e| !e.is_empty()) {
            return CompleteInvocationInput::failed(error);
        }
        let Some(output) = output else {
            return CompleteInvocationInput::failed(NO_OUTPUT_ERROR);
        };
        let Some(schema) = trigger.output_schema() else {
            return CompleteInvocationInput::succeeded(output);
        };

        match self.validator.validate(schema, &output, &invocation.tenant_id) {
            Ok(projected) => CompleteInvocationInput::succeeded(projected.into_inner()),
            Err(err) => {
                let detail = match err {
                    EtsError::Validation { reason, .. } => reason,
                    other => other.to_string(),
                };
                CompleteInvocationInput::failed(format!(
                    "output was not in the correct format: {detail}"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use ets_core::{TenantId, TriggerId, TriggerName};
    use ets_schema::{JsonSchema, TriggerSchema};
    use ets_subscriptions::SubscriptionType;
    use ets_triggers::TriggerType;

    use super::*;

    fn test_tenant() -> TenantId {
        TenantId::new("dev:acme").unwrap()
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn schema(id: &str, root: Value) -> TriggerSchema {
        TriggerSchema::new(JsonSchema::new(id, root).unwrap())
    }

    fn request_response() -> Trigger {
        let id = "idn:access-request-pre-approval";
        Trigger::new(
            TriggerId::new(id).unwrap(),
            TriggerName::new("Access Request Pre Approval").unwrap(),
            TriggerType::RequestResponse,
            schema(
                id,
                json!({
                    "type": "object",
                    "required": ["accessRequestId"],
                    "properties": { "accessRequestId": { "type": "string" } }
                }),
            ),
            obj(json!({ "accessRequestId": "ar-1" })),
        )
        .with_output(
            schema(
                id,
                json!({
                    "type": "object",
                    "required": ["approved"],
                    "properties": { "approved": { "type": "boolean" } }
                }),
            ),
            obj(json!({ "approved": true })),
        )
    }

    fn fire_and_forget() -> Trigger {
        let id = "idn:identity-created";
        Trigger::new(
            TriggerId::new(id).unwrap(),
            TriggerName::new("Identity Created").unwrap(),
            TriggerType::FireAndForget,
            schema(id, json!({ "type": "object", "properties": { "id": { "type": "string" } } })),
            obj(json!({ "id": "2c91" })),
        )
    }

    fn subscription(trigger: &Trigger, kind: SubscriptionType) -> Subscription {
        Subscription::new(test_tenant(), trigger.id().clone(), kind, "s1")
    }

    fn engine() -> InvocationEngine {
        InvocationEngine::new(SchemaValidator::with_registry(Box::leak(Box::default())))
    }

    #[test]
    fn request_response_waits_for_callback() {
        let trigger = request_response();
        let sub = subscription(&trigger, SubscriptionType::Http);
        let now = Utc::now();

        let invoked = engine()
            .invoke(
                &trigger,
                &sub,
                &obj(json!({ "accessRequestId": "ar-1", "internal": "x" })),
                Map::new(),
                InvokeOptions::default(),
                now,
            )
            .unwrap();

        assert_eq!(invoked.completion, None);
        assert_eq!(invoked.invocation.deadline, now + chrono::Duration::minutes(5));
        assert!(!invoked.invocation.secret.is_empty());
        assert_eq!(Value::Object(invoked.input), json!({ "accessRequestId": "ar-1" }));
    }

    #[test]
    fn invalid_input_creates_nothing() {
        let trigger = request_response();
        let sub = subscription(&trigger, SubscriptionType::Http);

        let err = engine()
            .invoke(&trigger, &sub, &Map::new(), Map::new(), InvokeOptions::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, EtsError::Validation { schema_id, .. } if schema_id == "idn:access-request-pre-approval"));
    }

    #[test]
    fn fire_and_forget_completes_at_creation() {
        let trigger = fire_and_forget();
        let sub = subscription(&trigger, SubscriptionType::Http);

        let invoked = engine()
            .invoke(&trigger, &sub, &obj(json!({ "id": "1" })), Map::new(), InvokeOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(
            invoked.completion,
            Some(CompleteInvocationInput::succeeded(Map::new()))
        );
    }

    #[test]
    fn inline_completes_with_config_verbatim() {
        let trigger = request_response();
        let sub = subscription(&trigger, SubscriptionType::Inline)
            .with_config(obj(json!({ "output": { "approved": false, "extra": 1 }, "error": null })));

        let invoked = engine()
            .invoke(
                &trigger,
                &sub,
                &obj(json!({ "accessRequestId": "ar-1" })),
                Map::new(),
                InvokeOptions::test(),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(invoked.invocation.invocation_type, InvocationType::Test);
        assert_eq!(
            invoked.completion,
            Some(CompleteInvocationInput {
                output: Some(obj(json!({ "approved": false, "extra": 1 }))),
                error: None,
            })
        );
    }

    #[test]
    fn deadline_precedence() {
        let trigger = request_response();
        let engine = engine();
        let plain = subscription(&trigger, SubscriptionType::Http);
        let custom = plain.clone().with_response_deadline(Duration::from_secs(600));

        assert_eq!(engine.deadline_for(&trigger, &plain, None).unwrap(), trigger.timeout());
        assert_eq!(engine.deadline_for(&trigger, &custom, None).unwrap(), Duration::from_secs(600));
        assert_eq!(
            engine.deadline_for(&trigger, &custom, Some(Duration::from_secs(60))).unwrap(),
            Duration::from_secs(60)
        );
        assert!(engine
            .deadline_for(&trigger, &custom, Some(Duration::from_secs(2 * 60 * 60)))
            .is_err());
    }

    #[test]
    fn output_checks() {
        let trigger = request_response();
        let engine = engine();
        let inv = engine
            .invoke(
                &trigger,
                &subscription(&trigger, SubscriptionType::Http),
                &obj(json!({ "accessRequestId": "ar-1" })),
                Map::new(),
                InvokeOptions::default(),
                Utc::now(),
            )
            .unwrap()
            .invocation;

        assert_eq!(
            engine.check_output(&trigger, &inv, None, None),
            CompleteInvocationInput::failed(NO_OUTPUT_ERROR)
        );
        assert_eq!(
            engine.check_output(&trigger, &inv, None, Some("denied".into())),
            CompleteInvocationInput::failed("denied")
        );
        assert_eq!(
            engine.check_output(&trigger, &inv, Some(obj(json!({ "approved": true, "x": 1 }))), Some(String::new())),
            CompleteInvocationInput::succeeded(obj(json!({ "approved": true })))
        );

        let bad = engine.check_output(&trigger, &inv, Some(obj(json!({ "approved": "yes" }))), None);
        assert!(bad
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("output was not in the correct format: ")));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn deadline_is_created_plus_response_deadline(minutes in 1u64..=600) {
            let trigger = request_response();
            let sub = subscription(&trigger, SubscriptionType::Http)
                .with_response_deadline(Duration::from_secs(minutes * 60));
            let now = Utc::now();

            let inv = engine()
                .invoke(&trigger, &sub, &obj(json!({ "accessRequestId": "ar" })), Map::new(), InvokeOptions::default(), now)
                .unwrap()
                .invocation;

            prop_assert_eq!(inv.created, now);
            prop_assert_eq!(inv.deadline - inv.created, chrono::Duration::minutes(minutes as i64));
        }
    }
}
