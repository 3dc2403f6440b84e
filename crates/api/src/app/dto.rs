use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::{InvocationId, SubscriptionId, TriggerId};
use ets_invocations::Invocation;
use ets_subscriptions::Subscription;
use ets_triggers::{Trigger, TriggerType};

/// Credential fields never echoed back, keyed by the config object holding them.
const REDACTED_CREDENTIALS: [(&str, &str); 2] = [
    ("basicAuthConfig", "password"),
    ("bearerTokenAuthConfig", "bearerToken"),
];

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInvocationRequest {
    pub trigger_id: TriggerId,
    pub input: Map<String, Value>,
    #[serde(default)]
    pub content_json: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInvocationRequest {
    pub trigger_id: TriggerId,
    #[serde(default)]
    pub input: Option<Map<String, Value>>,
    #[serde(default)]
    pub content_json: Map<String, Value>,
    #[serde(default)]
    pub subscription_ids: Option<Vec<SubscriptionId>>,
}

/// Callback body. Destinations may echo back the `_metadata` block they
/// were dispatched with instead of a top-level secret.
#[derive(Debug, Default, Deserialize)]
pub struct CompleteInvocationRequest {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub output: Option<Map<String, Value>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "_metadata")]
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackMetadata {
    #[serde(default)]
    pub invocation_id: Option<InvocationId>,
    #[serde(default)]
    pub secret: Option<String>,
}

impl CompleteInvocationRequest {
    /// A `_metadata` block without `invocationId` comes from a
    /// fire-and-forget caller; there is nothing to complete.
    pub fn is_untracked(&self) -> bool {
        self.metadata
            .as_ref()
            .is_some_and(|m| m.invocation_id.is_none())
    }

    /// The top-level secret, or the one echoed in `_metadata`.
    pub fn secret(&self) -> &str {
        match self.metadata.as_ref().and_then(|m| m.secret.as_deref()) {
            Some(echoed) if self.secret.is_empty() => echoed,
            _ => &self.secret,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateFilterRequest {
    pub filter: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSubscriptionsParams {
    /// Filter expression, e.g. `triggerId eq "idn:identity-created"`.
    pub filters: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStatusParams {
    pub trigger_id: Option<TriggerId>,
    pub subscription_id: Option<SubscriptionId>,
    pub completed: Option<bool>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDto {
    pub id: TriggerId,
    pub name: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    pub example_input: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_output: Option<Map<String, Value>>,
}

impl From<&Trigger> for TriggerDto {
    fn from(t: &Trigger) -> Self {
        Self {
            id: t.id().clone(),
            name: t.name().to_string(),
            trigger_type: t.trigger_type(),
            description: t.description().map(str::to_string),
            input_schema: t.input_schema().schema().raw().clone(),
            output_schema: t.output_schema().map(|s| s.schema().raw().clone()),
            example_input: t.example_input().clone(),
            example_output: t.example_output().cloned(),
        }
    }
}

/// An invocation as returned to the caller that started it; the secret is
/// the raw one and is only ever shown here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationDto {
    pub id: InvocationId,
    pub trigger_id: TriggerId,
    pub subscription_id: SubscriptionId,
    pub secret: String,
    pub content_json: Map<String, Value>,
    pub deadline: DateTime<Utc>,
}

impl From<Invocation> for InvocationDto {
    fn from(inv: Invocation) -> Self {
        Self {
            id: inv.id,
            trigger_id: inv.trigger_id,
            subscription_id: inv.subscription_id,
            secret: inv.secret.expose().to_string(),
            content_json: inv.context,
            deadline: inv.deadline,
        }
    }
}

/// A subscription as returned by the API, with stored credentials removed.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct SubscriptionDto(Subscription);

impl From<Subscription> for SubscriptionDto {
    fn from(mut s: Subscription) -> Self {
        for (section, field) in REDACTED_CREDENTIALS {
            if let Some(Value::Object(auth)) = s.config.get_mut(section) {
                auth.remove(field);
            }
        }
        Self(s)
    }
}
