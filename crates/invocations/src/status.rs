use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::{InvocationId, SubscriptionId, TenantId, TriggerId};
use ets_subscriptions::SubscriptionType;

use crate::invocation::InvocationType;

/// Retention of a successfully completed status record.
pub const SUCCESS_TTL: Duration = Duration::from_secs(1400 * 60);
/// Retention of a status record completed with an error.
pub const FAILURE_TTL: Duration = Duration::from_secs(2880 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInvocationInput {
    pub trigger_id: Option<TriggerId>,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteInvocationInput {
    #[serde(default)]
    pub output: Option<Map<String, Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CompleteInvocationInput {
    pub fn succeeded(output: Map<String, Value>) -> Self {
        Self {
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(error.into()),
        }
    }

    /// A non-empty error marks the outcome as failed.
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Observable lifecycle record of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationStatus {
    pub id: InvocationId,
    pub tenant_id: TenantId,
    pub trigger_id: TriggerId,
    pub subscription_id: SubscriptionId,
    pub subscription_name: String,
    pub subscription_type: SubscriptionType,
    #[serde(rename = "type")]
    pub invocation_type: InvocationType,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub start_invocation_input: StartInvocationInput,
    pub complete_invocation_input: Option<CompleteInvocationInput>,
}

impl InvocationStatus {
    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    /// Record the outcome. Returns `false` and leaves the record untouched
    /// when it was already completed.
    pub fn complete(&mut self, at: DateTime<Utc>, input: CompleteInvocationInput) -> bool {
        if self.is_completed() {
            return false;
        }
        self.completed = Some(at);
        self.complete_invocation_input = Some(input);
        true
    }

    /// When the record may be purged; `None` while still running.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let completed = self.completed?;
        let failed = self
            .complete_invocation_input
            .as_ref()
            .is_some_and(CompleteInvocationInput::is_error);
        let ttl = if failed { FAILURE_TTL } else { SUCCESS_TTL };
        chrono::Duration::from_std(ttl).ok().map(|ttl| completed + ttl)
    }
}
