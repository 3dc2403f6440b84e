use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::{InvocationId, Secret, SecretHasher, SubscriptionId, TenantId, TriggerId};

use crate::events::{EtsEvent, InvocationCompleted, InvocationFailed};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationType {
    RealTime,
    /// Started from the management API; outcome events carry the test flag.
    Test,
}

impl InvocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RealTime => "REAL_TIME",
            Self::Test => "TEST",
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

/// One in-flight dispatch attempt.
///
/// The engine hands out the raw secret (it travels to the destination with
/// the callback URL); the repository copy only carries its hash, see
/// [`Invocation::hashed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub id: InvocationId,
    pub created: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub trigger_id: TriggerId,
    pub subscription_id: SubscriptionId,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub deadline: DateTime<Utc>,
    pub secret: Secret,
    #[serde(rename = "type")]
    pub invocation_type: InvocationType,
}

impl Invocation {
    /// Copy with the secret replaced by its keyed hash.
    pub fn hashed(&self, hasher: &SecretHasher) -> Self {
        Self {
            secret: hasher.encode(&self.secret),
            ..self.clone()
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }

    /// Time since creation; zero when `now` is before `created`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created).to_std().unwrap_or_default()
    }

    pub fn completed_event(&self, output: Map<String, Value>, request_id: Option<String>) -> EtsEvent {
        EtsEvent::InvocationCompleted(InvocationCompleted {
            invocation_id: self.id,
            trigger_id: self.trigger_id.clone(),
            request_id,
            context: self.context.clone(),
            output,
            test: self.invocation_type.is_test(),
        })
    }

    pub fn failed_event(&self, reason: impl Into<String>) -> EtsEvent {
        EtsEvent::InvocationFailed(InvocationFailed {
            invocation_id: self.id,
            trigger_id: self.trigger_id.clone(),
            context: self.context.clone(),
            reason: reason.into(),
            test: self.invocation_type.is_test(),
        })
    }
}
