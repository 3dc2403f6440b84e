//! Events published over an invocation's life.
//!
//! `TriggerInvoked` goes to [`TRIGGER_TOPIC`] and drives the status start
//! handler and dispatch. Outcomes go to [`TRIGGER_ACK_TOPIC`]; test
//! invocations use the `*TestEvent` types so consumers can tell them apart.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::{InvocationId, Secret, SubscriptionId, TenantId, TriggerId};
use ets_events::EventEnvelope;
use ets_subscriptions::SubscriptionType;
use ets_triggers::TriggerType;

use crate::invocation::InvocationType;

pub const TRIGGER_TOPIC: &str = "trigger";
pub const TRIGGER_ACK_TOPIC: &str = "trigger_ack";
pub const WORKFLOW_TOPIC: &str = "workflow";

pub type EtsEventEnvelope = EventEnvelope<EtsEvent>;

/// A trigger was invoked for one subscription; dispatch has not happened yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInvoked {
    pub invocation_id: InvocationId,
    pub trigger_id: TriggerId,
    pub trigger_type: TriggerType,
    pub invocation_type: InvocationType,
    pub subscription_id: SubscriptionId,
    pub subscription_name: String,
    pub subscription_type: SubscriptionType,
    pub subscription_config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_source: Option<String>,
    pub input: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Raw secret handed to the destination.
    pub secret: Secret,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationCompleted {
    pub invocation_id: InvocationId,
    pub trigger_id: TriggerId,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub output: Map<String, Value>,
    #[serde(default)]
    pub test: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationFailed {
    pub invocation_id: InvocationId,
    pub trigger_id: TriggerId,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub reason: String,
    #[serde(default)]
    pub test: bool,
}

/// Starts an internal workflow with the invocation input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWorkflow {
    pub workflow_id: String,
    pub input: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EtsEvent {
    TriggerInvoked(TriggerInvoked),
    InvocationCompleted(InvocationCompleted),
    InvocationFailed(InvocationFailed),
    TriggerWorkflow(TriggerWorkflow),
}

impl EtsEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TriggerInvoked(_) => TRIGGER_TOPIC,
            Self::InvocationCompleted(_) | Self::InvocationFailed(_) => TRIGGER_ACK_TOPIC,
            Self::TriggerWorkflow(_) => WORKFLOW_TOPIC,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TriggerInvoked(_) => "TriggerInvokedEvent",
            Self::InvocationCompleted(e) if e.test => "InvocationCompletedTestEvent",
            Self::InvocationCompleted(_) => "InvocationCompletedEvent",
            Self::InvocationFailed(e) if e.test => "InvocationFailedTestEvent",
            Self::InvocationFailed(_) => "InvocationFailedEvent",
            Self::TriggerWorkflow(_) => "TriggerWorkflowEvent",
        }
    }

    /// Invocation the event belongs to, if any.
    pub fn invocation_id(&self) -> Option<InvocationId> {
        match self {
            Self::TriggerInvoked(e) => Some(e.invocation_id),
            Self::InvocationCompleted(e) => Some(e.invocation_id),
            Self::InvocationFailed(e) => Some(e.invocation_id),
            Self::TriggerWorkflow(_) => None,
        }
    }

    /// Wrap for publishing with topic and type derived from the payload.
    pub fn into_envelope(
        self,
        tenant_id: TenantId,
        request_id: Option<&str>,
        headers: BTreeMap<String, String>,
    ) -> EtsEventEnvelope {
        let topic = self.topic();
        let event_type = self.event_type();
        let envelope = EventEnvelope::new(tenant_id, topic, event_type, self).with_headers(headers);
        match request_id {
            Some(id) => envelope.with_request_id(id),
            None => envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_takes_topic_and_type_from_payload() {
        let event = EtsEvent::TriggerWorkflow(TriggerWorkflow {
            workflow_id: "wf-1".into(),
            input: Map::new(),
        });
        let env = event.into_envelope(TenantId::new("dev:acme").unwrap(), Some("req-1"), BTreeMap::new());

        assert_eq!(env.topic(), WORKFLOW_TOPIC);
        assert_eq!(env.event_type(), "TriggerWorkflowEvent");
        assert_eq!(env.request_id(), Some("req-1"));
    }

    #[test]
    fn failures_are_acks() {
        let failed = EtsEvent::InvocationFailed(InvocationFailed {
            invocation_id: InvocationId::new(),
            trigger_id: TriggerId::new("idn:t1").unwrap(),
            context: Map::new(),
            reason: "invocation timed out".into(),
            test: false,
        });
        assert_eq!(failed.topic(), TRIGGER_ACK_TOPIC);
        assert_eq!(failed.event_type(), "InvocationFailedEvent");

        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["kind"], json!("InvocationFailed"));
        assert_eq!(json["data"]["reason"], json!("invocation timed out"));
    }
}
