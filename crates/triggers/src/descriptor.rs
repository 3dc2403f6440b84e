//! JSON trigger descriptors and their conversion into [`Trigger`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::{TriggerId, TriggerName};
use ets_schema::{JsonSchema, TriggerSchema};

use crate::catalog::CatalogError;
use crate::trigger::{EventSource, Trigger, TriggerType};

/// One trigger as authored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub event_sources: Option<Vec<EventSource>>,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub example_input: Map<String, Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub example_output: Option<Map<String, Value>>,
    /// Overrides the 5 minute default deadline.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

/// A repository file holding many descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerDescriptors {
    #[serde(default)]
    pub triggers: Vec<TriggerDescriptor>,
}

impl TryFrom<TriggerDescriptor> for Trigger {
    type Error = CatalogError;

    fn try_from(d: TriggerDescriptor) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| CatalogError::InvalidDescriptor {
            id: d.id.clone(),
            reason: reason.to_string(),
        };

        let raw_type = d
            .trigger_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("trigger must have a type"))?;
        let name = d
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("trigger must have a name"))?;

        let trigger_type: TriggerType = raw_type.parse().map_err(|e: String| invalid(&e))?;
        let id = TriggerId::new(d.id.clone()).map_err(|e| invalid(&e.to_string()))?;
        let name = TriggerName::new(name).map_err(|e| invalid(&e.to_string()))?;

        let input_schema = compile(&d.id, "input", d.input_schema.clone())?;
        input_schema
            .validate_only(&d.example_input)
            .map_err(|e| invalid(&format!("example input does not match input schema: {e}")))?;

        let mut trigger = Trigger::new(id, name, trigger_type, input_schema, d.example_input.clone());

        match trigger_type {
            TriggerType::RequestResponse => {
                let schema = d
                    .output_schema
                    .clone()
                    .ok_or_else(|| invalid("output schema is required"))?;
                let example = d
                    .example_output
                    .clone()
                    .ok_or_else(|| invalid("example output is required"))?;

                let output_schema = compile(&d.id, "output", schema)?;
                output_schema.validate_only(&example).map_err(|e| {
                    invalid(&format!("example output does not match output schema: {e}"))
                })?;
                trigger = trigger.with_output(output_schema, example);
            }
            TriggerType::FireAndForget => {
                if d.output_schema.is_some() || d.example_output.is_some() {
                    return Err(invalid(
                        "fire and forget trigger should not have an output schema",
                    ));
                }
            }
        }

        if let Some(sources) = d.event_sources.clone() {
            if trigger_type == TriggerType::RequestResponse {
                return Err(invalid("request response trigger cannot have event sources"));
            }
            if sources
                .iter()
                .any(|es| es.topic.trim().is_empty() || es.event_type.trim().is_empty())
            {
                return Err(invalid("event source requires a topic and an event type"));
            }
            trigger = trigger.with_event_sources(sources);
        }

        if let Some(description) = d.description {
            trigger = trigger.with_description(description);
        }
        if let Some(minutes) = d.timeout_minutes {
            trigger = trigger.with_timeout(Duration::from_secs(minutes * 60));
        }

        Ok(trigger)
    }
}

fn compile(trigger_id: &str, side: &str, schema: Value) -> Result<TriggerSchema, CatalogError> {
    JsonSchema::new(trigger_id, schema)
        .map(TriggerSchema::new)
        .map_err(|e| CatalogError::InvalidDescriptor {
            id: trigger_id.to_string(),
            reason: format!("{side} schema: {e}"),
        })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    use super::*;

    pub fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    pub fn request_response(id: &str) -> TriggerDescriptor {
        TriggerDescriptor {
            id: id.to_string(),
            name: Some("Access Request Pre Approval".into()),
            trigger_type: Some("REQUEST_RESPONSE".into()),
            description: Some("decide on an access request".into()),
            event_sources: None,
            input_schema: json!({
                "type": "object",
                "required": ["accessRequestId"],
                "properties": {
                    "accessRequestId": { "type": "string" },
                    "requestedBy": { "type": "object", "properties": { "id": { "type": "string" } } }
                }
            }),
            example_input: obj(json!({ "accessRequestId": "ar-1", "requestedBy": { "id": "u1" } })),
            output_schema: Some(json!({
                "type": "object",
                "required": ["approved"],
                "properties": { "approved": { "type": "boolean" }, "comment": { "type": "string" } }
            })),
            example_output: Some(obj(json!({ "approved": true }))),
            timeout_minutes: None,
        }
    }

    pub fn fire_and_forget(id: &str, topic: &str, event_type: &str) -> TriggerDescriptor {
        TriggerDescriptor {
            id: id.to_string(),
            name: Some("Identity Created".into()),
            trigger_type: Some("FIRE_AND_FORGET".into()),
            description: None,
            event_sources: Some(vec![EventSource::new(topic, event_type)]),
            input_schema: json!({
                "type": "object",
                "required": ["identity"],
                "properties": {
                    "identity": { "type": "object", "properties": { "id": { "type": "string" } } }
                }
            }),
            example_input: obj(json!({ "identity": { "id": "2c91" } })),
            output_schema: None,
            example_output: None,
            timeout_minutes: None,
        }
    }
}
