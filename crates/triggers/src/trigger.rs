use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::{TriggerId, TriggerName};
use ets_schema::TriggerSchema;

/// Deadline applied when neither the subscription nor the caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// The destination answers through the callback.
    RequestResponse,
    /// Nothing is expected back.
    FireAndForget,
}

impl TriggerType {
    /// Form used in delivery metadata (`requestResponse`, `fireAndForget`).
    pub fn camel_case(&self) -> &'static str {
        match self {
            Self::RequestResponse => "requestResponse",
            Self::FireAndForget => "fireAndForget",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::FireAndForget => "FIRE_AND_FORGET",
        }
    }
}

impl core::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUEST_RESPONSE" => Ok(Self::RequestResponse),
            "FIRE_AND_FORGET" => Ok(Self::FireAndForget),
            other => Err(format!("unknown trigger type '{other}'")),
        }
    }
}

/// Domain event stream a trigger listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub topic: String,
    pub event_type: String,
}

impl EventSource {
    pub fn new(topic: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event_type: event_type.into(),
        }
    }

    /// Case-insensitive lookup key, `TOPIC#EVENT_TYPE`.
    pub fn key(&self) -> String {
        Self::key_for(&self.topic, &self.event_type)
    }

    pub fn key_for(topic: &str, event_type: &str) -> String {
        format!("{topic}#{event_type}").to_uppercase()
    }
}

/// A well-known extensibility point.
#[derive(Debug, Clone)]
pub struct Trigger {
    id: TriggerId,
    name: TriggerName,
    description: Option<String>,
    trigger_type: TriggerType,
    timeout: Duration,
    input_schema: TriggerSchema,
    output_schema: Option<TriggerSchema>,
    event_sources: Vec<EventSource>,
    example_input: Map<String, Value>,
    example_output: Option<Map<String, Value>>,
}

impl Trigger {
    pub fn new(
        id: TriggerId,
        name: TriggerName,
        trigger_type: TriggerType,
        input_schema: TriggerSchema,
        example_input: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            name,
            description: None,
            trigger_type,
            timeout: DEFAULT_TIMEOUT,
            input_schema,
            output_schema: None,
            event_sources: Vec::new(),
            example_input,
            example_output: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output(mut self, schema: TriggerSchema, example: Map<String, Value>) -> Self {
        self.output_schema = Some(schema);
        self.example_output = Some(example);
        self
    }

    pub fn with_event_sources(mut self, sources: Vec<EventSource>) -> Self {
        self.event_sources = sources;
        self
    }

    pub fn id(&self) -> &TriggerId {
        &self.id
    }

    pub fn name(&self) -> &TriggerName {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    pub fn is_fire_and_forget(&self) -> bool {
        self.trigger_type == TriggerType::FireAndForget
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn input_schema(&self) -> &TriggerSchema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> Option<&TriggerSchema> {
        self.output_schema.as_ref()
    }

    pub fn event_sources(&self) -> &[EventSource] {
        &self.event_sources
    }

    pub fn example_input(&self) -> &Map<String, Value> {
        &self.example_input
    }

    pub fn example_output(&self) -> Option<&Map<String, Value>> {
        self.example_output.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_source_key_is_case_insensitive() {
        let es = EventSource::new("identity", "IdentityCreated");
        assert_eq!(es.key(), "IDENTITY#IDENTITYCREATED");
        assert_eq!(es.key(), EventSource::key_for("IDENTITY", "identitycreated"));
    }

    #[test]
    fn trigger_type_names() {
        assert_eq!(TriggerType::RequestResponse.camel_case(), "requestResponse");
        assert_eq!("FIRE_AND_FORGET".parse::<TriggerType>().unwrap(), TriggerType::FireAndForget);
        assert!("SOMETIMES".parse::<TriggerType>().is_err());
        assert_eq!(
            serde_json::to_string(&TriggerType::FireAndForget).unwrap(),
            "\"FIRE_AND_FORGET\""
        );
    }
}
