use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::{SubscriptionId, TenantId, TriggerId};

use crate::filter::{Filter, FilterError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionType {
    Http,
    Inline,
    Script,
    #[serde(rename = "EVENTBRIDGE")]
    EventBridge,
    Workflow,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Inline => "INLINE",
            Self::Script => "SCRIPT",
            Self::EventBridge => "EVENTBRIDGE",
            Self::Workflow => "WORKFLOW",
        }
    }
}

impl core::fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SubscriptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Self::Http),
            "INLINE" => Ok(Self::Inline),
            "SCRIPT" => Ok(Self::Script),
            "EVENTBRIDGE" => Ok(Self::EventBridge),
            "WORKFLOW" => Ok(Self::Workflow),
            other => Err(format!("unknown subscription type '{other}'")),
        }
    }
}

/// A tenant's binding of a destination to a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub trigger_id: TriggerId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    /// Overrides the trigger timeout for invocations of this subscription.
    #[serde(default, with = "minutes")]
    pub response_deadline: Option<Duration>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default, skip_serializing)]
    pub script_source: Option<String>,
    pub enabled: bool,
    pub created: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        tenant_id: TenantId,
        trigger_id: TriggerId,
        subscription_type: SubscriptionType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            tenant_id,
            trigger_id,
            name: name.into(),
            description: None,
            subscription_type,
            response_deadline: None,
            config: Map::new(),
            filter: None,
            script_source: None,
            enabled: true,
            created: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: SubscriptionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_response_deadline(mut self, deadline: Duration) -> Self {
        self.response_deadline = Some(deadline);
        self
    }

    pub fn with_script_source(mut self, source: impl Into<String>) -> Self {
        self.script_source = Some(source.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_inline(&self) -> bool {
        self.subscription_type == SubscriptionType::Inline
    }

    /// Whether `input` passes this subscription's filter. No filter, or a
    /// blank one, accepts everything.
    pub fn accepts(&self, input: &Map<String, Value>) -> Result<bool, FilterError> {
        match self.filter.as_deref().map(str::trim) {
            None | Some("") => Ok(true),
            Some(expr) => Ok(Filter::parse(expr)?.matches(&Value::Object(input.clone()))),
        }
    }
}

/// Whole-minute (de)serialization for optional durations.
mod minutes {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_secs() / 60)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(|m| Duration::from_secs(m * 60)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_tenant() -> TenantId {
        TenantId::new("dev:acme").unwrap()
    }

    fn trigger() -> TriggerId {
        TriggerId::new("idn:identity-created").unwrap()
    }

    #[test]
    fn type_names_match_wire_form() {
        assert_eq!(
            serde_json::to_string(&SubscriptionType::EventBridge).unwrap(),
            "\"EVENTBRIDGE\""
        );
        assert_eq!("inline".parse::<SubscriptionType>().unwrap(), SubscriptionType::Inline);
        assert!("SMTP".parse::<SubscriptionType>().is_err());
    }

    #[test]
    fn missing_or_blank_filter_accepts_everything() {
        let input = json!({ "a": 1 }).as_object().cloned().unwrap();
        let sub = Subscription::new(test_tenant(), trigger(), SubscriptionType::Http, "s1");
        assert!(sub.accepts(&input).unwrap());
        assert!(sub.with_filter("  ").accepts(&input).unwrap());
    }

    #[test]
    fn filter_is_applied_to_input() {
        let sub = Subscription::new(test_tenant(), trigger(), SubscriptionType::Http, "s1")
            .with_filter("$[?($.identity.type == 'HUMAN')]");

        let human = json!({ "identity": { "type": "HUMAN" } }).as_object().cloned().unwrap();
        let bot = json!({ "identity": { "type": "BOT" } }).as_object().cloned().unwrap();
        assert!(sub.accepts(&human).unwrap());
        assert!(!sub.accepts(&bot).unwrap());
    }

    #[test]
    fn response_deadline_serializes_in_minutes() {
        let sub = Subscription::new(test_tenant(), trigger(), SubscriptionType::Http, "s1")
            .with_response_deadline(Duration::from_secs(600))
            .with_script_source("console.log(1)");

        let value = serde_json::to_value(&sub).unwrap();
        assert_eq!(value["responseDeadline"], json!(10));
        assert!(value.get("scriptSource").is_none());

        let back: Subscription = serde_json::from_value(value).unwrap();
        assert_eq!(back.response_deadline, Some(Duration::from_secs(600)));
    }
}
