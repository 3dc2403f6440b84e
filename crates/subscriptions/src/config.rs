//! Typed views over a subscription's free-form config map.
//!
//! The map is what gets stored and returned by the management API; these
//! views are what dispatch and validation work with.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ets_core::EtsError;

use crate::subscription::SubscriptionType;

/// How the destination answers a request/response invocation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseMode {
    /// Answer in the HTTP response; no callback.
    #[default]
    Sync,
    /// Answer later through the callback URL.
    Async,
    /// Destination decides per call.
    Dynamic,
}

impl ResponseMode {
    pub fn camel_case(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpAuth {
    #[default]
    NoAuth,
    BasicAuth,
    BearerToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthConfig {
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerTokenAuthConfig {
    pub bearer_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub http_dispatch_mode: ResponseMode,
    #[serde(default)]
    pub http_authentication_type: HttpAuth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_config: Option<BasicAuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_auth_config: Option<BearerTokenAuthConfig>,
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), EtsError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(EtsError::bad_request(format!("invalid url '{}'", self.url)));
        }
        match self.http_authentication_type {
            HttpAuth::BasicAuth => match &self.basic_auth_config {
                Some(c) if !c.user_name.is_empty() && !c.password.is_empty() => Ok(()),
                _ => Err(EtsError::bad_request("basicAuthConfig requires userName and password")),
            },
            HttpAuth::BearerToken => match &self.bearer_token_auth_config {
                Some(c) if !c.bearer_token.is_empty() => Ok(()),
                _ => Err(EtsError::bad_request("bearerTokenAuthConfig requires bearerToken")),
            },
            HttpAuth::NoAuth => Ok(()),
        }
    }

    /// `Authorization` header value for the configured scheme, if any.
    pub fn authorization_header(&self) -> Option<String> {
        match self.http_authentication_type {
            HttpAuth::BasicAuth => self.basic_auth_config.as_ref().map(|c| {
                format!(
                    "Basic {}",
                    STANDARD.encode(format!("{}:{}", c.user_name, c.password))
                )
            }),
            HttpAuth::BearerToken => self
                .bearer_token_auth_config
                .as_ref()
                .map(|c| format!("Bearer {}", c.bearer_token)),
            HttpAuth::NoAuth => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptLanguage {
    Javascript,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub language: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
}

impl ScriptConfig {
    pub fn language(&self) -> Result<ScriptLanguage, EtsError> {
        match self.language.as_str() {
            "JAVASCRIPT" => Ok(ScriptLanguage::Javascript),
            other => Err(EtsError::unsupported(format!("unsupported script language: {other}"))),
        }
    }
}

/// Canned answer of an inline subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineConfig {
    #[serde(default)]
    pub output: Option<Map<String, Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBridgeConfig {
    pub aws_account: String,
    pub aws_region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_partner_event_source_name: Option<String>,
}

impl EventBridgeConfig {
    pub fn validate(&self) -> Result<(), EtsError> {
        if self.aws_account.len() != 12 || !self.aws_account.chars().all(|c| c.is_ascii_digit()) {
            return Err(EtsError::bad_request(format!(
                "invalid AWS account '{}'",
                self.aws_account
            )));
        }
        if self.aws_region.trim().is_empty() {
            return Err(EtsError::bad_request("awsRegion is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    pub workflow_id: String,
}

/// Read a typed view out of a config map.
pub fn view<T: DeserializeOwned>(config: &Map<String, Value>, kind: &str) -> Result<T, EtsError> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| EtsError::bad_request(format!("invalid {kind} config: {e}")))
}

fn to_map<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Validate a config for `subscription_type` and return its canonical map.
///
/// Inline configs default to an empty output; the output itself is checked
/// against the trigger's schema by the caller.
pub fn normalize(
    subscription_type: SubscriptionType,
    config: &Map<String, Value>,
) -> Result<Map<String, Value>, EtsError> {
    match subscription_type {
        SubscriptionType::Http => {
            let http: HttpConfig = view(config, "http")?;
            http.validate()?;
            Ok(to_map(&http))
        }
        SubscriptionType::Inline => {
            let mut inline: InlineConfig = view(config, "inline")?;
            if inline.output.is_none() && inline.error.as_deref().is_none_or(str::is_empty) {
                inline.output = Some(Map::new());
            }
            Ok(to_map(&inline))
        }
        SubscriptionType::Script => {
            let script: ScriptConfig = view(config, "script")?;
            script.language()?;
            Ok(to_map(&script))
        }
        SubscriptionType::EventBridge => {
            let eb: EventBridgeConfig = view(config, "eventBridge")?;
            eb.validate()?;
            Ok(to_map(&eb))
        }
        SubscriptionType::Workflow => {
            let wf: WorkflowConfig = view(config, "workflow")?;
            if wf.workflow_id.trim().is_empty() {
                return Err(EtsError::bad_request("workflowId is required"));
            }
            Ok(to_map(&wf))
        }
    }
}
