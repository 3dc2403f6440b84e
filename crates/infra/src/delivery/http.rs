//! Blocking HTTP deliverer.
//!
//! HTTP subscriptions are posted straight to the tenant URL. Scripts are
//! posted to a script runner when one is configured. EventBridge needs a
//! cloud client this deliverer does not carry and is reported unsupported.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use ets_subscriptions::ResponseMode;

use super::{Deliverer, DeliveryError, DeliveryOutcome, DeliveryRequest, DeliveryTarget};

#[derive(Debug, Clone)]
pub struct HttpDeliverer {
    client: reqwest::blocking::Client,
    script_runner_url: Option<String>,
}

impl HttpDeliverer {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            script_runner_url: None,
        })
    }

    pub fn with_script_runner(mut self, url: impl Into<String>) -> Self {
        self.script_runner_url = Some(url.into());
        self
    }

    fn post(
        &self,
        url: &str,
        headers: &std::collections::BTreeMap<String, String>,
        body: &Value,
        response_mode: ResponseMode,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let mut req = self.client.post(url).json(body);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        if response_mode != ResponseMode::Sync {
            return Ok(DeliveryOutcome::Accepted);
        }
        // Sync destinations answer in the body; an empty body means the
        // answer comes later through the callback.
        let text = resp
            .text()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(DeliveryOutcome::Accepted);
        }
        match serde_json::from_str::<Map<String, Value>>(&text) {
            Ok(output) => Ok(DeliveryOutcome::Responded(output)),
            Err(e) => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: format!("response is not a JSON object: {e}"),
            }),
        }
    }
}

impl Deliverer for HttpDeliverer {
    fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        debug!(
            invocation_id = %request.invocation_id,
            target = request.target.kind(),
            "delivering invocation"
        );
        match &request.target {
            DeliveryTarget::Http {
                url,
                headers,
                response_mode,
            } => self.post(url, headers, &Value::Object(request.payload.clone()), *response_mode),
            DeliveryTarget::Script {
                headers,
                response_mode,
                ..
            } => {
                let url = self
                    .script_runner_url
                    .as_deref()
                    .ok_or_else(|| DeliveryError::Unsupported("no script runner configured".into()))?;
                let body = serde_json::to_value(request)
                    .map_err(|e| DeliveryError::Transport(e.to_string()))?;
                self.post(url, headers, &body, *response_mode)
            }
            DeliveryTarget::EventBridge { .. } => Err(DeliveryError::Unsupported(
                "EventBridge delivery needs a cloud client".into(),
            )),
        }
    }
}
