//! Delivery seam: hands a built invocation payload to its destination.
//!
//! The service builds a [`DeliveryRequest`] per subscription type and calls
//! [`Deliverer::deliver`]; it never blocks on the remote result beyond the
//! transport call itself. Workflow subscriptions do not go through here,
//! they are started by publishing a `TriggerWorkflow` event.

#[cfg(feature = "http")]
pub mod http;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{Map, Value};

use ets_core::{InvocationId, SubscriptionId, TenantId, TriggerId};
use ets_subscriptions::ResponseMode;

#[cfg(feature = "http")]
pub use http::HttpDeliverer;

/// Where a payload goes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DeliveryTarget {
    /// POST the payload to a tenant endpoint.
    Http {
        url: String,
        headers: BTreeMap<String, String>,
        response_mode: ResponseMode,
    },
    /// Run a script with the payload as its input; the code is base64.
    Script {
        script_code: String,
        headers: BTreeMap<String, String>,
        response_mode: ResponseMode,
    },
    /// Put a partner event on the tenant's EventBridge bus.
    EventBridge {
        aws_account: String,
        aws_region: String,
        partner_event_source_name: Option<String>,
    },
}

impl DeliveryTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Script { .. } => "script",
            Self::EventBridge { .. } => "eventBridge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub invocation_id: InvocationId,
    pub tenant_id: TenantId,
    pub trigger_id: TriggerId,
    pub subscription_id: SubscriptionId,
    pub target: DeliveryTarget,
    pub payload: Map<String, Value>,
}

/// What the destination said, when it answered in-line.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Accepted; any answer arrives through the callback.
    Accepted,
    /// A sync destination answered in the response body.
    Responded(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("destination answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unsupported delivery target: {0}")]
    Unsupported(String),
}

pub trait Deliverer: Send + Sync {
    fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError>;
}

impl<D> Deliverer for Arc<D>
where
    D: Deliverer + ?Sized,
{
    fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        (**self).deliver(request)
    }
}

/// Keeps every request and answers with a scripted result. For tests and
/// local runs without outbound network access.
#[derive(Debug, Default)]
pub struct RecordingDeliverer {
    requests: Mutex<Vec<DeliveryRequest>>,
    failure: Mutex<Option<DeliveryError>>,
    response: Mutex<Option<Map<String, Value>>>,
}

impl RecordingDeliverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every following delivery with `err`; `None` restores success.
    pub fn fail_with(&self, err: Option<DeliveryError>) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = err;
        }
    }

    /// Answer sync deliveries in-line with `output`.
    pub fn respond_with(&self, output: Option<Map<String, Value>>) {
        if let Ok(mut slot) = self.response.lock() {
            *slot = output;
        }
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Deliverer for RecordingDeliverer {
    fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(err) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(err);
        }
        let sync = matches!(
            request.target,
            DeliveryTarget::Http { response_mode: ResponseMode::Sync, .. }
                | DeliveryTarget::Script { response_mode: ResponseMode::Sync, .. }
        );
        match self.response.lock().ok().and_then(|r| r.clone()) {
            Some(output) if sync => Ok(DeliveryOutcome::Responded(output)),
            _ => Ok(DeliveryOutcome::Accepted),
        }
    }
}
