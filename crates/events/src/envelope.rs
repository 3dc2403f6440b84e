use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ets_core::TenantId;

/// Envelope for an event travelling over the bus.
///
/// - `tenant_id` scopes the event; workers may filter on it.
/// - `topic` / `event_type` identify the stream and the payload kind.
/// - `headers` carry request metadata (request id, forwarded headers) that
///   must survive the hop to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,
    topic: String,
    event_type: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        tenant_id: TenantId,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            tenant_id,
            topic: topic.into(),
            event_type: event_type.into(),
            request_id: None,
            headers: BTreeMap::new(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-wrap the payload, keeping every piece of metadata.
    pub fn map<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            event_id: self.event_id,
            tenant_id: self.tenant_id,
            topic: self.topic,
            event_type: self.event_type,
            request_id: self.request_id,
            headers: self.headers,
            occurred_at: self.occurred_at,
            payload: f(self.payload),
        }
    }
}
