//! Trigger service: the orchestration around the pure invocation engine.
//!
//! ```text
//! domain event / API call
//!   -> invoke_trigger        validate, create, persist, publish TriggerInvoked
//!   -> (worker) dispatch     breaker check, build payload, deliver
//!   -> complete_invocation   callback or inline answer, publish outcome
//! ```
//!
//! Collaborators are injected as trait objects so the composition root can
//! pick in-memory or durable adapters.

mod complete;
mod dispatch;
mod invoke;
mod subscriptions;

use std::sync::Arc;

use ets_breaker::CircuitBreakerRegistry;
use ets_core::{InvocationId, SecretHasher, TenantId, TriggerId};
use ets_invocations::InvocationEngine;
use ets_observability::{MetricsRegistry, metrics};
use ets_subscriptions::SubscriptionLimits;
use ets_triggers::TriggerCatalog;

use crate::delivery::Deliverer;
use crate::publisher::EventPublisher;
use crate::store::{InvocationRepo, SubscriptionStore};

pub use complete::CompleteInvocation;
pub use invoke::{InvokeTestTrigger, InvokeTrigger};
pub use subscriptions::SubscriptionDraft;

pub const INVOCATION_STARTED_METRIC: &str = "ets_invocation_started";
pub const INVOCATION_COMPLETED_METRIC: &str = "ets_invocation_completed";
pub const INVOCATION_DURATION_METRIC: &str = "ets_invocation_duration";
pub const DISPATCH_METRIC: &str = "ets_invocation_dispatched";

/// Request id header forwarded to destinations.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Breakers are keyed per tenant and trigger.
pub fn destination_name(tenant_id: &TenantId, trigger_id: &TriggerId) -> String {
    format!("{tenant_id}_{trigger_id}")
}

pub struct TriggerService {
    catalog: Arc<TriggerCatalog>,
    subscriptions: Arc<dyn SubscriptionStore>,
    invocations: Arc<dyn InvocationRepo>,
    publisher: Arc<dyn EventPublisher>,
    deliverer: Arc<dyn Deliverer>,
    breakers: Arc<CircuitBreakerRegistry>,
    engine: InvocationEngine,
    hasher: SecretHasher,
    limits: SubscriptionLimits,
    callback_base_url: String,
    partner_event_source_prefix: String,
    metrics: &'static MetricsRegistry,
}

impl core::fmt::Debug for TriggerService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TriggerService")
            .field("triggers", &self.catalog.len())
            .field("limits", &self.limits)
            .field("callback_base_url", &self.callback_base_url)
            .finish_non_exhaustive()
    }
}

impl TriggerService {
    pub fn new(
        catalog: Arc<TriggerCatalog>,
        subscriptions: Arc<dyn SubscriptionStore>,
        invocations: Arc<dyn InvocationRepo>,
        publisher: Arc<dyn EventPublisher>,
        deliverer: Arc<dyn Deliverer>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            catalog,
            subscriptions,
            invocations,
            publisher,
            deliverer,
            breakers,
            engine: InvocationEngine::default(),
            hasher: SecretHasher::new("ets"),
            limits: SubscriptionLimits::default(),
            callback_base_url: "http://localhost:8080".to_string(),
            partner_event_source_prefix: "aws.partner/ets".to_string(),
            metrics: metrics::global(),
        }
    }

    pub fn with_engine(mut self, engine: InvocationEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_hasher(mut self, hasher: SecretHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_limits(mut self, limits: SubscriptionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_callback_base_url(mut self, url: impl Into<String>) -> Self {
        self.callback_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_partner_event_source_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.partner_event_source_prefix = prefix.into();
        self
    }

    pub fn with_metrics(mut self, metrics: &'static MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn catalog(&self) -> &TriggerCatalog {
        &self.catalog
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// URL the destination posts its answer to.
    pub fn callback_url(&self, invocation_id: InvocationId) -> String {
        format!(
            "{}/trigger-invocations/{invocation_id}/complete",
            self.callback_base_url
        )
    }
}
