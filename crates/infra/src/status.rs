//! Records invocation start and completion into the status store.
//!
//! Start is append-only and completion happens at most once; duplicates and
//! late completions are logged and dropped so event redelivery is harmless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Map;
use tracing::{debug, info, warn};

use ets_core::{EtsError, InvocationId, TenantId};
use ets_invocations::{
    CompleteInvocationInput, InvocationStatus, StartInvocationInput, TriggerInvoked,
};
use ets_observability::{MetricsRegistry, metrics};
use ets_subscriptions::{InlineConfig, SubscriptionType, view};
use ets_triggers::TriggerType;

use crate::store::{CompleteOutcome, StatusQuery, StatusStore};

pub const STATUS_START_METRIC: &str = "ets_invocation_status_start";
pub const STATUS_COMPLETE_METRIC: &str = "ets_invocation_status_complete";

pub struct InvocationStatusTracker {
    store: Arc<dyn StatusStore>,
    metrics: &'static MetricsRegistry,
}

impl core::fmt::Debug for InvocationStatusTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InvocationStatusTracker").finish_non_exhaustive()
    }
}

impl InvocationStatusTracker {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            metrics: metrics::global(),
        }
    }

    pub fn with_metrics(mut self, metrics: &'static MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn start(&self, status: InvocationStatus) -> Result<(), EtsError> {
        let id = status.id;
        let tenant = status.tenant_id.clone();
        let completed = status.is_completed();

        if self.store.start(status)? {
            self.metrics.increment(
                STATUS_START_METRIC,
                &[("org", tenant.org()), ("pod", tenant.pod())],
            );
            debug!(invocation_id = %id, tenant_id = %tenant, completed, "invocation status started");
        } else {
            warn!(invocation_id = %id, tenant_id = %tenant, "duplicate invocation status ignored");
        }
        Ok(())
    }

    pub fn complete(
        &self,
        tenant_id: &TenantId,
        id: InvocationId,
        input: CompleteInvocationInput,
    ) -> Result<(), EtsError> {
        let failed = input.is_error();
        match self.store.complete(tenant_id, id, Utc::now(), input)? {
            CompleteOutcome::Completed => {
                self.metrics.increment(
                    STATUS_COMPLETE_METRIC,
                    &[
                        ("org", tenant_id.org()),
                        ("pod", tenant_id.pod()),
                        ("failed", if failed { "true" } else { "false" }),
                    ],
                );
                info!(invocation_id = %id, tenant_id = %tenant_id, failed, "invocation status completed");
            }
            CompleteOutcome::AlreadyCompleted => {
                debug!(invocation_id = %id, tenant_id = %tenant_id, "invocation status already completed");
            }
            CompleteOutcome::Missing => {
                warn!(invocation_id = %id, tenant_id = %tenant_id, "no invocation status to complete");
            }
        }
        Ok(())
    }

    /// Build and store the started status for a freshly invoked trigger.
    ///
    /// Fire-and-forget invocations are completed on the spot with an empty
    /// output; inline ones with the subscription's canned answer.
    pub fn start_from_event(&self, tenant_id: &TenantId, event: &TriggerInvoked) -> Result<(), EtsError> {
        let now = Utc::now();
        let (completed, complete_input) = if event.trigger_type == TriggerType::FireAndForget {
            (Some(now), Some(CompleteInvocationInput::succeeded(Map::new())))
        } else if event.subscription_type == SubscriptionType::Inline {
            let inline: InlineConfig = view(&event.subscription_config, "inline")?;
            let input = CompleteInvocationInput {
                output: inline.output,
                error: inline.error,
            };
            (Some(now), Some(input))
        } else {
            (None, None)
        };

        self.start(InvocationStatus {
            id: event.invocation_id,
            tenant_id: tenant_id.clone(),
            trigger_id: event.trigger_id.clone(),
            subscription_id: event.subscription_id,
            subscription_name: event.subscription_name.clone(),
            subscription_type: event.subscription_type,
            invocation_type: event.invocation_type,
            created: event.created,
            deadline: event.deadline,
            completed,
            start_invocation_input: StartInvocationInput {
                trigger_id: Some(event.trigger_id.clone()),
                input: event.input.clone(),
                context: event.context.clone(),
            },
            complete_invocation_input: complete_input,
        })
    }

    pub fn list(&self, tenant_id: &TenantId, query: &StatusQuery) -> Result<Vec<InvocationStatus>, EtsError> {
        Ok(self.store.find_by_tenant(tenant_id, query)?)
    }

    pub fn get(&self, tenant_id: &TenantId, id: InvocationId) -> Result<InvocationStatus, EtsError> {
        self.store
            .find_by_id(tenant_id, id)?
            .ok_or_else(|| EtsError::not_found("invocation status", id))
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, EtsError> {
        let purged = self.store.purge_expired(now)?;
        if purged > 0 {
            info!(purged, "purged expired invocation status records");
        }
        Ok(purged)
    }
}
