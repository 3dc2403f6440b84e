use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info};

use ets_core::{EtsError, InvocationId, SubscriptionId, TenantId};
use ets_invocations::CompleteInvocationInput;
use ets_subscriptions::{InlineConfig, view};

use super::{INVOCATION_COMPLETED_METRIC, INVOCATION_DURATION_METRIC, TriggerService, destination_name};

/// Answer to an outstanding request/response invocation.
///
/// `subscription_id` is set when an inline subscription answers; its stored
/// config then replaces `output` and `error`.
#[derive(Debug, Clone, Default)]
pub struct CompleteInvocation {
    pub request_id: Option<String>,
    pub invocation_id: InvocationId,
    pub secret: String,
    pub output: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub subscription_id: Option<SubscriptionId>,
}

impl TriggerService {
    pub fn complete_invocation(
        &self,
        tenant_id: &TenantId,
        cmd: CompleteInvocation,
    ) -> Result<(), EtsError> {
        let invocation = self
            .invocations
            .find_by_id(cmd.invocation_id)?
            .filter(|i| &i.tenant_id == tenant_id)
            .ok_or_else(|| EtsError::not_found("invocation", cmd.invocation_id))?;

        if !self.hasher.matches(&invocation.secret, &cmd.secret) {
            return Err(EtsError::unauthorized(format!(
                "secret for invocation with id: {} doesn't match",
                cmd.invocation_id
            )));
        }

        let (output, error) = match cmd.subscription_id {
            None => (cmd.output, cmd.error),
            Some(id) => {
                let subscription = self
                    .subscriptions
                    .find_by_id(tenant_id, id)?
                    .ok_or_else(|| EtsError::not_found("subscription", id))?;
                let inline: InlineConfig = view(&subscription.config, "inline")?;
                (inline.output, inline.error)
            }
        };

        let trigger = self
            .catalog
            .find_by_id(&invocation.trigger_id)
            .ok_or_else(|| EtsError::not_found("trigger", &invocation.trigger_id))?;
        let result = self.engine.check_output(&trigger, &invocation, output, error);

        // Whoever removes the invocation owns its terminal event.
        if !self.invocations.delete(invocation.id)? {
            return Err(EtsError::not_found("invocation", cmd.invocation_id));
        }

        let now = Utc::now();
        let elapsed = invocation.elapsed(now);
        let destination = destination_name(tenant_id, &invocation.trigger_id);
        let (event, outcome) = match &result {
            CompleteInvocationInput {
                output: Some(output),
                error: None,
            } => {
                self.breakers.on_success(&destination, elapsed);
                info!(
                    invocation_id = %invocation.id,
                    trigger_id = %invocation.trigger_id,
                    "trigger invocation completion succeeded"
                );
                (invocation.completed_event(output.clone(), cmd.request_id.clone()), "succeeded")
            }
            _ => {
                let reason = result.error.clone().unwrap_or_default();
                self.breakers.on_error(&destination, elapsed);
                error!(
                    invocation_id = %invocation.id,
                    trigger_id = %invocation.trigger_id,
                    reason = %reason,
                    "trigger invocation completion failed"
                );
                (invocation.failed_event(reason), "failed")
            }
        };

        self.publisher.publish(event.into_envelope(
            tenant_id.clone(),
            cmd.request_id.as_deref(),
            BTreeMap::new(),
        ))?;

        let labels = [
            ("trigger_id", invocation.trigger_id.as_str()),
            ("outcome", outcome),
        ];
        self.metrics.increment(INVOCATION_COMPLETED_METRIC, &labels);
        self.metrics.record_duration(INVOCATION_DURATION_METRIC, &labels, elapsed);
        Ok(())
    }
}
