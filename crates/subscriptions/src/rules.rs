//! Management rules applied when subscriptions are created or updated.

use ets_core::EtsError;

use crate::config::{EventBridgeConfig, view};
use crate::filter::Filter;
use crate::subscription::{Subscription, SubscriptionType};

/// Current subscription counts for the tenant being written to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCounts {
    /// Subscriptions of the tenant on the same trigger.
    pub for_trigger: usize,
    /// SCRIPT subscriptions of the tenant, any trigger.
    pub scripts: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SubscriptionLimits {
    /// Per tenant+trigger cap for fire-and-forget triggers.
    pub subscription_limit: usize,
    pub script_subscription_limit: usize,
    pub script_byte_size_limit: usize,
}

impl Default for SubscriptionLimits {
    fn default() -> Self {
        Self {
            subscription_limit: 50,
            script_subscription_limit: 10,
            script_byte_size_limit: 1_000_000,
        }
    }
}

impl SubscriptionLimits {
    /// Checks for a new subscription. Request/response triggers take a
    /// single subscription per tenant; fire-and-forget ones up to the limit.
    pub fn check_create(
        &self,
        fire_and_forget: bool,
        new: &Subscription,
        counts: SubscriptionCounts,
    ) -> Result<(), EtsError> {
        if fire_and_forget {
            if counts.for_trigger >= self.subscription_limit {
                return Err(EtsError::limit(format!(
                    "subscription limit of {} reached",
                    self.subscription_limit
                )));
            }
        } else if counts.for_trigger > 0 {
            return Err(EtsError::conflict(format!(
                "duplicated subscription for trigger {}",
                new.trigger_id
            )));
        }

        if new.subscription_type == SubscriptionType::Script
            && counts.scripts >= self.script_subscription_limit
        {
            return Err(EtsError::limit(format!(
                "script subscription limit of {} reached",
                self.script_subscription_limit
            )));
        }

        self.check_common(new)
    }

    /// Checks for replacing `existing` with `updated`.
    pub fn check_update(&self, existing: &Subscription, updated: &Subscription) -> Result<(), EtsError> {
        let eventbridge = SubscriptionType::EventBridge;
        if existing.subscription_type != updated.subscription_type
            && (existing.subscription_type == eventbridge || updated.subscription_type == eventbridge)
        {
            return Err(EtsError::conflict("type cannot be changed to or from EVENTBRIDGE"));
        }

        if updated.subscription_type == eventbridge {
            let before: EventBridgeConfig = view(&existing.config, "eventBridge")?;
            let after: EventBridgeConfig = view(&updated.config, "eventBridge")?;
            if before.aws_region != after.aws_region {
                return Err(EtsError::conflict("awsRegion cannot be changed"));
            }
            if before.aws_account != after.aws_account {
                return Err(EtsError::conflict("awsAccount cannot be changed"));
            }
        }

        self.check_common(updated)
    }

    fn check_common(&self, s: &Subscription) -> Result<(), EtsError> {
        if s.name.trim().is_empty() {
            return Err(EtsError::bad_request("name is required"));
        }

        if s.subscription_type == SubscriptionType::Script {
            let source = s
                .script_source
                .as_deref()
                .filter(|src| !src.is_empty())
                .ok_or_else(|| EtsError::bad_request("script source is required"))?;
            if source.len() > self.script_byte_size_limit {
                return Err(EtsError::limit(format!(
                    "script source exceeds {} bytes",
                    self.script_byte_size_limit
                )));
            }
        }

        if let Some(expr) = s.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            Filter::parse(expr).map_err(|e| EtsError::bad_request(e.to_string()))?;
        }
        Ok(())
    }
}
