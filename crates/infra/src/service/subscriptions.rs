use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use ets_core::{EtsError, SubscriptionId, TenantId, TriggerId};
use ets_invocations::Invocation;
use ets_subscriptions::{
    Filter, InlineConfig, Subscription, SubscriptionCounts, SubscriptionQuery, SubscriptionType,
    normalize, view,
};
use ets_triggers::Trigger;

use super::TriggerService;

const AWS_PARTNER_EVENT_SOURCE_NAME: &str = "awsPartnerEventSourceName";

/// Body of a create or update request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDraft {
    pub trigger_id: TriggerId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    /// Minutes.
    #[serde(default)]
    pub response_deadline: Option<u64>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub script_source: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl SubscriptionDraft {
    pub fn new(trigger_id: TriggerId, subscription_type: SubscriptionType, name: impl Into<String>) -> Self {
        Self {
            trigger_id,
            name: name.into(),
            description: None,
            subscription_type,
            response_deadline: None,
            config: Map::new(),
            filter: None,
            script_source: None,
            enabled: true,
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    fn into_subscription(self, tenant_id: TenantId) -> Subscription {
        let mut s = Subscription::new(tenant_id, self.trigger_id, self.subscription_type, self.name);
        s.description = self.description;
        s.response_deadline = self.response_deadline.map(|m| Duration::from_secs(m * 60));
        s.config = self.config;
        s.filter = self.filter.filter(|f| !f.trim().is_empty());
        s.script_source = self.script_source;
        s.enabled = self.enabled;
        s
    }
}

impl TriggerService {
    /// Triggers the tenant can see.
    pub fn list_triggers(&self, tenant_id: &TenantId) -> Vec<Arc<Trigger>> {
        self.catalog.find_all_enabled(tenant_id)
    }

    pub fn subscribe(&self, tenant_id: &TenantId, draft: SubscriptionDraft) -> Result<Subscription, EtsError> {
        let trigger = self.enabled_trigger(tenant_id, &draft.trigger_id)?;

        let mut subscription = draft.into_subscription(tenant_id.clone());
        subscription.config = normalize(subscription.subscription_type, &subscription.config)?;
        self.check_inline_output(&trigger, &subscription)?;

        let counts = SubscriptionCounts {
            for_trigger: self
                .subscriptions
                .count_by_tenant_and_trigger(tenant_id, trigger.id())?,
            scripts: self
                .subscriptions
                .count_by_tenant_and_type(tenant_id, SubscriptionType::Script)?,
        };
        self.limits
            .check_create(trigger.is_fire_and_forget(), &subscription, counts)?;

        if subscription.subscription_type == SubscriptionType::EventBridge {
            let name = self.partner_event_source_name(&subscription);
            subscription
                .config
                .insert(AWS_PARTNER_EVENT_SOURCE_NAME.into(), Value::String(name));
        }

        self.subscriptions.insert(subscription.clone())?;
        info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            trigger_id = %subscription.trigger_id,
            subscription_type = subscription.subscription_type.as_str(),
            "subscription created"
        );
        Ok(subscription)
    }

    /// Replace a subscription. The trigger cannot change, nor can the type
    /// move to or from EVENTBRIDGE; an EVENTBRIDGE config is kept as created.
    pub fn update_subscription(
        &self,
        tenant_id: &TenantId,
        id: SubscriptionId,
        draft: SubscriptionDraft,
    ) -> Result<Subscription, EtsError> {
        let existing = self
            .subscriptions
            .find_by_id(tenant_id, id)?
            .filter(|s| s.trigger_id == draft.trigger_id)
            .ok_or_else(|| EtsError::not_found("subscription", id))?;
        let trigger = self.enabled_trigger(tenant_id, &draft.trigger_id)?;

        let mut updated = draft.into_subscription(tenant_id.clone()).with_id(id);
        updated.created = existing.created;
        updated.config = normalize(updated.subscription_type, &updated.config)?;
        self.limits.check_update(&existing, &updated)?;
        if updated.subscription_type == SubscriptionType::EventBridge {
            updated.config = existing.config.clone();
        }
        self.check_inline_output(&trigger, &updated)?;

        self.subscriptions.update(updated.clone())?;
        info!(tenant_id = %tenant_id, subscription_id = %id, "subscription updated");
        Ok(updated)
    }

    pub fn unsubscribe(&self, tenant_id: &TenantId, id: SubscriptionId) -> Result<(), EtsError> {
        if !self.subscriptions.delete(tenant_id, id)? {
            return Err(EtsError::not_found("subscription", id));
        }
        info!(tenant_id = %tenant_id, subscription_id = %id, "subscription deleted");
        Ok(())
    }

    pub fn get_subscription(&self, tenant_id: &TenantId, id: SubscriptionId) -> Result<Subscription, EtsError> {
        self.subscriptions
            .find_by_id(tenant_id, id)?
            .ok_or_else(|| EtsError::not_found("subscription", id))
    }

    pub fn list_subscriptions(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>, EtsError> {
        Ok(self.subscriptions.query(query)?)
    }

    /// Whether `expr` selects `input`. An unparseable expression is a bad
    /// request.
    pub fn validate_filter(&self, expr: &str, input: &Map<String, Value>) -> Result<bool, EtsError> {
        let filter = Filter::parse(expr).map_err(|e| EtsError::bad_request(e.to_string()))?;
        Ok(filter.matches(&Value::Object(input.clone())))
    }

    /// Request/response invocations of the tenant still awaiting an answer.
    pub fn list_active_invocations(&self, tenant_id: &TenantId) -> Result<Vec<Invocation>, EtsError> {
        Ok(self.invocations.find_by_tenant(tenant_id)?)
    }

    /// Drop every subscription and pending invocation of a tenant. Returns
    /// the number of subscriptions removed.
    pub fn delete_tenant(&self, tenant_id: &TenantId) -> Result<usize, EtsError> {
        let subscriptions = self
            .subscriptions
            .query(&SubscriptionQuery::for_tenant(tenant_id.clone()))?;
        let mut removed = 0;
        for s in &subscriptions {
            if self.subscriptions.delete(tenant_id, s.id)? {
                removed += 1;
            }
        }
        for invocation in self.invocations.find_by_tenant(tenant_id)? {
            self.invocations.delete(invocation.id)?;
        }
        warn!(tenant_id = %tenant_id, subscriptions = removed, "tenant data deleted");
        Ok(removed)
    }

    fn enabled_trigger(&self, tenant_id: &TenantId, trigger_id: &TriggerId) -> Result<Arc<Trigger>, EtsError> {
        self.catalog
            .find_by_id(trigger_id)
            .filter(|_| self.catalog.is_enabled_for_tenant(trigger_id, tenant_id))
            .ok_or_else(|| EtsError::not_found("trigger", trigger_id))
    }

    fn check_inline_output(&self, trigger: &Trigger, subscription: &Subscription) -> Result<(), EtsError> {
        if !subscription.is_inline() {
            return Ok(());
        }
        let inline: InlineConfig = view(&subscription.config, "inline")?;
        if inline.error.as_deref().is_some_and(|e| !e.is_empty()) {
            return Ok(());
        }
        match inline.output {
            Some(output) => self
                .engine
                .validate_output(trigger, &output, &subscription.tenant_id)
                .map(|_| ()),
            None => Ok(()),
        }
    }

    /// `<prefix>/<subscriptionId>/<namespace>/<trigger>`, from a trigger id
    /// of the form `namespace:trigger`.
    fn partner_event_source_name(&self, subscription: &Subscription) -> String {
        let trigger = subscription.trigger_id.as_str();
        let (namespace, name) = trigger.split_once(':').unwrap_or(("", trigger));
        format!(
            "{}/{}/{namespace}/{name}",
            self.partner_event_source_prefix, subscription.id
        )
    }
}
