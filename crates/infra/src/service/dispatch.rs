use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use ets_core::{EtsError, TenantId};
use ets_invocations::{EtsEvent, InvocationFailed, TriggerInvoked, TriggerWorkflow};
use ets_subscriptions::{
    EventBridgeConfig, HttpConfig, ResponseMode, ScriptConfig, SubscriptionType, WorkflowConfig, view,
};
use ets_triggers::TriggerType;

use super::complete::CompleteInvocation;
use super::{DISPATCH_METRIC, REQUEST_ID_HEADER, TriggerService, destination_name};
use crate::delivery::{DeliveryOutcome, DeliveryRequest, DeliveryTarget};

const METADATA: &str = "_metadata";
const WORKFLOW_METADATA: &str = "_meta";

/// What a `TriggerInvoked` event turns into.
enum Dispatch {
    Deliver(DeliveryRequest),
    Workflow(TriggerWorkflow),
}

impl TriggerService {
    /// Entry point for a consumed `TriggerInvoked` event. Inline
    /// subscriptions answer from their own config; everything else is
    /// dispatched.
    pub fn handle_invoked(
        &self,
        tenant_id: &TenantId,
        request_id: Option<&str>,
        headers: &BTreeMap<String, String>,
        event: &TriggerInvoked,
    ) -> Result<(), EtsError> {
        if event.subscription_type != SubscriptionType::Inline {
            return self.dispatch_invocation(tenant_id, request_id, headers, event);
        }
        if event.trigger_type == TriggerType::FireAndForget {
            return Ok(());
        }
        self.complete_invocation(
            tenant_id,
            CompleteInvocation {
                request_id: request_id.map(str::to_string),
                invocation_id: event.invocation_id,
                secret: event.secret.expose().to_string(),
                output: None,
                error: None,
                subscription_id: Some(event.subscription_id),
            },
        )
    }

    /// Hand an invoked trigger to its destination.
    ///
    /// An open breaker rejects the call before anything is sent; the
    /// invocation is then left to the deadline sweeper. A failed delivery
    /// fails the invocation with exactly one `InvocationFailed` event.
    pub fn dispatch_invocation(
        &self,
        tenant_id: &TenantId,
        request_id: Option<&str>,
        headers: &BTreeMap<String, String>,
        event: &TriggerInvoked,
    ) -> Result<(), EtsError> {
        let destination = destination_name(tenant_id, &event.trigger_id);
        if let Err(err) = self.breakers.try_acquire(&destination) {
            warn!(
                invocation_id = %event.invocation_id,
                destination = %destination,
                "circuit open; invocation not dispatched"
            );
            self.count_dispatch(event, "rejected");
            return Err(err);
        }

        let dispatch = match self.build_dispatch(tenant_id, request_id, event) {
            Ok(d) => d,
            Err(err) => {
                self.fail_dispatch(tenant_id, request_id, event, &err.to_string())?;
                return Err(err);
            }
        };

        let request = match dispatch {
            Dispatch::Workflow(workflow) => {
                let workflow_id = workflow.workflow_id.clone();
                self.publisher.publish(EtsEvent::TriggerWorkflow(workflow).into_envelope(
                    tenant_id.clone(),
                    request_id,
                    headers.clone(),
                ))?;
                self.count_dispatch(event, "workflow");
                info!(invocation_id = %event.invocation_id, workflow_id = %workflow_id, "workflow started");
                return Ok(());
            }
            Dispatch::Deliver(request) => request,
        };

        let elapsed = (Utc::now() - event.created).to_std().unwrap_or_default();
        match self.deliverer.deliver(&request) {
            Ok(outcome) => {
                self.count_dispatch(event, request.target.kind());
                info!(
                    invocation_id = %event.invocation_id,
                    target = request.target.kind(),
                    "invocation dispatched"
                );
                match outcome {
                    DeliveryOutcome::Responded(output)
                        if event.trigger_type == TriggerType::RequestResponse =>
                    {
                        self.complete_invocation(
                            tenant_id,
                            CompleteInvocation {
                                request_id: request_id.map(str::to_string),
                                invocation_id: event.invocation_id,
                                secret: event.secret.expose().to_string(),
                                output: Some(output),
                                error: None,
                                subscription_id: None,
                            },
                        )
                    }
                    _ => {
                        if event.trigger_type == TriggerType::FireAndForget {
                            self.breakers.on_success(&destination, elapsed);
                        }
                        Ok(())
                    }
                }
            }
            Err(err) => {
                self.breakers.on_error(&destination, elapsed);
                self.count_dispatch(event, "failed");
                let reason = err.to_string();
                self.fail_dispatch(tenant_id, request_id, event, &reason)?;
                Err(EtsError::delivery(destination, reason))
            }
        }
    }

    fn fail_dispatch(
        &self,
        tenant_id: &TenantId,
        request_id: Option<&str>,
        event: &TriggerInvoked,
        reason: &str,
    ) -> Result<(), EtsError> {
        error!(invocation_id = %event.invocation_id, reason, "invocation dispatch failed");
        // Request/response invocations are claimed by removal; a callback or
        // the sweeper that got there first already published the outcome.
        let claimed = self.invocations.delete(event.invocation_id)?;
        if event.trigger_type == TriggerType::RequestResponse && !claimed {
            return Ok(());
        }
        let failed = EtsEvent::InvocationFailed(InvocationFailed {
            invocation_id: event.invocation_id,
            trigger_id: event.trigger_id.clone(),
            context: event.context.clone(),
            reason: reason.to_string(),
            test: event.invocation_type.is_test(),
        });
        self.publisher
            .publish(failed.into_envelope(tenant_id.clone(), request_id, BTreeMap::new()))
    }

    fn count_dispatch(&self, event: &TriggerInvoked, outcome: &str) {
        self.metrics.increment(
            DISPATCH_METRIC,
            &[
                ("trigger_type", event.trigger_type.camel_case()),
                ("subscription_type", event.subscription_type.as_str()),
                ("outcome", outcome),
            ],
        );
    }

    fn build_dispatch(
        &self,
        tenant_id: &TenantId,
        request_id: Option<&str>,
        event: &TriggerInvoked,
    ) -> Result<Dispatch, EtsError> {
        let config = &event.subscription_config;
        let request_response = event.trigger_type == TriggerType::RequestResponse;
        let callback_url = self.callback_url(event.invocation_id);

        let mut request_headers = BTreeMap::new();
        if let Some(id) = request_id {
            request_headers.insert(REQUEST_ID_HEADER.to_string(), id.to_string());
        }

        let (target, payload) = match event.subscription_type {
            SubscriptionType::Http => {
                let http: HttpConfig = view(config, "http")?;
                if let Some(auth) = http.authorization_header() {
                    request_headers.insert("Authorization".to_string(), auth);
                }

                let mut metadata = Map::new();
                metadata.insert("triggerId".into(), json!(event.trigger_id));
                metadata.insert("triggerType".into(), json!(event.trigger_type.camel_case()));
                if request_response {
                    metadata.insert("responseMode".into(), json!(http.http_dispatch_mode.camel_case()));
                    if http.http_dispatch_mode != ResponseMode::Sync {
                        metadata.insert("callbackURL".into(), json!(callback_url));
                        metadata.insert("secret".into(), json!(event.secret.expose()));
                    }
                } else {
                    metadata.insert("invocationId".into(), json!(event.invocation_id));
                }

                let mut payload = event.input.clone();
                payload.insert(METADATA.into(), Value::Object(metadata));
                let target = DeliveryTarget::Http {
                    url: http.url,
                    headers: request_headers,
                    response_mode: http.http_dispatch_mode,
                };
                (target, payload)
            }
            SubscriptionType::Script => {
                let script: ScriptConfig = view(config, "script")?;
                script.language()?;
                let source = event
                    .script_source
                    .as_deref()
                    .ok_or_else(|| EtsError::bad_request("script source is missing"))?;

                let mut payload = Map::new();
                payload.insert("triggerId".into(), json!(event.trigger_id));
                payload.insert("triggerType".into(), json!(event.trigger_type.camel_case()));
                payload.insert("invocationId".into(), json!(event.invocation_id));
                payload.insert("input".into(), Value::Object(event.input.clone()));
                if request_response {
                    payload.insert("callbackUrl".into(), json!(callback_url));
                    payload.insert("secret".into(), json!(event.secret.expose()));
                    payload.insert("responseMode".into(), json!(script.response_mode.camel_case()));
                }

                let target = DeliveryTarget::Script {
                    script_code: STANDARD.encode(source.as_bytes()),
                    headers: request_headers,
                    response_mode: script.response_mode,
                };
                (target, payload)
            }
            SubscriptionType::EventBridge => {
                let eb: EventBridgeConfig = view(config, "eventBridge")?;

                let mut metadata = Map::new();
                metadata.insert("invocationId".into(), json!(event.invocation_id));
                metadata.insert("triggerId".into(), json!(event.trigger_id));
                metadata.insert("triggerType".into(), json!(event.trigger_type.camel_case()));
                if request_response {
                    metadata.insert("callbackURL".into(), json!(callback_url));
                    metadata.insert("secret".into(), json!(event.secret.expose()));
                }

                let mut payload = event.input.clone();
                payload.insert(METADATA.into(), Value::Object(metadata));
                let target = DeliveryTarget::EventBridge {
                    aws_account: eb.aws_account,
                    aws_region: eb.aws_region,
                    partner_event_source_name: eb.aws_partner_event_source_name,
                };
                (target, payload)
            }
            SubscriptionType::Workflow => {
                let wf: WorkflowConfig = view(config, "workflow")?;

                let mut meta = Map::new();
                meta.insert("invocationId".into(), json!(event.invocation_id));
                meta.insert("subscriptionId".into(), json!(event.subscription_id));
                meta.insert("triggerType".into(), json!(event.trigger_type.as_str()));
                if request_response {
                    meta.insert("callbackUrl".into(), json!(callback_url));
                    meta.insert("secret".into(), json!(event.secret.expose()));
                }

                let mut input = event.input.clone();
                input
                    .entry(WORKFLOW_METADATA)
                    .or_insert_with(|| Value::Object(meta));
                return Ok(Dispatch::Workflow(TriggerWorkflow {
                    workflow_id: wf.workflow_id,
                    input,
                }));
            }
            SubscriptionType::Inline => {
                return Err(EtsError::unsupported("inline subscriptions are answered locally"));
            }
        };

        Ok(Dispatch::Deliver(DeliveryRequest {
            invocation_id: event.invocation_id,
            tenant_id: tenant_id.clone(),
            trigger_id: event.trigger_id.clone(),
            subscription_id: event.subscription_id,
            target,
            payload,
        }))
    }
}
