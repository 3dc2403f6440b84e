//! Validate-then-project entry point with outcome metrics.

use std::ops::Deref;

use serde_json::{Map, Value};
use tracing::debug;

use ets_core::{EtsError, TenantId};
use ets_observability::MetricsRegistry;
use ets_observability::metrics;

use crate::projection::Projection;
use crate::schema::JsonSchema;

/// Counter recorded for every validation attempt.
pub const METRIC_NAME: &str = "json_schema_trigger_validation";

/// A schema bound to the projection used for its payloads.
#[derive(Debug, Clone)]
pub struct TriggerSchema {
    schema: JsonSchema,
    projection: Projection,
}

impl TriggerSchema {
    pub fn new(schema: JsonSchema) -> Self {
        Self {
            schema,
            projection: Projection::Schema,
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn id(&self) -> &str {
        self.schema.id()
    }

    pub fn schema(&self) -> &JsonSchema {
        &self.schema
    }

    /// Structural check only; no projection, no metrics.
    pub fn validate_only(&self, payload: &Map<String, Value>) -> Result<(), EtsError> {
        let raw = Value::Object(payload.clone());
        self.schema
            .check(&raw)
            .map_err(|violations| EtsError::validation(self.id(), violations.join("; "), raw.to_string()))
    }

    /// Both phases: structural validation, then projection.
    pub fn process(&self, payload: &Map<String, Value>) -> Result<ValidatedPayload, EtsError> {
        self.validate_only(payload)?;
        self.projection
            .apply(&self.schema, payload)
            .map(ValidatedPayload)
            .map_err(|reason| {
                EtsError::validation(self.id(), reason, Value::Object(payload.clone()).to_string())
            })
    }
}

/// Payload that passed validation and was projected to declared fields only.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayload(Map<String, Value>);

impl ValidatedPayload {
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl Deref for ValidatedPayload {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Runs [`TriggerSchema::process`] and records the outcome per
/// (schema, org, pod).
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator {
    metrics: &'static MetricsRegistry,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    /// Validator reporting into the process-wide registry.
    pub fn new() -> Self {
        Self {
            metrics: metrics::global(),
        }
    }

    pub fn with_registry(metrics: &'static MetricsRegistry) -> Self {
        Self { metrics }
    }

    pub fn validate(
        &self,
        schema: &TriggerSchema,
        payload: &Map<String, Value>,
        tenant: &TenantId,
    ) -> Result<ValidatedPayload, EtsError> {
        let result = schema.process(payload);
        let success = if result.is_ok() { "true" } else { "false" };

        self.metrics.increment(
            METRIC_NAME,
            &[
                ("json_schema", schema.id()),
                ("org", tenant.org()),
                ("pod", tenant.pod()),
                ("success", success),
            ],
        );

        if let Err(err) = &result {
            debug!(schema = schema.id(), tenant = %tenant, error = %err, "payload rejected");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn leak_registry() -> &'static MetricsRegistry {
        Box::leak(Box::new(MetricsRegistry::new()))
    }

    fn tenant() -> TenantId {
        TenantId::new("dev:acme").unwrap()
    }

    fn approval_schema() -> TriggerSchema {
        TriggerSchema::new(
            JsonSchema::new(
                "idn:access-request-pre-approval",
                json!({
                    "type": "object",
                    "required": ["approved"],
                    "properties": {
                        "approved": { "type": "boolean" },
                        "comment": { "type": ["string", "null"] }
                    }
                }),
            )
            .unwrap(),
        )
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn valid_payload_is_projected_and_counted() {
        let registry = leak_registry();
        let validator = SchemaValidator::with_registry(registry);

        let out = validator
            .validate(
                &approval_schema(),
                &obj(json!({ "approved": true, "approver": "secret" })),
                &tenant(),
            )
            .unwrap();

        assert_eq!(Value::Object(out.into_inner()), json!({ "approved": true }));
        assert_eq!(
            registry.counter(
                METRIC_NAME,
                &[
                    ("json_schema", "idn:access-request-pre-approval"),
                    ("org", "acme"),
                    ("pod", "dev"),
                    ("success", "true"),
                ],
            ),
            1
        );
    }

    #[test]
    fn invalid_payload_carries_schema_id_and_is_counted_as_failure() {
        let registry = leak_registry();
        let validator = SchemaValidator::with_registry(registry);

        let err = validator
            .validate(&approval_schema(), &obj(json!({ "approved": "yes" })), &tenant())
            .unwrap_err();

        match err {
            EtsError::Validation { schema_id, payload, .. } => {
                assert_eq!(schema_id, "idn:access-request-pre-approval");
                assert!(payload.contains("yes"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.counter_total(METRIC_NAME), 1);
        assert_eq!(
            registry.counter(
                METRIC_NAME,
                &[
                    ("json_schema", "idn:access-request-pre-approval"),
                    ("org", "acme"),
                    ("pod", "dev"),
                    ("success", "false"),
                ],
            ),
            1
        );
    }

    #[test]
    fn validate_only_does_not_project() {
        let schema = approval_schema();
        assert!(schema.validate_only(&obj(json!({ "approved": true, "x": 1 }))).is_ok());
        assert!(schema.validate_only(&obj(json!({}))).is_err());
    }

    fn declared_schema() -> TriggerSchema {
        TriggerSchema::new(
            JsonSchema::new(
                "prop",
                json!({
                    "type": "object",
                    "properties": {
                        "s": { "type": "string" },
                        "n": { "type": "integer" },
                        "b": { "type": "boolean" }
                    }
                }),
            )
            .unwrap(),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        /// Declared primitives survive unchanged and nothing undeclared leaks.
        #[test]
        fn projection_keeps_only_declared_fields(
            s in ".{0,24}",
            n in any::<i64>(),
            b in any::<bool>(),
            extra in prop::collection::btree_map("x_[a-z]{1,8}", any::<i32>(), 0..6),
        ) {
            let mut payload = obj(json!({ "s": s, "n": n, "b": b }));
            for (k, v) in &extra {
                payload.insert(k.clone(), json!(v));
            }

            let out = declared_schema().process(&payload).unwrap().into_inner();

            prop_assert_eq!(out.len(), 3);
            prop_assert_eq!(out.get("s"), Some(&json!(s)));
            prop_assert_eq!(out.get("n"), Some(&json!(n)));
            prop_assert_eq!(out.get("b"), Some(&json!(b)));
            prop_assert!(out.keys().all(|k| !k.starts_with("x_")));
        }
    }
}
