//! Strict allow-list projection of validated payloads.
//!
//! The default projection walks the schema: object fields not declared under
//! `properties` are dropped, recursively through nested objects and arrays.
//! A trigger may instead bind a typed DTO; the payload is then deserialized
//! into it and serialized back, which drops whatever the DTO does not declare.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::schema::{JsonSchema, MAX_DEPTH};

/// Projects a structurally valid payload down to its declared shape.
pub trait Projector: Send + Sync {
    fn project(&self, payload: &Map<String, Value>) -> Result<Map<String, Value>, String>;
}

/// Typed-DTO projection: `payload -> T -> payload`.
pub struct TypedProjection<T> {
    _dto: PhantomData<fn() -> T>,
}

impl<T> TypedProjection<T> {
    pub fn new() -> Self {
        Self { _dto: PhantomData }
    }
}

impl<T> Default for TypedProjection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Projector for TypedProjection<T>
where
    T: Serialize + DeserializeOwned,
{
    fn project(&self, payload: &Map<String, Value>) -> Result<Map<String, Value>, String> {
        let dto: T = serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|e| e.to_string())?;
        match serde_json::to_value(dto).map_err(|e| e.to_string())? {
            Value::Object(map) => Ok(map),
            other => Err(format!("projection produced a non-object value: {other}")),
        }
    }
}

/// How a trigger schema trims payloads after validation.
#[derive(Clone, Default)]
pub enum Projection {
    /// Derive the allow-list from the schema's declared properties.
    #[default]
    Schema,
    /// Round-trip through a bound DTO type.
    Typed(Arc<dyn Projector>),
}

impl Projection {
    pub fn typed<T>() -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Self::Typed(Arc::new(TypedProjection::<T>::new()))
    }

    pub fn apply(
        &self,
        schema: &JsonSchema,
        payload: &Map<String, Value>,
    ) -> Result<Map<String, Value>, String> {
        match self {
            Self::Schema => match project_value(schema, schema.raw(), &Value::Object(payload.clone()), 0) {
                Value::Object(map) => Ok(map),
                other => Err(format!("projection produced a non-object value: {other}")),
            },
            Self::Typed(projector) => projector.project(payload),
        }
    }
}

impl core::fmt::Debug for Projection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Schema => f.write_str("Projection::Schema"),
            Self::Typed(_) => f.write_str("Projection::Typed"),
        }
    }
}

fn project_value(schema: &JsonSchema, node: &Value, value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::Null;
    }

    let node = match schema.resolve(node).and_then(Value::as_object) {
        Some(n) => n,
        None => return value.clone(),
    };

    // Union types: use the first branch the value satisfies.
    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(branches)) = node.get(key) {
            if let Some(branch) = branches.iter().find(|b| schema.accepts(b, value)) {
                return project_value(schema, branch, value, depth + 1);
            }
        }
    }

    match value {
        Value::Object(fields) => Value::Object(project_object(schema, node, fields, depth)),
        Value::Array(items) => match node.get("items") {
            Some(item_schema) => Value::Array(
                items
                    .iter()
                    .map(|item| project_value(schema, item_schema, item, depth + 1))
                    .collect(),
            ),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

fn project_object(
    schema: &JsonSchema,
    node: &Map<String, Value>,
    fields: &Map<String, Value>,
    depth: usize,
) -> Map<String, Value> {
    let mut declared: Vec<&Map<String, Value>> = Vec::new();
    if let Some(props) = node.get("properties").and_then(Value::as_object) {
        declared.push(props);
    }
    if let Some(Value::Array(all)) = node.get("allOf") {
        declared.extend(
            all.iter()
                .filter_map(|b| schema.resolve(b))
                .filter_map(|b| b.get("properties"))
                .filter_map(Value::as_object),
        );
    }

    // A free-form map (no declared properties) is kept as is.
    if declared.is_empty() {
        return match node.get("additionalProperties") {
            Some(extra @ Value::Object(_)) => fields
                .iter()
                .map(|(k, v)| (k.clone(), project_value(schema, extra, v, depth + 1)))
                .collect(),
            _ => fields.clone(),
        };
    }

    let extra_schema = node
        .get("additionalProperties")
        .filter(|v| v.is_object());

    let mut out = Map::new();
    for (name, value) in fields {
        if let Some(prop_schema) = declared.iter().find_map(|props| props.get(name)) {
            out.insert(name.clone(), project_value(schema, prop_schema, value, depth + 1));
        } else if let Some(extra) = extra_schema {
            out.insert(name.clone(), project_value(schema, extra, value, depth + 1));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn drops_undeclared_fields_recursively() {
        let schema = JsonSchema::new(
            "s",
            json!({
                "type": "object",
                "properties": {
                    "identity": {
                        "type": "object",
                        "properties": { "id": { "type": "string" } }
                    },
                    "items": {
                        "type": "array",
                        "items": { "type": "object", "properties": { "name": {} } }
                    }
                }
            }),
        )
        .unwrap();

        let payload = obj(json!({
            "identity": { "id": "1", "password": "hunter2" },
            "items": [ { "name": "a", "secret": true } ],
            "internal": "drop me"
        }));

        let projected = Projection::Schema.apply(&schema, &payload).unwrap();
        assert_eq!(
            Value::Object(projected),
            json!({ "identity": { "id": "1" }, "items": [ { "name": "a" } ] })
        );
    }

    #[test]
    fn free_form_maps_are_kept() {
        let schema = JsonSchema::new(
            "s",
            json!({
                "type": "object",
                "properties": { "attributes": { "type": "object" } }
            }),
        )
        .unwrap();
        let payload = obj(json!({ "attributes": { "anything": 1, "else": [1, 2] } }));
        let projected = Projection::Schema.apply(&schema, &payload).unwrap();
        assert_eq!(projected, payload);
    }

    #[test]
    fn refs_are_followed_during_projection() {
        let schema = JsonSchema::new(
            "s",
            json!({
                "$ref": "#/definitions/record:Input",
                "definitions": {
                    "record:Input": {
                        "type": "object",
                        "properties": { "approved": { "type": "boolean" } }
                    }
                }
            }),
        )
        .unwrap();
        let payload = obj(json!({ "approved": true, "comment": "x" }));
        let projected = Projection::Schema.apply(&schema, &payload).unwrap();
        assert_eq!(Value::Object(projected), json!({ "approved": true }));
    }

    #[derive(Serialize, Deserialize)]
    struct Decision {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    }

    #[test]
    fn typed_projection_round_trips_through_the_dto() {
        let schema = JsonSchema::new("s", json!({})).unwrap();
        let payload = obj(json!({ "approved": false, "comment": "no", "leak": 1 }));

        let projected = Projection::typed::<Decision>().apply(&schema, &payload).unwrap();
        assert_eq!(
            Value::Object(projected),
            json!({ "approved": false, "comment": "no" })
        );
    }

    #[test]
    fn typed_projection_fails_when_dto_cannot_be_built() {
        let schema = JsonSchema::new("s", json!({})).unwrap();
        let payload = obj(json!({ "approved": "yes" }));
        assert!(Projection::typed::<Decision>().apply(&schema, &payload).is_err());
    }
}
