//! JSON-Schema subset used by trigger definitions.
//!
//! Supported keywords: `type` (single or array), `nullable`, `enum`, `const`,
//! `required`, `properties`, `additionalProperties`, `items`, `minItems`,
//! `maxItems`, `minLength`, `maxLength`, `minimum`, `maximum`,
//! `format: date-time`, `anyOf`, `oneOf`, `allOf` and local `$ref`s into
//! `definitions` / `$defs`.

use serde_json::{Map, Value};
use thiserror::Error;

/// Nesting limit for `$ref` chains and deeply nested payloads.
pub(crate) const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema '{0}' must be a JSON object or boolean")]
    NotAnObject(String),

    #[error("schema '{id}' references unknown definition '{reference}'")]
    UnresolvedRef { id: String, reference: String },
}

/// A compiled (checked) schema document.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchema {
    id: String,
    root: Value,
}

impl JsonSchema {
    /// Wrap a schema document, checking that every local `$ref` resolves.
    pub fn new(id: impl Into<String>, root: Value) -> Result<Self, SchemaError> {
        let id = id.into();
        if !(root.is_object() || root.is_boolean()) {
            return Err(SchemaError::NotAnObject(id));
        }

        let schema = Self { id, root };
        schema.check_refs(&schema.root)?;
        Ok(schema)
    }

    /// Schema id: the document's `$id`/`id` when present, else the name given
    /// at construction.
    pub fn id(&self) -> &str {
        self.root
            .get("$id")
            .or_else(|| self.root.get("id"))
            .and_then(Value::as_str)
            .unwrap_or(&self.id)
    }

    pub fn raw(&self) -> &Value {
        &self.root
    }

    /// Structural validation. Returns every violation found, with a JSON
    /// pointer-ish path.
    pub fn check(&self, payload: &Value) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        self.check_value(&self.root, payload, "$", 0, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn is_valid(&self, payload: &Value) -> bool {
        self.check(payload).is_ok()
    }

    /// Whether `value` satisfies the sub-schema `node` of this document.
    pub(crate) fn accepts(&self, node: &Value, value: &Value) -> bool {
        let mut scratch = Vec::new();
        self.check_value(node, value, "$", 0, &mut scratch);
        scratch.is_empty()
    }

    /// Follow `$ref`s until reaching a concrete schema node.
    pub(crate) fn resolve<'a>(&'a self, mut node: &'a Value) -> Option<&'a Value> {
        for _ in 0..MAX_DEPTH {
            match node.get("$ref").and_then(Value::as_str) {
                Some(reference) => node = self.lookup(reference)?,
                None => return Some(node),
            }
        }
        None
    }

    fn lookup(&self, reference: &str) -> Option<&Value> {
        if reference == "#" {
            return Some(&self.root);
        }
        let (section, name) = reference
            .strip_prefix("#/definitions/")
            .map(|n| ("definitions", n))
            .or_else(|| reference.strip_prefix("#/$defs/").map(|n| ("$defs", n)))?;
        self.root.get(section)?.get(name)
    }

    fn check_refs(&self, node: &Value) -> Result<(), SchemaError> {
        match node {
            Value::Object(map) => {
                if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                    if self.lookup(reference).is_none() {
                        return Err(SchemaError::UnresolvedRef {
                            id: self.id.clone(),
                            reference: reference.to_string(),
                        });
                    }
                }
                map.values().try_for_each(|v| self.check_refs(v))
            }
            Value::Array(items) => items.iter().try_for_each(|v| self.check_refs(v)),
            _ => Ok(()),
        }
    }

    fn check_value(
        &self,
        schema: &Value,
        value: &Value,
        path: &str,
        depth: usize,
        out: &mut Vec<String>,
    ) {
        if depth > MAX_DEPTH {
            out.push(format!("{path}: nesting too deep"));
            return;
        }

        let schema = match self.resolve(schema) {
            Some(s) => s,
            None => {
                out.push(format!("{path}: unresolvable $ref"));
                return;
            }
        };

        let node = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                out.push(format!("{path}: no value is allowed here"));
                return;
            }
            Value::Object(node) => node,
            _ => return,
        };

        if value.is_null() && node.get("nullable").and_then(Value::as_bool) == Some(true) {
            return;
        }

        if let Some(expected) = node.get("type") {
            if !type_matches(expected, value) {
                out.push(format!(
                    "{path}: expected {}, found {}",
                    describe_type(expected),
                    json_type(value)
                ));
                return;
            }
        }

        if let Some(Value::Array(allowed)) = node.get("enum") {
            if !allowed.contains(value) {
                out.push(format!("{path}: value is not one of the allowed values"));
            }
        }
        if let Some(expected) = node.get("const") {
            if expected != value {
                out.push(format!("{path}: value does not match constant"));
            }
        }

        self.check_combinators(node, value, path, depth, out);

        match value {
            Value::Object(fields) => self.check_object(node, fields, path, depth, out),
            Value::Array(items) => self.check_array(node, items, path, depth, out),
            Value::String(s) => check_string(node, s, path, out),
            Value::Number(n) => check_number(node, n.as_f64().unwrap_or_default(), path, out),
            _ => {}
        }
    }

    fn check_combinators(
        &self,
        node: &Map<String, Value>,
        value: &Value,
        path: &str,
        depth: usize,
        out: &mut Vec<String>,
    ) {
        if let Some(Value::Array(all)) = node.get("allOf") {
            for branch in all {
                self.check_value(branch, value, path, depth + 1, out);
            }
        }

        if let Some(Value::Array(any)) = node.get("anyOf") {
            if !any.iter().any(|b| self.passes(b, value, path, depth)) {
                out.push(format!("{path}: value matches none of anyOf"));
            }
        }

        if let Some(Value::Array(one)) = node.get("oneOf") {
            let matching = one
                .iter()
                .filter(|b| self.passes(b, value, path, depth))
                .count();
            if matching != 1 {
                out.push(format!(
                    "{path}: value must match exactly one of oneOf (matched {matching})"
                ));
            }
        }
    }

    fn passes(&self, schema: &Value, value: &Value, path: &str, depth: usize) -> bool {
        let mut scratch = Vec::new();
        self.check_value(schema, value, path, depth + 1, &mut scratch);
        scratch.is_empty()
    }

    fn check_object(
        &self,
        node: &Map<String, Value>,
        fields: &Map<String, Value>,
        path: &str,
        depth: usize,
        out: &mut Vec<String>,
    ) {
        if let Some(Value::Array(required)) = node.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(name) {
                    out.push(format!("{path}: missing required field '{name}'"));
                }
            }
        }

        let properties = node.get("properties").and_then(Value::as_object);
        for (name, value) in fields {
            let child = format!("{path}.{name}");
            match properties.and_then(|p| p.get(name)) {
                Some(prop_schema) => self.check_value(prop_schema, value, &child, depth + 1, out),
                None => match node.get("additionalProperties") {
                    Some(Value::Bool(false)) => {
                        out.push(format!("{child}: additional property not allowed"))
                    }
                    Some(extra @ Value::Object(_)) => {
                        self.check_value(extra, value, &child, depth + 1, out)
                    }
                    _ => {}
                },
            }
        }
    }

    fn check_array(
        &self,
        node: &Map<String, Value>,
        items: &[Value],
        path: &str,
        depth: usize,
        out: &mut Vec<String>,
    ) {
        if let Some(min) = node.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                out.push(format!("{path}: expected at least {min} items"));
            }
        }
        if let Some(max) = node.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                out.push(format!("{path}: expected at most {max} items"));
            }
        }
        if let Some(item_schema) = node.get("items") {
            for (i, item) in items.iter().enumerate() {
                self.check_value(item_schema, item, &format!("{path}[{i}]"), depth + 1, out);
            }
        }
    }
}

fn check_string(node: &Map<String, Value>, s: &str, path: &str, out: &mut Vec<String>) {
    let len = s.chars().count() as u64;
    if let Some(min) = node.get("minLength").and_then(Value::as_u64) {
        if len < min {
            out.push(format!("{path}: shorter than {min} characters"));
        }
    }
    if let Some(max) = node.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            out.push(format!("{path}: longer than {max} characters"));
        }
    }
    if node.get("format").and_then(Value::as_str) == Some("date-time")
        && chrono::DateTime::parse_from_rfc3339(s).is_err()
    {
        out.push(format!("{path}: not an RFC 3339 date-time"));
    }
}

fn check_number(node: &Map<String, Value>, n: f64, path: &str, out: &mut Vec<String>) {
    if let Some(min) = node.get("minimum").and_then(Value::as_f64) {
        if n < min {
            out.push(format!("{path}: below minimum {min}"));
        }
    }
    if let Some(max) = node.get("maximum").and_then(Value::as_f64) {
        if n > max {
            out.push(format!("{path}: above maximum {max}"));
        }
    }
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => single_type_matches(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| single_type_matches(t, value)),
        _ => true,
    }
}

fn single_type_matches(t: &str, value: &Value) -> bool {
    match t {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        // Unknown type names are not ours to reject.
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
