//! JSON schema validation for import payloads.
//!
//! Validates a `serde_json::Value` document against a formpack's schema.
//! The contract is deliberately partial-tolerant: a draft authored against
//! the current schema may legitimately omit fields behind conditional
//! branches, so absence is never a violation here. Only values that are
//! present and structurally wrong (type, enum, pattern, bounds, unknown
//! properties) fail. Keywords outside the supported set are ignored.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// A single schema violation with the path it occurred at
#[derive(Debug, Clone)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate an instance against a schema, collecting all violations
pub fn validate(schema: &Value, instance: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    check(schema, instance, "$", &mut violations);
    violations
}

/// Convenience check for a valid document
pub fn is_valid(schema: &Value, instance: &Value) -> bool {
    validate(schema, instance).is_empty()
}

fn check(schema: &Value, instance: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(schema) = schema.as_object() else {
        // Boolean schemas: `true` accepts everything, `false` nothing.
        if schema == &Value::Bool(false) {
            out.push(Violation {
                path: path.to_string(),
                message: "schema forbids any value here".to_string(),
            });
        }
        return;
    };

    if let Some(expected) = schema.get("type") {
        if !type_matches(expected, instance) {
            out.push(Violation {
                path: path.to_string(),
                message: format!(
                    "expected type {}, got {}",
                    type_label(expected),
                    value_type_name(instance)
                ),
            });
            // A value of the wrong type makes deeper checks noise.
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(instance) {
            out.push(Violation {
                path: path.to_string(),
                message: "value is not one of the allowed values".to_string(),
            });
        }
    }

    if let Some(s) = instance.as_str() {
        check_string(schema, s, path, out);
    }

    if let Some(n) = instance.as_f64() {
        check_number(schema, n, path, out);
    }

    if let Some(obj) = instance.as_object() {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(properties) = properties {
            for (key, value) in obj {
                if let Some(prop_schema) = properties.get(key) {
                    check(prop_schema, value, &format!("{}.{}", path, key), out);
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            for key in obj.keys() {
                let known = properties.is_some_and(|p| p.contains_key(key));
                if !known {
                    out.push(Violation {
                        path: format!("{}.{}", path, key),
                        message: "unknown property".to_string(),
                    });
                }
            }
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), instance.as_array()) {
        for (i, element) in array.iter().enumerate() {
            check(items, element, &format!("{}[{}]", path, i), out);
        }
    }
}

fn check_string(schema: &serde_json::Map<String, Value>, s: &str, path: &str, out: &mut Vec<Violation>) {
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(s) {
                    out.push(Violation {
                        path: path.to_string(),
                        message: format!("does not match pattern {:?}", pattern),
                    });
                }
            }
            Err(e) => debug!(pattern, error = %e, "skipping unparseable schema pattern"),
        }
    }

    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            out.push(Violation {
                path: path.to_string(),
                message: format!("shorter than minLength {}", min),
            });
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            out.push(Violation {
                path: path.to_string(),
                message: format!("longer than maxLength {}", max),
            });
        }
    }
}

fn check_number(schema: &serde_json::Map<String, Value>, n: f64, path: &str, out: &mut Vec<Violation>) {
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if n < min {
            out.push(Violation {
                path: path.to_string(),
                message: format!("below minimum {}", min),
            });
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if n > max {
            out.push(Violation {
                path: path.to_string(),
                message: format!("above maximum {}", max),
            });
        }
    }
}

fn type_matches(expected: &Value, instance: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, instance),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, instance)),
        _ => true,
    }
}

fn single_type_matches(name: &str, instance: &Value) -> bool {
    match name {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => {
            instance.is_i64()
                || instance.is_u64()
                || instance.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        _ => true,
    }
}

fn type_label(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" | "),
        _ => "any".to_string(),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
