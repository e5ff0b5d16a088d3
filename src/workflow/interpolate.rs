//! `${name}` interpolation of step parameters
//!
//! Tokens are replaced with the stringified value of the matching instance
//! variable. Unknown names are left verbatim. A dotted token such as
//! `${fetch.status}` falls back to a lookup inside a map variable when no
//! variable carries the full dotted name.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}")
        .expect("token pattern is valid")
});

/// Render a value the way it appears inside interpolated text
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup<'a>(name: &str, vars: &'a HashMap<String, Value>) -> Option<&'a Value> {
    if let Some(value) = vars.get(name) {
        return Some(value);
    }

    let mut parts = name.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Substitute all tokens in a string
pub fn interpolate_str(input: &str, vars: &HashMap<String, Value>) -> String {
    if !input.contains("${") {
        return input.to_string();
    }

    TOKEN_REGEX
        .replace_all(input, |caps: &Captures| match lookup(&caps[1], vars) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Substitute tokens in every string nested inside a value
pub fn interpolate_value(value: &Value, vars: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, vars)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, vars))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Interpolate a full parameter map
pub fn interpolate_params(
    params: &HashMap<String, Value>,
    vars: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), interpolate_value(value, vars)))
        .collect()
}
