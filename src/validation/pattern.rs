//! Fixed (deep equality) and pattern (structural subset) matching.

use serde_json::Value;

use super::{IssueCollector, ValidationContext};
use crate::types::{IssueCode, SchemaElement};

/// Deep equality where numbers compare by value (`1.0 == 1`).
pub fn deep_equal(instance: &Value, expected: &Value) -> bool {
    match (instance, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        _ => instance == expected,
    }
}

/// Structural subset match of `instance` against `pattern`.
///
/// Objects: every pattern key must match the instance's value for that key.
/// Arrays: every pattern entry must match at least one instance entry.
/// Scalars: equality. An empty object or array pattern matches anything.
pub fn pattern_matches(instance: &Value, pattern: &Value) -> bool {
    match pattern {
        Value::Null => true,

        Value::Object(pattern_map) => {
            if pattern_map.is_empty() {
                return true;
            }
            let Some(item_map) = instance.as_object() else {
                return false;
            };
            pattern_map.iter().all(|(key, pattern_value)| {
                item_map
                    .get(key)
                    .is_some_and(|item_value| pattern_matches(item_value, pattern_value))
            })
        }

        Value::Array(pattern_array) => {
            if pattern_array.is_empty() {
                return true;
            }
            let Some(item_array) = instance.as_array() else {
                return false;
            };
            pattern_array.iter().all(|pattern_element| {
                item_array
                    .iter()
                    .any(|item_element| pattern_matches(item_element, pattern_element))
            })
        }

        Value::Number(_) => deep_equal(instance, pattern),
        Value::String(_) | Value::Bool(_) => instance == pattern,
    }
}

/// Apply the element's fixed and pattern constraints to every present item.
pub fn check_fixed_and_pattern(
    element: &SchemaElement,
    value: &Value,
    ctx: &ValidationContext<'_>,
    sink: &mut IssueCollector,
) {
    if element.fixed.is_none() && element.pattern.is_none() {
        return;
    }

    let items: Vec<(ValidationContext<'_>, &Value)> = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (ctx.item(i), v))
            .collect(),
        Value::Null => Vec::new(),
        single => vec![(ctx.clone(), single)],
    };

    for (item_ctx, item) in items {
        if let Some(fixed) = &element.fixed {
            if !deep_equal(item, &fixed.value) {
                sink.push(item_ctx.error(
                    IssueCode::Value,
                    format!(
                        "Value must be exactly {} ({}), found {}",
                        fixed.value, fixed.key, item
                    ),
                ));
            }
        }
        if let Some(pattern) = &element.pattern {
            if !pattern_matches(item, &pattern.value) {
                sink.push(item_ctx.error(
                    IssueCode::Value,
                    format!(
                        "Value does not match the required pattern {} ({})",
                        pattern.value, pattern.key
                    ),
                ));
            }
        }
    }
}
