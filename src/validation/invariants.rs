//! Data-driven invariants that hold for every element of every resource.

use serde_json::{Map, Value};

use super::{IssueCollector, ValidationContext};
use crate::types::IssueCode;

/// Report empty objects (ele-1), empty arrays and misplaced `null`s anywhere in the resource.
pub fn check_global_invariants(
    resource: &Value,
    ctx: &ValidationContext<'_>,
    sink: &mut IssueCollector,
) {
    if let Some(object) = resource.as_object() {
        check_object(object, ctx, sink);
    }
}

fn check_object(object: &Map<String, Value>, ctx: &ValidationContext<'_>, sink: &mut IssueCollector) {
    for (key, value) in object {
        if sink.should_stop() {
            return;
        }
        let child_ctx = ctx.child(key);
        match value {
            Value::Null => sink.push(child_ctx.error(
                IssueCode::Structure,
                format!("Element '{key}' must not be null"),
            )),
            Value::Object(nested) => check_nested_object(nested, &child_ctx, sink),
            Value::Array(items) => check_array(object, key, items, &child_ctx, sink),
            _ => {}
        }
    }
}

fn check_nested_object(
    object: &Map<String, Value>,
    ctx: &ValidationContext<'_>,
    sink: &mut IssueCollector,
) {
    if object.is_empty() {
        sink.push(ctx.error(
            IssueCode::Invariant,
            "ele-1: All FHIR elements must have a @value or children",
        ));
        return;
    }
    check_object(object, ctx, sink);
}

fn check_array(
    parent: &Map<String, Value>,
    key: &str,
    items: &[Value],
    ctx: &ValidationContext<'_>,
    sink: &mut IssueCollector,
) {
    if items.is_empty() {
        sink.push(ctx.error(
            IssueCode::Structure,
            format!("Array '{key}' must not be empty"),
        ));
        return;
    }

    // `given: ["a", null]` may pair with `_given: [null, {...}]`
    let aligned = match key.strip_prefix('_') {
        Some(base) => parent.get(base),
        None => parent.get(&format!("_{key}")),
    }
    .and_then(Value::as_array);

    for (i, item) in items.iter().enumerate() {
        let item_ctx = ctx.item(i);
        match item {
            Value::Null => {
                let has_counterpart =
                    aligned.is_some_and(|other| other.get(i).is_some_and(|v| !v.is_null()));
                if !has_counterpart {
                    sink.push(item_ctx.error(
                        IssueCode::Structure,
                        format!("Null entry in '{key}' without a matching primitive value or extension"),
                    ));
                }
            }
            Value::Object(nested) => check_nested_object(nested, &item_ctx, sink),
            Value::Array(_) => sink.push(item_ctx.error(
                IssueCode::Structure,
                format!("Nested arrays are not allowed in '{key}'"),
            )),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(resource: Value) -> Vec<(IssueCode, String)> {
        let ctx = ValidationContext::new(&resource, "Patient");
        let mut sink = IssueCollector::new(false);
        check_global_invariants(&resource, &ctx, &mut sink);
        sink.into_issues()
            .into_iter()
            .map(|i| (i.code, i.expression[0].clone()))
            .collect()
    }

    #[test]
    fn test_empty_object_and_array() {
        let issues = run(json!({
            "resourceType": "Patient",
            "name": [{}],
            "identifier": []
        }));
        assert!(issues.contains(&(IssueCode::Invariant, "Patient.name[0]".to_string())));
        assert!(issues.contains(&(IssueCode::Structure, "Patient.identifier".to_string())));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_aligned_nulls_are_allowed() {
        let issues = run(json!({
            "resourceType": "Patient",
            "name": [{
                "given": ["Jim", null],
                "_given": [null, {"extension": [{"url": "http://example.org/x", "valueString": "y"}]}]
            }]
        }));
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn test_unaligned_nulls() {
        let issues = run(json!({
            "resourceType": "Patient",
            "active": null,
            "name": [{"given": ["Jim", null]}]
        }));
        assert_eq!(issues.len(), 2);
        assert!(issues.contains(&(IssueCode::Structure, "Patient.active".to_string())));
        assert!(issues.contains(&(IssueCode::Structure, "Patient.name[0].given[1]".to_string())));
    }
}
