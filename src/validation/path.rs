//! Resolution of schema element paths against instance data.

use serde_json::{Map, Value};

/// A value found in the instance together with its rendered path.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<'a> {
    pub path: String,
    pub value: &'a Value,
}

/// Number of values present: 0 for absent/null, array length, otherwise 1.
pub fn count(value: Option<&Value>) -> usize {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Array(items)) => items.len(),
        Some(_) => 1,
    }
}

/// Whether `key` is a type-suffixed variant of the choice base name, e.g. `valueString` for `value`.
pub fn is_choice_variant(key: &str, base: &str) -> bool {
    key.strip_prefix(base)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// Keys of `object` that are variants of the choice base name.
pub fn choice_variants<'a>(object: &'a Map<String, Value>, base: &str) -> Vec<(&'a str, &'a Value)> {
    object
        .iter()
        .filter(|(key, _)| is_choice_variant(key, base))
        .map(|(key, value)| (key.as_str(), value))
        .collect()
}

/// Resolve a schema element path (`Patient.name.given`) against a resource.
///
/// The leading type segment is dropped. Arrays fan out and results are
/// flattened; a trailing `name[x]` segment matches any type-suffixed sibling.
pub fn resolve<'a>(root: &'a Value, element_path: &str) -> Vec<Located<'a>> {
    let mut segments = element_path.split('.');
    let type_name = segments.next().unwrap_or_default();
    let segments: Vec<&str> = segments.collect();

    let mut out = Vec::new();
    collect(root, type_name.to_string(), &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, path: String, segments: &[&str], out: &mut Vec<Located<'a>>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect(item, format!("{path}[{i}]"), segments, out);
            }
        }
        _ => match segments.split_first() {
            None => out.push(Located { path, value }),
            Some((segment, rest)) => {
                let Some(object) = value.as_object() else {
                    return;
                };
                match segment.strip_suffix("[x]") {
                    Some(base) if rest.is_empty() => {
                        for (key, variant) in choice_variants(object, base) {
                            collect(variant, format!("{path}.{key}"), rest, out);
                        }
                    }
                    _ => {
                        if let Some(child) = object.get(*segment) {
                            collect(child, format!("{path}.{segment}"), rest, out);
                        }
                    }
                }
            }
        },
    }
}

/// One step of a slicing discriminator path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscriminatorStep {
    Field(String),
    /// `extension('url')`
    Extension(String),
}

/// Parse a discriminator path. Returns `None` when the path uses a function
/// that cannot be followed on instance data (e.g. `resolve()`).
pub fn parse_discriminator_path(path: &str) -> Option<Vec<DiscriminatorStep>> {
    let path = path.trim();
    if path.is_empty() || path == "$this" {
        return Some(Vec::new());
    }

    let mut steps = Vec::new();
    for raw in split_outside_parens(path) {
        let segment = raw.trim();
        if segment == "$this" {
            continue;
        }
        if let Some(arg) = segment
            .strip_prefix("extension(")
            .and_then(|s| s.strip_suffix(')'))
        {
            steps.push(DiscriminatorStep::Extension(
                arg.trim().trim_matches(|c| c == '\'' || c == '"').to_string(),
            ));
        } else if segment.starts_with("ofType(") || segment.starts_with("as(") {
            continue;
        } else if segment.contains('(') {
            return None;
        } else {
            steps.push(DiscriminatorStep::Field(segment.to_string()));
        }
    }
    Some(steps)
}

fn split_outside_parens(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&path[start..]);
    parts
}

/// Follow discriminator steps from `value`, fanning out across arrays.
///
/// A field that is absent is also looked up as a choice base name, so
/// `value` finds `valueCoding`.
pub fn follow<'a>(value: &'a Value, steps: &[DiscriminatorStep]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    follow_into(value, steps, &mut out);
    out
}

fn follow_into<'a>(value: &'a Value, steps: &[DiscriminatorStep], out: &mut Vec<&'a Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                follow_into(item, steps, out);
            }
        }
        _ => match steps.split_first() {
            None => out.push(value),
            Some((step, rest)) => {
                let Some(object) = value.as_object() else {
                    return;
                };
                match step {
                    DiscriminatorStep::Field(name) => match object.get(name) {
                        Some(child) => follow_into(child, rest, out),
                        None => {
                            for (_, variant) in choice_variants(object, name) {
                                follow_into(variant, rest, out);
                            }
                        }
                    },
                    DiscriminatorStep::Extension(url) => {
                        let extensions = object
                            .get("extension")
                            .and_then(Value::as_array)
                            .into_iter()
                            .flatten();
                        for ext in extensions {
                            if ext.get("url").and_then(Value::as_str) == Some(url.as_str()) {
                                follow_into(ext, rest, out);
                            }
                        }
                    }
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fan_out_across_arrays() {
        let patient = json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "a", "type": {"text": "MRN"}},
                {"system": "b"},
                {"system": "c", "type": {"text": "SSN"}}
            ]
        });

        let found = resolve(&patient, "Patient.identifier.type");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].path, "Patient.identifier[0].type");
        assert_eq!(found[1].path, "Patient.identifier[2].type");
    }

    #[test]
    fn test_trailing_choice_segment() {
        let observation = json!({
            "resourceType": "Observation",
            "component": [
                {"valueQuantity": {"value": 1}},
                {"valueString": "x"},
                {"code": {}}
            ]
        });

        let found = resolve(&observation, "Observation.component.value[x]");
        let paths: Vec<&str> = found.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "Observation.component[0].valueQuantity",
                "Observation.component[1].valueString"
            ]
        );
    }

    #[test]
    fn test_choice_not_expanded_mid_path() {
        let data = json!({"valueQuantity": {"value": 1}});
        assert!(resolve(&data, "X.value[x].value").is_empty());
    }

    #[test]
    fn test_count() {
        assert_eq!(count(None), 0);
        assert_eq!(count(Some(&json!(null))), 0);
        assert_eq!(count(Some(&json!("a"))), 1);
        assert_eq!(count(Some(&json!([1, 2]))), 2);
    }

    #[test]
    fn test_discriminator_paths() {
        assert_eq!(parse_discriminator_path("$this"), Some(vec![]));
        assert_eq!(
            parse_discriminator_path("code.coding.system"),
            Some(vec![
                DiscriminatorStep::Field("code".into()),
                DiscriminatorStep::Field("coding".into()),
                DiscriminatorStep::Field("system".into()),
            ])
        );
        assert_eq!(
            parse_discriminator_path("extension('http://example.org/ext').value"),
            Some(vec![
                DiscriminatorStep::Extension("http://example.org/ext".into()),
                DiscriminatorStep::Field("value".into()),
            ])
        );
        assert_eq!(
            parse_discriminator_path("value.ofType(Quantity)"),
            Some(vec![DiscriminatorStep::Field("value".into())])
        );
        assert_eq!(parse_discriminator_path("reference.resolve()"), None);
    }

    #[test]
    fn test_follow_extension_and_choice() {
        let item = json!({
            "extension": [
                {"url": "http://example.org/a", "valueCode": "x"},
                {"url": "http://example.org/b", "valueCode": "y"}
            ]
        });
        let steps = parse_discriminator_path("extension('http://example.org/b').value").unwrap();
        assert_eq!(follow(&item, &steps), vec![&json!("y")]);
    }
}
