use serde_json::Value;

use super::path::{self, choice_variants};
use super::{IssueCollector, ValidationContext};
use crate::types::{IssueCode, Schema};

/// Warn about optional mustSupport elements that are absent while their parent is present.
///
/// Required elements are skipped; cardinality already reports them.
pub fn check_must_support(
    schema: &Schema,
    resource: &Value,
    ctx: &ValidationContext<'_>,
    sink: &mut IssueCollector,
) {
    for element in schema.elements.iter().skip(1) {
        if !element.must_support || element.cardinality.min > 0 || element.is_slice_scoped() {
            continue;
        }
        let Some((parent_path, _)) = element.path.rsplit_once('.') else {
            continue;
        };

        let parents = if parent_path == schema.root().path {
            vec![path::Located {
                path: ctx.path.clone(),
                value: resource,
            }]
        } else {
            path::resolve(resource, parent_path)
        };

        for parent in parents {
            let Some(object) = parent.value.as_object() else {
                continue;
            };
            let present = if element.is_choice() {
                !choice_variants(object, element.base_name()).is_empty()
            } else {
                object.get(&element.name).is_some_and(|v| !v.is_null())
            };
            if !present {
                let parent_ctx = ValidationContext {
                    path: parent.path.clone(),
                    ..ctx.clone()
                };
                sink.push(parent_ctx.child(&element.name).warning(
                    IssueCode::BusinessRule,
                    format!("mustSupport element '{}' is not present", element.name),
                ));
            }
        }
    }
}
