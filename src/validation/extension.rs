//! Extension and primitive-extension checks.

use serde_json::{Map, Value};
use tracing::debug;

use super::path::{choice_variants, is_choice_variant};
use super::{ElementValidator, IssueCollector, ValidationContext};
use crate::types::IssueCode;

impl ElementValidator<'_> {
    /// Validate a value claiming to be an Extension.
    ///
    /// A known definition (looked up by `url`) is walked like any other
    /// schema; otherwise only the generic extension shape is enforced.
    pub(crate) fn validate_extension(
        &self,
        value: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let Some(object) = value.as_object() else {
            sink.push(ctx.error(IssueCode::Structure, "Extension must be an object"));
            return;
        };
        let Some(url) = object.get("url").and_then(Value::as_str) else {
            sink.push(
                ctx.child("url")
                    .error(IssueCode::Required, "Extension must have a 'url'"),
            );
            return;
        };

        let has_value = object.keys().any(|k| is_choice_variant(k, "value"));
        let has_nested = object
            .get("extension")
            .and_then(Value::as_array)
            .is_some_and(|nested| !nested.is_empty());
        if has_value && has_nested {
            sink.push(ctx.error(
                IssueCode::Invariant,
                format!("ext-1: Extension {url} must have either extensions or value[x], not both"),
            ));
        }

        match self
            .registry
            .get_profile(url)
            .filter(|definition| definition.type_name == "Extension")
        {
            Some(definition) => {
                debug!("Validating extension {} against its definition", url);
                self.validate_object(&definition, &definition.root().path, object, ctx, sink);
            }
            None => self.validate_extension_shape(url, object, ctx, sink),
        }
    }

    /// Structural checks for an extension without a known definition.
    fn validate_extension_shape(
        &self,
        url: &str,
        object: &Map<String, Value>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let variants = choice_variants(object, "value");
        if variants.len() > 1 {
            let keys: Vec<&str> = variants.iter().map(|(key, _)| *key).collect();
            sink.push(ctx.error(
                IssueCode::Structure,
                format!(
                    "Extension {url} has multiple value[x] variants: {}",
                    keys.join(", ")
                ),
            ));
        }

        for (key, value) in object {
            match key.as_str() {
                "id" | "url" => {}
                "extension" => self.validate_extension_list(value, &ctx.child("extension"), sink),
                k if is_choice_variant(k, "value") => {}
                k if k.strip_prefix('_').is_some_and(|base| is_choice_variant(base, "value")) => {
                    self.validate_primitive_extensions(value, &ctx.child(k), sink);
                }
                k => sink.push(
                    ctx.child(k)
                        .error(IssueCode::Structure, format!("Unknown element '{k}' in extension")),
                ),
            }
        }
    }

    fn validate_extension_list(
        &self,
        value: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let Some(items) = value.as_array() else {
            sink.push(ctx.error(IssueCode::Structure, "'extension' must be an array"));
            return;
        };
        for (i, item) in items.iter().enumerate() {
            if !item.is_null() {
                self.validate_extension(item, &ctx.item(i), sink);
            }
        }
    }

    /// Validate a `_name` sibling of a primitive (single object or aligned array).
    pub(crate) fn validate_primitive_extensions(
        &self,
        value: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_null() {
                        self.validate_primitive_extension(item, &ctx.item(i), sink);
                    }
                }
            }
            Value::Null => {}
            single => self.validate_primitive_extension(single, ctx, sink),
        }
    }

    fn validate_primitive_extension(
        &self,
        value: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let Some(object) = value.as_object() else {
            sink.push(ctx.error(
                IssueCode::Structure,
                "Primitive extension container must be an object",
            ));
            return;
        };

        for (key, nested) in object {
            match key.as_str() {
                "id" => {}
                "extension" => self.validate_extension_list(nested, &ctx.child("extension"), sink),
                other => sink.push(ctx.child(other).error(
                    IssueCode::Structure,
                    format!(
                        "Unexpected property '{other}' in primitive extension; only 'id' and 'extension' are allowed"
                    ),
                )),
            }
        }
    }
}
