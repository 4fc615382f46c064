//! Structural walker over a schema's element tree.
//!
//! Elements are visited per instance object: for every object level the
//! direct children of the matching schema element are checked (cardinality,
//! type, fixed/pattern), sliced elements are handed to the slicing resolver,
//! and keys not covered by any child are reported as unknown.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use super::path::{self, count};
use super::pattern::check_fixed_and_pattern;
use super::primitive;
use super::{IssueCollector, ValidationContext};
use crate::config::ValidationOptions;
use crate::registry::SchemaRegistry;
use crate::types::{ElementType, IssueCode, Schema, SchemaElement, SchemaKind, TypeCode};

pub struct ElementValidator<'a> {
    pub(crate) registry: &'a dyn SchemaRegistry,
    pub(crate) options: &'a ValidationOptions,
}

impl<'a> ElementValidator<'a> {
    pub fn new(registry: &'a dyn SchemaRegistry, options: &'a ValidationOptions) -> Self {
        Self { registry, options }
    }

    /// Validate a resource object against the full element tree of `schema`.
    pub fn validate_resource(
        &self,
        schema: &Schema,
        resource: &Map<String, Value>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        debug!("Structural validation of {} against {}", ctx.path, schema.url);
        self.validate_object(schema, &schema.root().path, resource, ctx, sink);
    }

    /// Check one instance object against the children of the schema element at `parent`.
    pub(crate) fn validate_object(
        &self,
        schema: &Schema,
        parent: &str,
        object: &Map<String, Value>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let allow_resource_type =
            parent == schema.root().path && schema.kind == SchemaKind::Resource;
        let declared: HashSet<&str> = schema
            .children_of(parent)
            .filter(|(_, e)| !e.is_choice())
            .map(|(_, e)| e.name.as_str())
            .collect();
        let mut known: HashSet<String> = HashSet::new();

        for (index, element) in schema.children_of(parent) {
            if sink.should_stop() {
                return;
            }

            if element.is_choice() {
                self.validate_choice(schema, element, object, &declared, &mut known, ctx, sink);
                continue;
            }

            let name = element.name.as_str();
            known.insert(name.to_string());
            let element_ctx = ctx.child(name);
            self.validate_element(schema, index, element, object.get(name), &element_ctx, sink);

            let sibling = format!("_{name}");
            if let Some(extensions) = object.get(&sibling) {
                self.validate_primitive_extensions(extensions, &ctx.child(&sibling), sink);
            }
        }

        for key in object.keys() {
            if known.contains(key) || (allow_resource_type && key == "resourceType") {
                continue;
            }
            if key.strip_prefix('_').is_some_and(|base| known.contains(base)) {
                continue;
            }
            let message = match &ctx.expected_type {
                Some(type_name) => format!("Unknown element '{key}' in '{type_name}'"),
                None => format!("Unknown element '{key}'"),
            };
            sink.push(ctx.child(key).error(IssueCode::Structure, message));
        }
    }

    fn validate_element(
        &self,
        schema: &Schema,
        index: usize,
        element: &SchemaElement,
        value: Option<&Value>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        if let Some(slicing) = &element.slicing {
            let slices = schema.slices_of(index);
            if !slices.is_empty() {
                self.validate_sliced(schema, element, slicing, &slices, value, ctx, sink);
                if let Some(value) = value {
                    self.validate_items(schema, element, &element.types, value, ctx, sink);
                }
                return;
            }
        }

        self.check_cardinality(element, value, ctx, sink);
        if let Some(value) = value {
            self.validate_items(schema, element, &element.types, value, ctx, sink);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_choice(
        &self,
        schema: &Schema,
        element: &SchemaElement,
        object: &Map<String, Value>,
        declared: &HashSet<&str>,
        known: &mut HashSet<String>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let base = element.base_name();
        let variants: Vec<(&str, &Value)> = path::choice_variants(object, base)
            .into_iter()
            .filter(|(key, _)| !declared.contains(key))
            .collect();
        known.extend(variants.iter().map(|(key, _)| key.to_string()));

        match variants.as_slice() {
            [] => {
                if element.cardinality.min > 0 {
                    sink.push(ctx.child(&element.name).error(
                        IssueCode::Required,
                        format!(
                            "Missing required choice element '{}': expected one of {}",
                            element.name,
                            element.choice_candidates().join(", ")
                        ),
                    ));
                }
            }
            [(key, value)] => {
                let (key, value) = (*key, *value);
                let variant_ctx = ctx.child(key);
                let suffix = &key[base.len()..];
                match element.type_for_choice_suffix(suffix) {
                    Some(element_type) => {
                        self.check_cardinality(element, Some(value), &variant_ctx, sink);
                        self.validate_items(
                            schema,
                            element,
                            std::slice::from_ref(element_type),
                            value,
                            &variant_ctx,
                            sink,
                        );
                    }
                    None => sink.push(variant_ctx.error(
                        IssueCode::Structure,
                        format!(
                            "Type '{}' is not allowed for '{}'; allowed: {}",
                            suffix,
                            element.name,
                            element.choice_candidates().join(", ")
                        ),
                    )),
                }

                let sibling = format!("_{key}");
                if let Some(extensions) = object.get(&sibling) {
                    self.validate_primitive_extensions(extensions, &ctx.child(&sibling), sink);
                }
            }
            many => {
                let keys: Vec<&str> = many.iter().map(|(key, _)| *key).collect();
                sink.push(ctx.child(&element.name).error(
                    IssueCode::Structure,
                    format!(
                        "Multiple variants present for choice element '{}': {}",
                        element.name,
                        keys.join(", ")
                    ),
                ));
            }
        }
    }

    /// Array shape and min/max checks for the value(s) of one element.
    pub(crate) fn check_cardinality(
        &self,
        element: &SchemaElement,
        value: Option<&Value>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let cardinality = element.cardinality;
        let n = count(value);

        if let Some(v) = value
            && !v.is_array()
            && !v.is_null()
            && cardinality.allows_many()
        {
            sink.push(ctx.error(
                IssueCode::Structure,
                format!(
                    "Element '{}' must be an array (cardinality {})",
                    element.name, cardinality
                ),
            ));
        }

        if (n as u64) < u64::from(cardinality.min) {
            sink.push(ctx.error(
                IssueCode::Required,
                format!(
                    "Missing required element '{}': minimum cardinality is {}, found {}",
                    element.name, cardinality.min, n
                ),
            ));
        }

        if cardinality.exceeded_by(n) {
            sink.push(ctx.error(
                IssueCode::Value,
                format!(
                    "Element '{}' has {} values, maximum cardinality is {}",
                    element.name, n, cardinality.max
                ),
            ));
        }
    }

    /// Validate every present item of `value` against `types`.
    pub(crate) fn validate_items(
        &self,
        schema: &Schema,
        element: &SchemaElement,
        types: &[ElementType],
        value: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if sink.should_stop() {
                        return;
                    }
                    if !item.is_null() {
                        self.validate_value(schema, element, types, item, &ctx.item(i), sink);
                    }
                }
            }
            Value::Null => {}
            single => self.validate_value(schema, element, types, single, ctx, sink),
        }
    }

    fn validate_value(
        &self,
        schema: &Schema,
        element: &SchemaElement,
        types: &[ElementType],
        item: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let content_target = element
            .content_reference
            .as_deref()
            .and_then(|r| r.rsplit_once('#').map(|(_, path)| path));

        match (item.as_object(), content_target) {
            (Some(object), _) if schema.has_children(&element.path) => {
                self.validate_object(schema, &element.path, object, ctx, sink);
            }
            (Some(object), Some(target)) if schema.has_children(target) => {
                self.validate_object(schema, target, object, ctx, sink);
            }
            (None, Some(_)) => sink.push(ctx.error(
                IssueCode::Structure,
                format!("Expected an object for '{}'", element.name),
            )),
            _ => self.validate_types(types, item, ctx, sink),
        }

        check_fixed_and_pattern(element, item, ctx, sink);
    }

    /// Try each declared type in order; the first one without errors wins.
    fn validate_types(
        &self,
        types: &[ElementType],
        item: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        if types.is_empty() {
            return;
        }

        let mut failed = Vec::new();
        for element_type in types {
            let mut attempt = IssueCollector::new(false);
            self.validate_against_type(element_type, item, ctx, &mut attempt);

            // An object with a string url counts as an Extension even when its content has issues.
            let extension_shaped = element_type.code == TypeCode::Extension
                && item.get("url").is_some_and(Value::is_string);
            if !attempt.has_errors() || extension_shaped {
                sink.extend(attempt.into_issues());
                return;
            }
            failed.push(attempt);
        }

        if failed.len() == 1 {
            sink.extend(failed.remove(0).into_issues());
        } else {
            let names: Vec<&str> = types.iter().map(|t| t.code.as_str()).collect();
            sink.push(ctx.error(
                IssueCode::Structure,
                format!(
                    "Value does not match any of the expected types: {}",
                    names.join(", ")
                ),
            ));
        }
    }

    fn validate_against_type(
        &self,
        element_type: &ElementType,
        item: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        match &element_type.code {
            TypeCode::Primitive(primitive) => {
                if let Err(violation) = primitive::check(*primitive, item) {
                    sink.push(ctx.error(violation.code, violation.message));
                }
            }
            TypeCode::Extension => self.validate_extension(item, ctx, sink),
            TypeCode::Resource => self.validate_nested_resource(item, None, ctx, sink),
            TypeCode::BackboneElement | TypeCode::Element => {
                if !item.is_object() {
                    sink.push(ctx.error(
                        IssueCode::Structure,
                        format!("Expected an object of type '{}'", element_type.code),
                    ));
                }
            }
            code => {
                let Some(object) = item.as_object() else {
                    sink.push(ctx.error(
                        IssueCode::Structure,
                        format!("Expected an object of type '{code}'"),
                    ));
                    return;
                };
                match self.registry.get_schema(code.as_str()) {
                    Some(type_schema) if type_schema.kind == SchemaKind::Resource => {
                        self.validate_nested_resource(item, Some(code.as_str()), ctx, sink);
                    }
                    Some(type_schema) => {
                        let type_ctx = ctx.clone().with_expected_type(code.as_str());
                        self.validate_object(
                            &type_schema,
                            &type_schema.root().path,
                            object,
                            &type_ctx,
                            sink,
                        );
                    }
                    None => debug!("No definition for type {}, contents of {} not checked", code, ctx.path),
                }
            }
        }
    }

    /// Resources nested in other resources (`contained`, `Bundle.entry.resource`).
    fn validate_nested_resource(
        &self,
        item: &Value,
        expected: Option<&str>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let Some(object) = item.as_object() else {
            sink.push(ctx.error(IssueCode::Structure, "Expected a resource object"));
            return;
        };
        let Some(resource_type) = object.get("resourceType").and_then(Value::as_str) else {
            sink.push(ctx.error(IssueCode::Required, "Nested resource is missing resourceType"));
            return;
        };

        if let Some(expected) = expected {
            if expected != resource_type {
                sink.push(ctx.error(
                    IssueCode::Structure,
                    format!("Expected a resource of type '{expected}', found '{resource_type}'"),
                ));
                return;
            }
        }

        match self.registry.get_schema(resource_type) {
            Some(schema) => {
                let nested_ctx = ctx.clone().with_expected_type(resource_type);
                self.validate_object(&schema, &schema.root().path, object, &nested_ctx, sink);
            }
            None => sink.push(ctx.warning(
                IssueCode::NotSupported,
                format!("No definition for resource type '{resource_type}'; contents not validated"),
            )),
        }
    }
}
