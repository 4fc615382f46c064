//! Slicing resolver.
//!
//! Items of a sliced element are matched against the declared slices in
//! order; the first slice whose discriminators all hold wins. Aggregate and
//! per-slice cardinality, closed/openAtEnd rules and ordering are then
//! checked over the assignment.

use serde_json::Value;
use std::borrow::Cow;
use tracing::debug;

use super::path::{self, DiscriminatorStep};
use super::pattern::{check_fixed_and_pattern, deep_equal, pattern_matches};
use super::primitive;
use super::{ElementValidator, IssueCollector, ValidationContext};
use crate::types::{
    Discriminator, DiscriminatorType, ElementType, IssueCode, Schema, SchemaElement, Slice,
    Slicing, SlicingRules, TypeCode,
};

/// Slice matched by each item, as an index into the slice list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceAssignment {
    pub matches: Vec<Option<usize>>,
}

impl SliceAssignment {
    pub fn count_for(&self, slice: usize) -> usize {
        self.matches.iter().filter(|m| **m == Some(slice)).count()
    }
}

impl ElementValidator<'_> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn validate_sliced(
        &self,
        schema: &Schema,
        element: &SchemaElement,
        slicing: &Slicing,
        slices: &[Slice<'_>],
        value: Option<&Value>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) -> SliceAssignment {
        self.check_cardinality(element, value, ctx, sink);

        let is_array = matches!(value, Some(Value::Array(_)));
        let items: Vec<&Value> = match value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
        };
        let item_ctx = |i: usize| if is_array { ctx.item(i) } else { ctx.clone() };

        let assignment = SliceAssignment {
            matches: items
                .iter()
                .map(|item| {
                    if item.is_null() {
                        return None;
                    }
                    slices
                        .iter()
                        .position(|slice| self.matches_slice(schema, element, slicing, slice, item))
                })
                .collect(),
        };

        for (position, slice) in slices.iter().enumerate() {
            let found = assignment.count_for(position);
            let cardinality = slice.cardinality();
            if (found as u64) < u64::from(cardinality.min) {
                sink.push(ctx.error(
                    IssueCode::Required,
                    format!(
                        "Slice '{}' of '{}' requires at least {} item(s), found {}",
                        slice.name, element.name, cardinality.min, found
                    ),
                ));
            }
            if cardinality.exceeded_by(found) {
                sink.push(ctx.error(
                    IssueCode::Value,
                    format!(
                        "Slice '{}' of '{}' allows at most {} item(s), found {}",
                        slice.name, element.name, cardinality.max, found
                    ),
                ));
            }
        }

        let last_matched = assignment.matches.iter().rposition(Option::is_some);
        for (i, matched) in assignment.matches.iter().enumerate() {
            if matched.is_some() || items[i].is_null() {
                continue;
            }
            match slicing.rules {
                SlicingRules::Closed => sink.push(item_ctx(i).error(
                    IssueCode::Structure,
                    format!(
                        "Item does not match any slice of '{}' and slicing is closed",
                        element.name
                    ),
                )),
                SlicingRules::OpenAtEnd if last_matched.is_some_and(|last| last > i) => {
                    sink.push(item_ctx(i).error(
                        IssueCode::Structure,
                        format!(
                            "Unsliced item appears before sliced items of '{}' but slicing is openAtEnd",
                            element.name
                        ),
                    ))
                }
                _ => {}
            }
        }

        if slicing.ordered {
            let mut highest = 0;
            for (i, matched) in assignment.matches.iter().enumerate() {
                let Some(position) = *matched else { continue };
                if position < highest {
                    sink.push(item_ctx(i).error(
                        IssueCode::Structure,
                        format!(
                            "Item matches slice '{}' out of the declared slice order of '{}'",
                            slices[position].name, element.name
                        ),
                    ));
                } else {
                    highest = position;
                }
            }
        }

        if self.options.validate_slice_contents {
            for (i, matched) in assignment.matches.iter().enumerate() {
                if let Some(position) = *matched {
                    self.check_slice_contents(element, &slices[position], items[i], &item_ctx(i), sink);
                }
            }
        }

        assignment
    }

    /// Check the elements scoped to `slice` against one item that matched it.
    pub(crate) fn check_slice_contents(
        &self,
        element: &SchemaElement,
        slice: &Slice<'_>,
        item: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        self.check_scoped(&slice.children, &element.path, item, ctx, sink);
    }

    fn check_scoped(
        &self,
        scoped: &[&SchemaElement],
        parent_path: &str,
        item: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let Some(object) = item.as_object() else {
            return;
        };

        let direct = scoped.iter().filter(|child| {
            child.slice_name.is_none()
                && child
                    .path
                    .rsplit_once('.')
                    .is_some_and(|(parent, _)| parent == parent_path)
        });

        for child in direct {
            let (key, value) = if child.is_choice() {
                match path::choice_variants(object, child.base_name()).first() {
                    Some((key, value)) => (key.to_string(), Some(*value)),
                    None => (child.name.clone(), None),
                }
            } else {
                (child.name.clone(), object.get(&child.name))
            };

            let child_ctx = ctx.child(&key);
            self.check_cardinality(child, value, &child_ctx, sink);

            let Some(value) = value else { continue };
            check_fixed_and_pattern(child, value, &child_ctx, sink);
            match value {
                Value::Array(nested) => {
                    for (i, nested_item) in nested.iter().enumerate() {
                        self.check_scoped(scoped, &child.path, nested_item, &child_ctx.item(i), sink);
                    }
                }
                nested_item => self.check_scoped(scoped, &child.path, nested_item, &child_ctx, sink),
            }
        }
    }

    fn matches_slice(
        &self,
        schema: &Schema,
        element: &SchemaElement,
        slicing: &Slicing,
        slice: &Slice<'_>,
        item: &Value,
    ) -> bool {
        if slicing.discriminators.is_empty() {
            // Without discriminators an item belongs to the slice whose content it satisfies.
            let scratch_root = Value::Null;
            let scratch_ctx = ValidationContext::new(&scratch_root, element.path.as_str());
            let mut scratch = IssueCollector::new(false);
            self.check_slice_contents(element, slice, item, &scratch_ctx, &mut scratch);
            return !scratch.has_errors();
        }

        slicing
            .discriminators
            .iter()
            .all(|d| self.matches_discriminator(schema, element, slice, d, item))
    }

    fn matches_discriminator(
        &self,
        schema: &Schema,
        element: &SchemaElement,
        slice: &Slice<'_>,
        discriminator: &Discriminator,
        item: &Value,
    ) -> bool {
        let Some(steps) = path::parse_discriminator_path(&discriminator.path) else {
            debug!(
                "Discriminator path '{}' on {} cannot be followed; treating as matching",
                discriminator.path, element.path
            );
            return true;
        };
        let values = path::follow(item, &steps);

        match discriminator.kind {
            DiscriminatorType::Exists => !values.is_empty(),
            DiscriminatorType::Value | DiscriminatorType::Pattern => {
                let Some((expected, exact)) = expected_value(element, slice, &steps) else {
                    debug!(
                        "No fixed or pattern value for discriminator '{}' in slice '{}' of {}",
                        discriminator.path, slice.name, schema.url
                    );
                    return true;
                };
                let exact = exact && discriminator.kind == DiscriminatorType::Value;
                values.iter().any(|v| {
                    if exact {
                        deep_equal(v, &expected)
                    } else {
                        pattern_matches(v, &expected)
                    }
                })
            }
            DiscriminatorType::Type => {
                let types = discriminated_element(element, slice, &steps)
                    .map(|e| e.types.as_slice())
                    .unwrap_or_default();
                if types.is_empty() {
                    return true;
                }
                values
                    .iter()
                    .any(|v| types.iter().any(|t| shape_matches_type(&t.code, v)))
            }
            DiscriminatorType::Profile => {
                let profiles: Vec<&str> = discriminated_element(element, slice, &steps)
                    .map(|e| declared_profiles(&e.types))
                    .unwrap_or_default();
                if profiles.is_empty() {
                    return true;
                }
                values.iter().any(|v| declares_profile(v, &profiles))
            }
        }
    }
}

/// The slice element or slice child a discriminator path points at.
fn discriminated_element<'s>(
    element: &SchemaElement,
    slice: &Slice<'s>,
    steps: &[DiscriminatorStep],
) -> Option<&'s SchemaElement> {
    if steps.is_empty() {
        return Some(slice.element);
    }
    let fields: Option<Vec<&str>> = steps
        .iter()
        .map(|step| match step {
            DiscriminatorStep::Field(name) => Some(name.as_str()),
            DiscriminatorStep::Extension(_) => None,
        })
        .collect();
    let target = format!("{}.{}", element.path, fields?.join("."));

    slice.children.iter().copied().find(|child| {
        child.path == target || child.path.strip_suffix("[x]") == Some(target.as_str())
    })
}

/// The value a `value`/`pattern` discriminator compares against, and whether it is fixed.
fn expected_value<'s>(
    element: &SchemaElement,
    slice: &Slice<'s>,
    steps: &[DiscriminatorStep],
) -> Option<(Cow<'s, Value>, bool)> {
    let constrained = |e: &'s SchemaElement| {
        e.fixed
            .as_ref()
            .map(|f| (Cow::Borrowed(&f.value), true))
            .or_else(|| e.pattern.as_ref().map(|p| (Cow::Borrowed(&p.value), false)))
    };

    if steps.is_empty() {
        return constrained(slice.element);
    }

    // Extension identity is the profile URL of the slice's type.
    if matches!(steps, [DiscriminatorStep::Field(f)] if f == "url")
        && slice.element.has_type(&TypeCode::Extension)
    {
        if let Some(url) = slice.element.types.iter().find_map(|t| t.profiles.first()) {
            return Some((Cow::Owned(Value::String(url.clone())), true));
        }
    }

    if let Some(found) = discriminated_element(element, slice, steps).and_then(constrained) {
        return Some(found);
    }

    // Fall back to the part of the slice's own fixed/pattern value under the path.
    let (whole, exact) = constrained(slice.element)?;
    let nested = path::follow(&whole, steps).first().map(|v| (*v).clone())?;
    Some((Cow::Owned(nested), exact))
}

fn declared_profiles(types: &[ElementType]) -> Vec<&str> {
    types
        .iter()
        .flat_map(|t| t.profiles.iter().chain(&t.target_profiles))
        .map(String::as_str)
        .collect()
}

fn declares_profile(value: &Value, profiles: &[&str]) -> bool {
    let meta_profiles = value
        .get("meta")
        .and_then(|m| m.get("profile"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    let url = value.get("url").and_then(Value::as_str);

    meta_profiles.chain(url).any(|p| profiles.contains(&p))
}

/// Shape compatibility used by `type` discriminators.
fn shape_matches_type(code: &TypeCode, value: &Value) -> bool {
    let resource_type = value.get("resourceType").and_then(Value::as_str);
    match code {
        TypeCode::Primitive(primitive) => primitive::matches_shape(*primitive, value),
        TypeCode::Resource => resource_type.is_some(),
        other => match resource_type {
            Some(rt) => rt == other.as_str(),
            None => value.is_object(),
        },
    }
}
