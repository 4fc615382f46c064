//! Terminology binding pass.
//!
//! Coded values are collected synchronously from the instance, then checked
//! one by one against the configured terminology service, falling back to
//! value sets known to the registry.

use serde_json::{Value, json};
use tracing::warn;

use super::path;
use super::{IssueCollector, ValidationContext};
use crate::terminology::{CodeValidationResult, TerminologyError, TerminologyResult, TerminologyService};
use crate::types::{BindingStrength, IssueCode, IssueSeverity, Schema, SchemaElement, TypeCode, ValidationIssue};

/// A coding as found in the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodingRef<'v> {
    pub system: Option<&'v str>,
    pub code: &'v str,
    pub display: Option<&'v str>,
}

/// The coded shape of a bound value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodedValue<'v> {
    /// A bare `code`, `string` or `uri`
    Code(&'v str),
    Coding(CodingRef<'v>),
    CodeableConcept(Vec<CodingRef<'v>>),
}

fn coding_ref(value: &Value) -> Option<CodingRef<'_>> {
    Some(CodingRef {
        system: value.get("system").and_then(Value::as_str),
        code: value.get("code").and_then(Value::as_str)?,
        display: value.get("display").and_then(Value::as_str),
    })
}

fn codeable_concept(value: &Value) -> Option<CodedValue<'_>> {
    let object = value.as_object()?;
    let codings = object
        .get("coding")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(coding_ref)
        .collect();
    Some(CodedValue::CodeableConcept(codings))
}

/// Interpret `value` according to the bound element's type, or its shape when the type is open.
pub fn coded_value<'v>(type_code: Option<&TypeCode>, value: &'v Value) -> Option<CodedValue<'v>> {
    match type_code {
        Some(TypeCode::CodeableConcept) => codeable_concept(value),
        Some(TypeCode::Coding) | Some(TypeCode::Quantity) => coding_ref(value).map(CodedValue::Coding),
        Some(TypeCode::Primitive(_)) => value.as_str().map(CodedValue::Code),
        _ => match value {
            Value::String(code) => Some(CodedValue::Code(code)),
            Value::Object(object) if object.contains_key("coding") => codeable_concept(value),
            Value::Object(_) => coding_ref(value).map(CodedValue::Coding),
            _ => None,
        },
    }
}

/// Type of a resolved value: the choice variant's type, or the element's only type.
fn resolved_type<'e>(element: &'e SchemaElement, located_path: &str) -> Option<&'e TypeCode> {
    if element.is_choice() {
        let key = located_path.rsplit('.').next()?;
        let suffix = key.strip_prefix(element.base_name())?;
        return element.type_for_choice_suffix(suffix).map(|t| &t.code);
    }
    match element.types.as_slice() {
        [only] => Some(&only.code),
        _ => None,
    }
}

fn strength_severity(strength: BindingStrength) -> Option<IssueSeverity> {
    match strength {
        BindingStrength::Required => Some(IssueSeverity::Error),
        BindingStrength::Extensible | BindingStrength::Preferred => Some(IssueSeverity::Warning),
        BindingStrength::Example => None,
    }
}

pub struct BindingChecker<'a> {
    service: Option<&'a dyn TerminologyService>,
    local: &'a dyn TerminologyService,
    include_warnings: bool,
}

impl<'a> BindingChecker<'a> {
    pub fn new(
        service: Option<&'a dyn TerminologyService>,
        local: &'a dyn TerminologyService,
        include_warnings: bool,
    ) -> Self {
        Self {
            service,
            local,
            include_warnings,
        }
    }

    /// Check every bound element of `schema` present in `resource`.
    pub async fn check(
        &self,
        schema: &Schema,
        resource: &Value,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let mut work = Vec::new();
        for element in schema.elements.iter().skip(1) {
            if element.is_slice_scoped() {
                continue;
            }
            let Some(binding) = &element.binding else {
                continue;
            };
            let Some(value_set) = binding.value_set.as_deref() else {
                continue;
            };
            let Some(severity) = strength_severity(binding.strength) else {
                continue;
            };
            if severity == IssueSeverity::Warning && !self.include_warnings {
                continue;
            }

            for located in path::resolve(resource, &element.path) {
                let type_code = resolved_type(element, &located.path);
                if let Some(coded) = coded_value(type_code, located.value) {
                    work.push((binding.strength, severity, value_set, located.path, coded));
                }
            }
        }

        for (strength, severity, value_set, path, coded) in work {
            if sink.should_stop() {
                return;
            }
            let item_ctx = ValidationContext {
                path,
                ..ctx.clone()
            };
            self.check_value(strength, severity, value_set, coded, &item_ctx, sink)
                .await;
        }
    }

    async fn check_value(
        &self,
        strength: BindingStrength,
        severity: IssueSeverity,
        value_set: &str,
        coded: CodedValue<'_>,
        ctx: &ValidationContext<'_>,
        sink: &mut IssueCollector,
    ) {
        let codings = match coded {
            CodedValue::Code(code) => vec![CodingRef {
                system: None,
                code,
                display: None,
            }],
            CodedValue::Coding(coding) => vec![coding],
            CodedValue::CodeableConcept(codings) => {
                if codings.is_empty() {
                    if strength == BindingStrength::Required {
                        sink.push(ctx.error(
                            IssueCode::CodeInvalid,
                            format!("No code provided for the required binding to '{value_set}'"),
                        ));
                    }
                    return;
                }
                codings
            }
        };

        let mut any_valid = false;
        let mut invalid_message = None;
        let mut failures = Vec::new();

        for coding in &codings {
            match self
                .lookup(value_set, coding.code, coding.system, coding.display)
                .await
            {
                Ok(result) => {
                    if let Some(display_warning) = &result.display_warning {
                        sink.push(ctx.warning(IssueCode::CodeInvalid, display_warning.clone()));
                    }
                    if result.valid {
                        any_valid = true;
                    } else if invalid_message.is_none() {
                        invalid_message = result.message.clone();
                    }
                }
                Err(error) => failures.push((coding.code, error)),
            }
        }

        if any_valid {
            return;
        }

        // A coding that could not be checked may be the valid one.
        if !failures.is_empty() {
            for (code, error) in &failures {
                sink.push(unverifiable_issue(code, value_set, error, ctx));
            }
            return;
        }

        let codes: Vec<&str> = codings.iter().map(|c| c.code).collect();
        let detail = invalid_message.unwrap_or_else(|| {
            format!("Code '{}' is not in value set '{}'", codes.join("', '"), value_set)
        });
        sink.push(
            ctx.locate(ValidationIssue::new(
                severity,
                IssueCode::CodeInvalid,
                format!("{} (binding strength: {})", detail, strength.as_str()),
            ))
            .with_details(binding_details(strength, value_set)),
        );
    }

    async fn lookup(
        &self,
        value_set: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        if let Some(service) = self.service {
            match service.validate_code(value_set, code, system, display).await {
                Err(TerminologyError::ValueSetNotFound { .. }) => {}
                other => return other,
            }
        }
        self.local
            .validate_code(value_set, code, system, display)
            .await
    }
}

/// `details` of a binding violation: the strength as a coded concept, the value set as text.
fn binding_details(strength: BindingStrength, value_set: &str) -> Value {
    json!({
        "coding": [{
            "system": "http://hl7.org/fhir/binding-strength",
            "code": strength.as_str()
        }],
        "text": value_set
    })
}

fn unverifiable_issue(
    code: &str,
    value_set: &str,
    error: &TerminologyError,
    ctx: &ValidationContext<'_>,
) -> ValidationIssue {
    match error {
        TerminologyError::ValueSetNotFound { url } => ctx.locate(ValidationIssue::information(
            IssueCode::NotFound,
            format!("Value set '{url}' could not be found; code '{code}' was not checked"),
        )),
        other => {
            warn!("Terminology check of '{}' against {} failed: {}", code, value_set, other);
            ctx.warning(
                IssueCode::Exception,
                format!(
                    "Unable to check code '{code}' against '{value_set}' [{}]: {other}",
                    other.code()
                ),
            )
        }
    }
}
