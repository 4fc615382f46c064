//! Validation passes.
//!
//! [`ElementValidator`] is the structural walker; the remaining passes
//! (constraints, terminology, mustSupport and global invariants) run over the
//! same schema and instance and report into a shared [`IssueCollector`].

pub mod binding;
pub mod constraints;
pub mod element;
pub mod extension;
pub mod invariants;
pub mod must_support;
pub mod path;
pub mod pattern;
pub mod primitive;
pub mod slicing;

pub use binding::BindingChecker;
pub use element::ElementValidator;

use serde_json::Value;

use crate::types::{IssueCode, ValidationIssue};

/// Where in the instance a check is being applied.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    /// The resource being validated
    pub root: &'a Value,
    /// Instance path, e.g. `Patient.name[0].given`
    pub path: String,
    pub parent_path: Option<String>,
    /// Type the current value is expected to have, when known
    pub expected_type: Option<String>,
    /// Source location hint (file name, line) supplied by the caller
    pub location: Option<String>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(root: &'a Value, path: impl Into<String>) -> Self {
        Self {
            root,
            path: path.into(),
            parent_path: None,
            expected_type: None,
            location: None,
        }
    }

    pub fn child(&self, name: &str) -> Self {
        Self {
            root: self.root,
            path: format!("{}.{}", self.path, name),
            parent_path: Some(self.path.clone()),
            expected_type: None,
            location: self.location.clone(),
        }
    }

    /// Context for the `index`-th entry of the array at the current path.
    pub fn item(&self, index: usize) -> Self {
        Self {
            root: self.root,
            path: format!("{}[{}]", self.path, index),
            parent_path: self.parent_path.clone(),
            expected_type: self.expected_type.clone(),
            location: self.location.clone(),
        }
    }

    pub fn with_expected_type(mut self, type_name: impl Into<String>) -> Self {
        self.expected_type = Some(type_name.into());
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    /// Attach this context's path (and location, if any) to an issue.
    pub fn locate(&self, issue: ValidationIssue) -> ValidationIssue {
        let issue = issue.with_expression(self.path.clone());
        match &self.location {
            Some(location) => issue.with_location(location.clone()),
            None => issue,
        }
    }

    pub fn error(&self, code: IssueCode, diagnostics: impl Into<String>) -> ValidationIssue {
        self.locate(ValidationIssue::error(code, diagnostics))
    }

    pub fn warning(&self, code: IssueCode, diagnostics: impl Into<String>) -> ValidationIssue {
        self.locate(ValidationIssue::warning(code, diagnostics))
    }
}

/// Ordered issue list for one validate call.
#[derive(Debug, Default)]
pub struct IssueCollector {
    issues: Vec<ValidationIssue>,
    fail_fast: bool,
    has_error: bool,
}

impl IssueCollector {
    pub fn new(fail_fast: bool) -> Self {
        Self {
            issues: Vec::new(),
            fail_fast,
            has_error: false,
        }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.has_error |= issue.is_error();
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        for issue in issues {
            self.push(issue);
        }
    }

    /// Whether fail-fast is on and an error has been collected.
    pub fn should_stop(&self) -> bool {
        self.fail_fast && self.has_error
    }

    pub fn has_errors(&self) -> bool {
        self.has_error
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }
}
