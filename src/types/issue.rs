//! Validation issues and the OperationOutcome they are reported in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl IssueSeverity {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Fatal | Self::Error)
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Information => write!(f, "information"),
        }
    }
}

/// FHIR issue-type codes used by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    CodeInvalid,
    BusinessRule,
    NotSupported,
    NotFound,
    Exception,
    Informational,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Structure => "structure",
            Self::Required => "required",
            Self::Value => "value",
            Self::Invariant => "invariant",
            Self::CodeInvalid => "code-invalid",
            Self::BusinessRule => "business-rule",
            Self::NotSupported => "not-supported",
            Self::NotFound => "not-found",
            Self::Exception => "exception",
            Self::Informational => "informational",
        };
        f.write_str(s)
    }
}

/// Individual validation issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub diagnostics: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Canonical URL of the profile that produced this issue
    #[serde(skip)]
    pub profile: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: IssueSeverity, code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            diagnostics: diagnostics.into(),
            expression: Vec::new(),
            location: Vec::new(),
            details: None,
            profile: None,
        }
    }

    pub fn fatal(code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Fatal, code, diagnostics)
    }

    pub fn error(code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    pub fn warning(code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, code, diagnostics)
    }

    pub fn information(code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, code, diagnostics)
    }

    pub fn with_expression(mut self, path: impl Into<String>) -> Self {
        self.expression.push(path.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location.push(location.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attribute the issue to a profile, tagging the message with its URL.
    pub fn with_profile(mut self, url: &str) -> Self {
        if self.profile.is_none() {
            self.diagnostics = format!("{}{}", self.diagnostics, profile_tag(url));
            self.profile = Some(url.to_string());
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }

    /// The message without any profile tag.
    pub fn base_diagnostics(&self) -> &str {
        match &self.profile {
            Some(url) => self
                .diagnostics
                .strip_suffix(profile_tag(url).as_str())
                .unwrap_or(&self.diagnostics),
            None => &self.diagnostics,
        }
    }

    fn dedup_key(&self) -> (IssueSeverity, IssueCode, String, String) {
        (
            self.severity,
            self.code,
            self.expression.join("|"),
            self.base_diagnostics().to_string(),
        )
    }
}

fn profile_tag(url: &str) -> String {
    format!(" [profile: {url}]")
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.severity, self.code)?;
        if let Some(path) = self.expression.first() {
            write!(f, " {path}")?;
        }
        write!(f, ": {}", self.diagnostics)
    }
}

/// Collapse issues that share severity, code, path and (untagged) message.
///
/// The first occurrence keeps its position. A profile-tagged issue replaces
/// an untagged one with the same key.
pub fn deduplicate(issues: Vec<ValidationIssue>) -> Vec<ValidationIssue> {
    let mut seen: HashMap<(IssueSeverity, IssueCode, String, String), usize> = HashMap::new();
    let mut result: Vec<ValidationIssue> = Vec::with_capacity(issues.len());

    for issue in issues {
        let key = issue.dedup_key();
        match seen.get(&key) {
            Some(&index) => {
                if result[index].profile.is_none() && issue.profile.is_some() {
                    result[index] = issue;
                }
            }
            None => {
                seen.insert(key, result.len());
                result.push(issue);
            }
        }
    }

    result
}

/// The result of one validate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    pub issue: Vec<ValidationIssue>,
}

impl OperationOutcome {
    pub fn new(issue: Vec<ValidationIssue>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue,
        }
    }

    /// Outcome consisting of exactly one issue.
    pub fn single(issue: ValidationIssue) -> Self {
        Self::new(vec![issue])
    }

    /// No fatal or error issues.
    pub fn is_valid(&self) -> bool {
        !self.issue.iter().any(ValidationIssue::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issue.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issue
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
