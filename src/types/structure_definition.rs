//! StructureDefinition wire types.
//!
//! These mirror the JSON shape of FHIR StructureDefinition resources closely
//! enough to deserialize published packages. They are compiled into a
//! [`Schema`](super::Schema) before validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Type information within an element definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementDefinitionType {
    /// FHIR type code (or a FHIRPath system type URL)
    pub code: String,
    /// Profile URLs for this type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<String>,
    /// Target profile URLs for Reference and canonical types
    #[serde(
        rename = "targetProfile",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub target_profile: Vec<String>,
}

/// Constraint definition attached to an element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDefinitionConstraint {
    /// Constraint key (e.g., "ele-1")
    pub key: String,
    /// Severity: error | warning
    #[serde(default = "default_constraint_severity")]
    pub severity: String,
    /// Human-readable description
    #[serde(default)]
    pub human: String,
    /// FHIRPath expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Canonical of the definition the constraint came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn default_constraint_severity() -> String {
    "error".to_string()
}

/// Value set binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDefinitionBinding {
    /// Binding strength: required | extensible | preferred | example
    pub strength: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Value set canonical URL
    #[serde(rename = "valueSet", skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

/// Slicing definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementDefinitionSlicing {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discriminator: Vec<ElementDefinitionDiscriminator>,
    /// closed | open | openAtEnd
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Slicing discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDefinitionDiscriminator {
    /// value | exists | pattern | type | profile
    #[serde(rename = "type")]
    pub type_name: String,
    pub path: String,
}

/// Element definition as found in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementDefinition {
    /// Element id (path with slice names, e.g. "Patient.identifier:mrn.system")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Element path (e.g., "Patient.name")
    pub path: String,
    #[serde(rename = "sliceName", skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementDefinitionSlicing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    /// Maximum cardinality as a string ("1", "*")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(rename = "contentReference", skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<ElementDefinitionType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraint: Vec<ElementDefinitionConstraint>,
    #[serde(rename = "mustSupport", skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementDefinitionBinding>,

    /// fixed\[x\] and pattern\[x\] values, plus any other keys we do not model
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ElementDefinition {
    /// Find the `fixed[x]` value, if any.
    pub fn fixed_value(&self) -> Option<(&str, &Value)> {
        self.prefixed_value("fixed")
    }

    /// Find the `pattern[x]` value, if any.
    pub fn pattern_value(&self) -> Option<(&str, &Value)> {
        self.prefixed_value("pattern")
    }

    fn prefixed_value(&self, prefix: &str) -> Option<(&str, &Value)> {
        self.extra.iter().find_map(|(key, value)| {
            let rest = key.strip_prefix(prefix)?;
            let typed = rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_uppercase());
            typed.then_some((key.as_str(), value))
        })
    }
}

/// Snapshot view of a StructureDefinition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureDefinitionSnapshot {
    pub element: Vec<ElementDefinition>,
}

/// A FHIR StructureDefinition resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinition {
    #[serde(rename = "resourceType", default = "structure_definition_type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub name: String,
    /// primitive-type | complex-type | resource | logical
    pub kind: String,
    #[serde(rename = "abstract", default)]
    pub abstract_type: bool,
    /// Type being defined or constrained
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "baseDefinition", skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,
    /// specialization | constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<StructureDefinitionSnapshot>,
}

fn structure_definition_type() -> String {
    "StructureDefinition".to_string()
}

/// Check if a JSON value represents a StructureDefinition
pub fn is_structure_definition(obj: &Value) -> bool {
    obj.get("resourceType")
        .and_then(|rt| rt.as_str())
        .is_some_and(|rt| rt == "StructureDefinition")
}
