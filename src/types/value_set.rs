//! ValueSet and CodeSystem wire types used by the local terminology fallback.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSet {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ValueSetCompose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ValueSetExpansion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueSetCompose {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<ValueSetInclude>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ValueSetInclude>,
}

/// A compose include/exclude entry.
///
/// An entry with a system and no concepts or filters refers to the whole code system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueSetInclude {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<ValueSetConcept>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<serde_json::Value>,
    #[serde(rename = "valueSet", default, skip_serializing_if = "Vec::is_empty")]
    pub value_set: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSetConcept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueSetExpansion {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ValueSetContains>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSetContains {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ValueSetContains>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSystem {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSystemConcept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
}

impl CodeSystem {
    /// Look up a concept anywhere in the (possibly nested) concept hierarchy.
    pub fn find_concept(&self, code: &str) -> Option<&CodeSystemConcept> {
        fn walk<'a>(
            concepts: &'a [CodeSystemConcept],
            code: &str,
        ) -> Option<&'a CodeSystemConcept> {
            concepts.iter().find_map(|c| {
                if c.code == code {
                    Some(c)
                } else {
                    walk(&c.concept, code)
                }
            })
        }
        walk(&self.concept, code)
    }
}
