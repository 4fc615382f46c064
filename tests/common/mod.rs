use octofhir_fhir_validator::*;
use serde_json::{Value, json};
use std::sync::Arc;

pub const BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Snapshot element with id, cardinality and type codes.
#[allow(dead_code)]
pub fn element(path: &str, min: u32, max: &str, types: &[&str]) -> Value {
    let types: Vec<Value> = types.iter().map(|code| json!({"code": code})).collect();
    json!({
        "id": path,
        "path": path,
        "min": min,
        "max": max,
        "type": types
    })
}

/// Add properties (binding, fixed, slicing, ...) to an element.
#[allow(dead_code)]
pub fn with(mut element: Value, extra: Value) -> Value {
    if let (Some(target), Some(source)) = (element.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    element
}

#[allow(dead_code)]
pub fn structure_definition(
    url: &str,
    type_name: &str,
    kind: &str,
    derivation: &str,
    elements: Vec<Value>,
) -> StructureDefinition {
    serde_json::from_value(json!({
        "resourceType": "StructureDefinition",
        "url": url,
        "name": type_name,
        "kind": kind,
        "type": type_name,
        "derivation": derivation,
        "baseDefinition": if derivation == "constraint" {
            json!(format!("{BASE}{type_name}"))
        } else {
            Value::Null
        },
        "snapshot": {"element": elements}
    }))
    .expect("valid StructureDefinition")
}

/// Base resource definition with `id`, `meta` and `extension` in front of `elements`.
#[allow(dead_code)]
pub fn resource(type_name: &str, elements: Vec<Value>) -> StructureDefinition {
    let mut all = vec![
        element(type_name, 0, "*", &[]),
        element(&format!("{type_name}.id"), 0, "1", &["id"]),
        element(&format!("{type_name}.meta"), 0, "1", &["Meta"]),
        element(&format!("{type_name}.extension"), 0, "*", &["Extension"]),
    ];
    all.extend(elements);
    structure_definition(
        &format!("{BASE}{type_name}"),
        type_name,
        "resource",
        "specialization",
        all,
    )
}

/// Profile of `type_name` with a full snapshot.
#[allow(dead_code)]
pub fn profile(url: &str, type_name: &str, elements: Vec<Value>) -> StructureDefinition {
    let mut all = vec![
        element(type_name, 0, "*", &[]),
        element(&format!("{type_name}.id"), 0, "1", &["id"]),
        element(&format!("{type_name}.meta"), 0, "1", &["Meta"]),
        element(&format!("{type_name}.extension"), 0, "*", &["Extension"]),
    ];
    all.extend(elements);
    structure_definition(url, type_name, "resource", "constraint", all)
}

#[allow(dead_code)]
pub fn complex_type(type_name: &str, elements: Vec<Value>) -> StructureDefinition {
    let mut all = vec![
        element(type_name, 0, "*", &[]),
        element(&format!("{type_name}.id"), 0, "1", &["string"]),
        element(&format!("{type_name}.extension"), 0, "*", &["Extension"]),
    ];
    all.extend(elements);
    structure_definition(
        &format!("{BASE}{type_name}"),
        type_name,
        "complex-type",
        "specialization",
        all,
    )
}

/// HumanName, Identifier, Coding and CodeableConcept.
#[allow(dead_code)]
pub fn datatypes() -> Vec<StructureDefinition> {
    vec![
        complex_type(
            "HumanName",
            vec![
                element("HumanName.use", 0, "1", &["code"]),
                element("HumanName.family", 0, "1", &["string"]),
                element("HumanName.given", 0, "*", &["string"]),
            ],
        ),
        complex_type(
            "Identifier",
            vec![
                element("Identifier.use", 0, "1", &["code"]),
                element("Identifier.system", 0, "1", &["uri"]),
                element("Identifier.value", 0, "1", &["string"]),
            ],
        ),
        complex_type(
            "Coding",
            vec![
                element("Coding.system", 0, "1", &["uri"]),
                element("Coding.code", 0, "1", &["code"]),
                element("Coding.display", 0, "1", &["string"]),
            ],
        ),
        complex_type(
            "CodeableConcept",
            vec![
                element("CodeableConcept.coding", 0, "*", &["Coding"]),
                element("CodeableConcept.text", 0, "1", &["string"]),
            ],
        ),
    ]
}

/// Patient with a handful of commonly exercised elements.
#[allow(dead_code)]
pub fn patient() -> StructureDefinition {
    resource(
        "Patient",
        vec![
            element("Patient.identifier", 0, "*", &["Identifier"]),
            element("Patient.active", 0, "1", &["boolean"]),
            element("Patient.name", 0, "*", &["HumanName"]),
            element("Patient.gender", 0, "1", &["code"]),
            element("Patient.birthDate", 0, "1", &["date"]),
            element("Patient.deceased[x]", 0, "1", &["boolean", "dateTime"]),
            element("Patient.contact", 0, "*", &["BackboneElement"]),
            element("Patient.contact.name", 0, "1", &["HumanName"]),
            element("Patient.contact.relationship", 0, "*", &["CodeableConcept"]),
        ],
    )
}

#[allow(dead_code)]
pub fn registry(definitions: Vec<StructureDefinition>) -> Arc<InMemorySchemaRegistry> {
    let registry = InMemorySchemaRegistry::new();
    for definition in datatypes().iter().chain(&definitions) {
        registry
            .register_structure_definition(definition)
            .expect("definition compiles");
    }
    Arc::new(registry)
}

#[allow(dead_code)]
pub fn value_set(url: &str, system: &str, codes: &[(&str, &str)]) -> ValueSet {
    let concepts: Vec<Value> = codes
        .iter()
        .map(|(code, display)| json!({"code": code, "display": display}))
        .collect();
    serde_json::from_value(json!({
        "resourceType": "ValueSet",
        "url": url,
        "compose": {"include": [{"system": system, "concept": concepts}]}
    }))
    .expect("valid ValueSet")
}

#[allow(dead_code)]
pub fn issues(outcome: &OperationOutcome, severity: IssueSeverity, code: IssueCode) -> Vec<&ValidationIssue> {
    outcome
        .issue
        .iter()
        .filter(|i| i.severity == severity && i.code == code)
        .collect()
}

#[allow(dead_code)]
pub fn errors(outcome: &OperationOutcome) -> Vec<&ValidationIssue> {
    outcome.errors().collect()
}
