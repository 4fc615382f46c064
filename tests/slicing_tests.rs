mod common;

use common::*;
use octofhir_fhir_validator::*;
use serde_json::{Value, json};

const MRN: &str = "http://example.org/mrn";
const PROFILE: &str = "http://example.org/StructureDefinition/sliced-patient";

fn slice(path: &str, name: &str, min: u32, max: &str, types: &[&str]) -> Value {
    with(
        element(path, min, max, types),
        json!({"id": format!("{path}:{name}"), "sliceName": name}),
    )
}

fn in_slice(id: &str, path: &str, min: u32, max: &str, types: &[&str], extra: Value) -> Value {
    with(with(element(path, min, max, types), json!({"id": id})), extra)
}

/// Patient profile slicing `identifier` by `system` with one `mrn` slice.
fn identifier_profile(rules: &str, ordered: bool, extra_slices: Vec<Value>) -> StructureDefinition {
    let mut elements = vec![
        with(
            element("Patient.identifier", 0, "*", &["Identifier"]),
            json!({"slicing": {
                "discriminator": [{"type": "value", "path": "system"}],
                "rules": rules,
                "ordered": ordered
            }}),
        ),
        element("Patient.identifier.system", 0, "1", &["uri"]),
        element("Patient.identifier.value", 0, "1", &["string"]),
        slice("Patient.identifier", "mrn", 0, "1", &["Identifier"]),
        in_slice(
            "Patient.identifier:mrn.system",
            "Patient.identifier.system",
            1,
            "1",
            &["uri"],
            json!({"fixedUri": MRN}),
        ),
        in_slice(
            "Patient.identifier:mrn.value",
            "Patient.identifier.value",
            1,
            "1",
            &["string"],
            json!({}),
        ),
    ];
    elements.extend(extra_slices);
    profile(PROFILE, "Patient", elements)
}

fn tagged(resource: Value) -> Value {
    let mut resource = resource;
    resource["meta"] = json!({"profile": [PROFILE]});
    resource
}

#[tokio::test]
async fn test_required_slice_missing() {
    let name_profile = profile(
        PROFILE,
        "Patient",
        vec![
            with(
                element("Patient.name", 0, "*", &["HumanName"]),
                json!({"slicing": {"discriminator": [{"type": "value", "path": "use"}], "rules": "open"}}),
            ),
            slice("Patient.name", "official", 1, "1", &["HumanName"]),
            in_slice(
                "Patient.name:official.use",
                "Patient.name.use",
                1,
                "1",
                &["code"],
                json!({"fixedCode": "official"}),
            ),
        ],
    );
    let validator = FhirValidator::new(registry(vec![patient(), name_profile]));
    let resource = json!({"resourceType": "Patient", "name": [{"family": "G", "given": ["M"]}]});

    let base = validator.validate(&resource).await;
    assert!(base.is_valid());

    let options = ValidationOptions::default().with_profile(PROFILE);
    let profiled = validator.validate_with_options(&resource, &options).await;
    let required = issues(&profiled, IssueSeverity::Error, IssueCode::Required);
    assert_eq!(errors(&profiled).len(), 1);
    assert!(required[0].diagnostics.contains("official"));
    assert!(required[0].diagnostics.ends_with(&format!("[profile: {PROFILE}]")));

    let with_official = json!({
        "resourceType": "Patient",
        "name": [{"family": "G"}, {"use": "official", "family": "Green"}]
    });
    assert!(
        validator
            .validate_with_options(&with_official, &options)
            .await
            .is_valid()
    );
}

#[tokio::test]
async fn test_closed_slicing_rejects_unmatched_items() {
    let resource = tagged(json!({
        "resourceType": "Patient",
        "identifier": [
            {"system": MRN, "value": "1"},
            {"system": "http://example.org/other", "value": "2"}
        ]
    }));

    let closed = FhirValidator::new(registry(vec![patient(), identifier_profile("closed", false, vec![])]));
    let outcome = closed.validate(&resource).await;
    let structure = issues(&outcome, IssueSeverity::Error, IssueCode::Structure);
    assert_eq!(errors(&outcome).len(), 1, "{:?}", errors(&outcome));
    assert_eq!(structure[0].expression, vec!["Patient.identifier[1]".to_string()]);

    let open = FhirValidator::new(registry(vec![patient(), identifier_profile("open", false, vec![])]));
    assert!(open.validate(&resource).await.is_valid());
}

#[tokio::test]
async fn test_open_at_end() {
    let validator = FhirValidator::new(registry(vec![
        patient(),
        identifier_profile("openAtEnd", false, vec![]),
    ]));

    let trailing = tagged(json!({
        "resourceType": "Patient",
        "identifier": [{"system": MRN, "value": "1"}, {"system": "http://example.org/other"}]
    }));
    assert!(validator.validate(&trailing).await.is_valid());

    let leading = tagged(json!({
        "resourceType": "Patient",
        "identifier": [{"system": "http://example.org/other"}, {"system": MRN, "value": "1"}]
    }));
    let outcome = validator.validate(&leading).await;
    assert_eq!(errors(&outcome).len(), 1);
    assert_eq!(errors(&outcome)[0].expression, vec!["Patient.identifier[0]".to_string()]);
}

#[tokio::test]
async fn test_slice_maximum() {
    let validator = FhirValidator::new(registry(vec![
        patient(),
        identifier_profile("open", false, vec![]),
    ]));
    let outcome = validator
        .validate(&tagged(json!({
            "resourceType": "Patient",
            "identifier": [{"system": MRN, "value": "1"}, {"system": MRN, "value": "2"}]
        })))
        .await;

    let value = issues(&outcome, IssueSeverity::Error, IssueCode::Value);
    assert_eq!(errors(&outcome).len(), 1);
    assert!(value[0].diagnostics.contains("'mrn'"));
}

#[tokio::test]
async fn test_ordered_slicing() {
    let ssn = vec![
        slice("Patient.identifier", "ssn", 0, "1", &["Identifier"]),
        in_slice(
            "Patient.identifier:ssn.system",
            "Patient.identifier.system",
            1,
            "1",
            &["uri"],
            json!({"fixedUri": "http://example.org/ssn"}),
        ),
    ];
    let validator = FhirValidator::new(registry(vec![patient(), identifier_profile("open", true, ssn)]));

    let in_order = tagged(json!({
        "resourceType": "Patient",
        "identifier": [{"system": MRN, "value": "1"}, {"system": "http://example.org/ssn"}]
    }));
    assert!(validator.validate(&in_order).await.is_valid());

    let reversed = tagged(json!({
        "resourceType": "Patient",
        "identifier": [{"system": "http://example.org/ssn"}, {"system": MRN, "value": "1"}]
    }));
    let outcome = validator.validate(&reversed).await;
    assert_eq!(errors(&outcome).len(), 1);
    assert_eq!(errors(&outcome)[0].expression, vec!["Patient.identifier[1]".to_string()]);
}

#[tokio::test]
async fn test_slice_contents_are_opt_in() {
    let validator = FhirValidator::new(registry(vec![
        patient(),
        identifier_profile("open", false, vec![]),
    ]));
    let resource = tagged(json!({
        "resourceType": "Patient",
        "identifier": [{"system": MRN}]
    }));

    assert!(validator.validate(&resource).await.is_valid());

    let options = ValidationOptions::default().with_slice_contents(true);
    let outcome = validator.validate_with_options(&resource, &options).await;
    let required = issues(&outcome, IssueSeverity::Error, IssueCode::Required);
    assert_eq!(errors(&outcome).len(), 1);
    assert_eq!(required[0].expression, vec!["Patient.identifier[0].value".to_string()]);
}

#[tokio::test]
async fn test_exists_discriminator() {
    let definition = profile(
        PROFILE,
        "Patient",
        vec![
            with(
                element("Patient.identifier", 0, "*", &["Identifier"]),
                json!({"slicing": {"discriminator": [{"type": "exists", "path": "value"}], "rules": "open"}}),
            ),
            slice("Patient.identifier", "valued", 1, "*", &["Identifier"]),
        ],
    );
    let validator = FhirValidator::new(registry(vec![patient(), definition]));

    let without = validator
        .validate(&tagged(json!({"resourceType": "Patient", "identifier": [{"system": MRN}]})))
        .await;
    assert_eq!(issues(&without, IssueSeverity::Error, IssueCode::Required).len(), 1);

    let with_value = validator
        .validate(&tagged(json!({"resourceType": "Patient", "identifier": [{"value": "1"}]})))
        .await;
    assert!(with_value.is_valid());
}

#[tokio::test]
async fn test_pattern_discriminator_on_this() {
    let vitals = json!({"coding": [{"system": "http://terminology.hl7.org/CodeSystem/observation-category", "code": "vital-signs"}]});
    let definition = profile(
        "http://example.org/StructureDefinition/vitals",
        "Observation",
        vec![
            with(
                element("Observation.category", 0, "*", &["CodeableConcept"]),
                json!({"slicing": {"discriminator": [{"type": "pattern", "path": "$this"}], "rules": "open"}}),
            ),
            with(
                slice("Observation.category", "VSCat", 1, "1", &["CodeableConcept"]),
                json!({"patternCodeableConcept": vitals}),
            ),
        ],
    );
    let base = resource(
        "Observation",
        vec![element("Observation.category", 0, "*", &["CodeableConcept"])],
    );
    let validator = FhirValidator::new(registry(vec![base, definition]));
    let options =
        ValidationOptions::default().with_profile("http://example.org/StructureDefinition/vitals");

    let matching = json!({
        "resourceType": "Observation",
        "category": [{"coding": [{
            "system": "http://terminology.hl7.org/CodeSystem/observation-category",
            "code": "vital-signs",
            "display": "Vital Signs"
        }]}]
    });
    assert!(validator.validate_with_options(&matching, &options).await.is_valid());

    let other = json!({
        "resourceType": "Observation",
        "category": [{"text": "laboratory"}]
    });
    let outcome = validator.validate_with_options(&other, &options).await;
    assert_eq!(issues(&outcome, IssueSeverity::Error, IssueCode::Required).len(), 1);
}

#[tokio::test]
async fn test_type_discriminator() {
    let bundle = resource(
        "Bundle",
        vec![
            element("Bundle.type", 1, "1", &["code"]),
            element("Bundle.entry", 0, "*", &["BackboneElement"]),
            element("Bundle.entry.resource", 0, "1", &["Resource"]),
        ],
    );
    let patients_only = profile(
        "http://example.org/StructureDefinition/patient-bundle",
        "Bundle",
        vec![
            element("Bundle.type", 1, "1", &["code"]),
            with(
                element("Bundle.entry", 0, "*", &["BackboneElement"]),
                json!({"slicing": {"discriminator": [{"type": "type", "path": "resource"}], "rules": "closed"}}),
            ),
            element("Bundle.entry.resource", 0, "1", &["Resource"]),
            slice("Bundle.entry", "patient", 0, "*", &["BackboneElement"]),
            in_slice(
                "Bundle.entry:patient.resource",
                "Bundle.entry.resource",
                1,
                "1",
                &["Patient"],
                json!({}),
            ),
        ],
    );
    let validator = FhirValidator::new(registry(vec![patient(), bundle, patients_only]));
    let outcome = validator
        .validate(&json!({
            "resourceType": "Bundle",
            "meta": {"profile": ["http://example.org/StructureDefinition/patient-bundle"]},
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Patient", "active": true}},
                {"resource": {"resourceType": "Observation", "status": "final"}}
            ]
        }))
        .await;

    let structure = issues(&outcome, IssueSeverity::Error, IssueCode::Structure);
    assert_eq!(errors(&outcome).len(), 1, "{:?}", errors(&outcome));
    assert_eq!(structure[0].expression, vec!["Bundle.entry[1]".to_string()]);
}

#[tokio::test]
async fn test_extension_slices_match_on_profile_url() {
    let birth_place = "http://hl7.org/fhir/StructureDefinition/patient-birthPlace";
    let definition = structure_definition(
        PROFILE,
        "Patient",
        "resource",
        "constraint",
        vec![
            element("Patient", 0, "*", &[]),
            element("Patient.meta", 0, "1", &["Meta"]),
            with(
                element("Patient.extension", 0, "*", &["Extension"]),
                json!({"slicing": {"discriminator": [{"type": "value", "path": "url"}], "rules": "closed"}}),
            ),
            with(
                slice("Patient.extension", "birthPlace", 0, "1", &[]),
                json!({"type": [{"code": "Extension", "profile": [birth_place]}]}),
            ),
        ],
    );
    let validator = FhirValidator::new(registry(vec![patient(), definition]));

    let outcome = validator
        .validate(&tagged(json!({
            "resourceType": "Patient",
            "extension": [
                {"url": birth_place, "valueString": "Springfield"},
                {"url": "http://example.org/unexpected", "valueBoolean": true}
            ]
        })))
        .await;

    let structure = issues(&outcome, IssueSeverity::Error, IssueCode::Structure);
    assert_eq!(errors(&outcome).len(), 1, "{:?}", errors(&outcome));
    assert_eq!(structure[0].expression, vec!["Patient.extension[1]".to_string()]);
}
