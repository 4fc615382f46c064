//! Compiled schema model.
//!
//! A [`Schema`] is built once from a StructureDefinition snapshot and is
//! read-only afterwards. Parsing of cardinalities, type codes, slicing and
//! slice membership happens here so that validation never re-parses strings.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use super::structure_definition::{ElementDefinition, StructureDefinition};
use crate::error::{Result, ValidatorError};

/// Kind of a StructureDefinition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

impl SchemaKind {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "primitive-type" => Some(Self::PrimitiveType),
            "complex-type" => Some(Self::ComplexType),
            "resource" => Some(Self::Resource),
            "logical" => Some(Self::Logical),
            _ => None,
        }
    }
}

/// Upper cardinality bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Max {
    Bounded(u32),
    Unbounded,
}

impl Max {
    pub fn parse_str(s: &str) -> Option<Self> {
        if s == "*" {
            return Some(Max::Unbounded);
        }
        s.parse().ok().map(Max::Bounded)
    }
}

impl fmt::Display for Max {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Max::Bounded(n) => write!(f, "{n}"),
            Max::Unbounded => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cardinality {
    pub min: u32,
    pub max: Max,
}

impl Cardinality {
    /// Whether more than one value may appear (the JSON form is then an array).
    pub fn allows_many(&self) -> bool {
        match self.max {
            Max::Bounded(n) => n > 1,
            Max::Unbounded => true,
        }
    }

    pub fn exceeded_by(&self, count: usize) -> bool {
        match self.max {
            Max::Bounded(n) => count > n as usize,
            Max::Unbounded => false,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.min, self.max)
    }
}

/// FHIR primitive data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Integer,
    Integer64,
    UnsignedInt,
    PositiveInt,
    Decimal,
    String,
    Markdown,
    Code,
    Id,
    Uri,
    Url,
    Canonical,
    Oid,
    Uuid,
    Base64Binary,
    Instant,
    Date,
    DateTime,
    Time,
    Xhtml,
}

impl PrimitiveType {
    pub fn parse_str(code: &str) -> Option<Self> {
        let primitive = match code {
            "boolean" | "http://hl7.org/fhirpath/System.Boolean" => Self::Boolean,
            "integer" | "http://hl7.org/fhirpath/System.Integer" => Self::Integer,
            "integer64" => Self::Integer64,
            "unsignedInt" => Self::UnsignedInt,
            "positiveInt" => Self::PositiveInt,
            "decimal" | "http://hl7.org/fhirpath/System.Decimal" => Self::Decimal,
            "string" | "http://hl7.org/fhirpath/System.String" => Self::String,
            "markdown" => Self::Markdown,
            "code" => Self::Code,
            "id" => Self::Id,
            "uri" => Self::Uri,
            "url" => Self::Url,
            "canonical" => Self::Canonical,
            "oid" => Self::Oid,
            "uuid" => Self::Uuid,
            "base64Binary" => Self::Base64Binary,
            "instant" => Self::Instant,
            "date" | "http://hl7.org/fhirpath/System.Date" => Self::Date,
            "dateTime" | "http://hl7.org/fhirpath/System.DateTime" => Self::DateTime,
            "time" | "http://hl7.org/fhirpath/System.Time" => Self::Time,
            "xhtml" => Self::Xhtml,
            _ => return None,
        };
        Some(primitive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Integer64 => "integer64",
            Self::UnsignedInt => "unsignedInt",
            Self::PositiveInt => "positiveInt",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Markdown => "markdown",
            Self::Code => "code",
            Self::Id => "id",
            Self::Uri => "uri",
            Self::Url => "url",
            Self::Canonical => "canonical",
            Self::Oid => "oid",
            Self::Uuid => "uuid",
            Self::Base64Binary => "base64Binary",
            Self::Instant => "instant",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Time => "time",
            Self::Xhtml => "xhtml",
        }
    }
}

/// A type code as declared on an element.
///
/// The named variants are the codes the validator dispatches on; every other
/// data type or resource name falls into [`TypeCode::Complex`] and is
/// validated through its own schema when the registry knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Primitive(PrimitiveType),
    Extension,
    BackboneElement,
    Element,
    CodeableConcept,
    Coding,
    Quantity,
    Reference,
    Resource,
    Complex(String),
}

impl TypeCode {
    pub fn parse_str(code: &str) -> Self {
        if let Some(primitive) = PrimitiveType::parse_str(code) {
            return TypeCode::Primitive(primitive);
        }
        match code {
            "Extension" => TypeCode::Extension,
            "BackboneElement" => TypeCode::BackboneElement,
            "Element" => TypeCode::Element,
            "CodeableConcept" => TypeCode::CodeableConcept,
            "Coding" => TypeCode::Coding,
            "Quantity" => TypeCode::Quantity,
            "Reference" => TypeCode::Reference,
            "Resource" => TypeCode::Resource,
            other => TypeCode::Complex(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TypeCode::Primitive(p) => p.as_str(),
            TypeCode::Extension => "Extension",
            TypeCode::BackboneElement => "BackboneElement",
            TypeCode::Element => "Element",
            TypeCode::CodeableConcept => "CodeableConcept",
            TypeCode::Coding => "Coding",
            TypeCode::Quantity => "Quantity",
            TypeCode::Reference => "Reference",
            TypeCode::Resource => "Resource",
            TypeCode::Complex(name) => name,
        }
    }

    /// Suffix used by choice elements, e.g. `dateTime` -> `DateTime`.
    pub fn choice_suffix(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementType {
    pub code: TypeCode,
    pub profiles: Vec<String>,
    pub target_profiles: Vec<String>,
}

/// FHIR binding strength levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrength {
    /// Code MUST be from the value set
    Required,
    /// Code SHOULD be from the value set, but others allowed with text
    Extensible,
    /// Code SHOULD be from the value set for interoperability
    Preferred,
    /// Value set is just an example
    Example,
}

impl BindingStrength {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "required" => Some(BindingStrength::Required),
            "extensible" => Some(BindingStrength::Extensible),
            "preferred" => Some(BindingStrength::Preferred),
            "example" => Some(BindingStrength::Example),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStrength::Required => "required",
            BindingStrength::Extensible => "extensible",
            BindingStrength::Preferred => "preferred",
            BindingStrength::Example => "example",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub strength: BindingStrength,
    pub value_set: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicingRules {
    Open,
    Closed,
    OpenAtEnd,
}

impl SlicingRules {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "openAtEnd" => Some(Self::OpenAtEnd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscriminatorType {
    Value,
    Exists,
    Pattern,
    Type,
    Profile,
}

impl DiscriminatorType {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "value" => Some(Self::Value),
            "exists" => Some(Self::Exists),
            "pattern" => Some(Self::Pattern),
            "type" => Some(Self::Type),
            "profile" => Some(Self::Profile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discriminator {
    pub kind: DiscriminatorType,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slicing {
    pub discriminators: Vec<Discriminator>,
    pub rules: SlicingRules,
    pub ordered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub key: String,
    pub severity: ConstraintSeverity,
    pub human: String,
    pub expression: Option<String>,
    pub source: Option<String>,
}

/// A `fixed[x]` or `pattern[x]` value together with the key it was declared under.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueConstraint {
    pub key: String,
    pub value: Value,
}

/// One compiled element of a schema snapshot.
#[derive(Debug, Clone)]
pub struct SchemaElement {
    pub id: String,
    pub path: String,
    /// Last path segment, e.g. `value[x]`
    pub name: String,
    pub slice_name: Option<String>,
    pub cardinality: Cardinality,
    pub types: Vec<ElementType>,
    pub binding: Option<Binding>,
    pub slicing: Option<Slicing>,
    pub fixed: Option<ValueConstraint>,
    pub pattern: Option<ValueConstraint>,
    pub must_support: bool,
    pub constraints: Vec<Constraint>,
    pub content_reference: Option<String>,
    /// Index of the slice root element this element belongs to, if any
    pub slice_owner: Option<usize>,
}

impl SchemaElement {
    pub fn is_choice(&self) -> bool {
        self.name.ends_with("[x]")
    }

    /// Field name without the `[x]` marker.
    pub fn base_name(&self) -> &str {
        self.name.strip_suffix("[x]").unwrap_or(&self.name)
    }

    /// Elements that define a slice or live inside one are only checked via slicing.
    pub fn is_slice_scoped(&self) -> bool {
        self.slice_name.is_some() || self.slice_owner.is_some()
    }

    /// Concrete JSON property names a choice element may appear as.
    pub fn choice_candidates(&self) -> Vec<String> {
        let base = self.base_name();
        self.types
            .iter()
            .map(|t| format!("{}{}", base, t.code.choice_suffix()))
            .collect()
    }

    /// The declared type whose choice suffix matches `suffix`.
    pub fn type_for_choice_suffix(&self, suffix: &str) -> Option<&ElementType> {
        self.types.iter().find(|t| t.code.choice_suffix() == suffix)
    }

    pub fn has_type(&self, code: &TypeCode) -> bool {
        self.types.iter().any(|t| &t.code == code)
    }

    fn compile(raw: &ElementDefinition, id: String) -> Result<Self> {
        let name = raw
            .path
            .rsplit('.')
            .next()
            .unwrap_or(raw.path.as_str())
            .to_string();

        let max = match raw.max.as_deref() {
            Some(max) => Max::parse_str(max).ok_or_else(|| {
                ValidatorError::schema(format!("Invalid max cardinality '{max}' on {}", raw.path))
            })?,
            None => Max::Bounded(1),
        };

        let types = raw
            .types
            .iter()
            .map(|t| ElementType {
                code: TypeCode::parse_str(&t.code),
                profiles: t.profile.clone(),
                target_profiles: t.target_profile.clone(),
            })
            .collect();

        let binding = raw.binding.as_ref().and_then(|b| {
            BindingStrength::parse_str(&b.strength).map(|strength| Binding {
                strength,
                value_set: b.value_set.clone(),
            })
        });

        let slicing = raw.slicing.as_ref().map(|s| Slicing {
            discriminators: s
                .discriminator
                .iter()
                .filter_map(|d| {
                    let kind = DiscriminatorType::parse_str(&d.type_name);
                    if kind.is_none() {
                        tracing::debug!(
                            "Ignoring unsupported discriminator type '{}' on {}",
                            d.type_name,
                            raw.path
                        );
                    }
                    kind.map(|kind| Discriminator {
                        kind,
                        path: d.path.clone(),
                    })
                })
                .collect(),
            rules: s
                .rules
                .as_deref()
                .and_then(SlicingRules::parse_str)
                .unwrap_or(SlicingRules::Open),
            ordered: s.ordered.unwrap_or(false),
        });

        let constraints = raw
            .constraint
            .iter()
            .map(|c| Constraint {
                key: c.key.clone(),
                severity: if c.severity == "warning" {
                    ConstraintSeverity::Warning
                } else {
                    ConstraintSeverity::Error
                },
                human: c.human.clone(),
                expression: c.expression.clone(),
                source: c.source.clone(),
            })
            .collect();

        let to_constraint = |(key, value): (&str, &Value)| ValueConstraint {
            key: key.to_string(),
            value: value.clone(),
        };

        Ok(Self {
            id,
            path: raw.path.clone(),
            name,
            slice_name: raw.slice_name.clone(),
            cardinality: Cardinality {
                min: raw.min.unwrap_or(0),
                max,
            },
            types,
            binding,
            slicing,
            fixed: raw.fixed_value().map(to_constraint),
            pattern: raw.pattern_value().map(to_constraint),
            must_support: raw.must_support.unwrap_or(false),
            constraints,
            content_reference: raw.content_reference.clone(),
            slice_owner: None,
        })
    }
}

/// A slice of a repeating element, derived from the element list.
#[derive(Debug, Clone)]
pub struct Slice<'a> {
    pub name: &'a str,
    pub index: usize,
    pub element: &'a SchemaElement,
    pub children: Vec<&'a SchemaElement>,
}

impl Slice<'_> {
    pub fn cardinality(&self) -> Cardinality {
        self.element.cardinality
    }
}

/// A compiled StructureDefinition.
#[derive(Debug, Clone)]
pub struct Schema {
    pub url: String,
    pub version: Option<String>,
    pub name: String,
    pub type_name: String,
    pub kind: SchemaKind,
    pub is_abstract: bool,
    pub base_definition: Option<String>,
    pub derivation: Option<String>,
    pub elements: Vec<SchemaElement>,
    children: HashMap<String, Vec<usize>>,
}

impl Schema {
    /// Compile a StructureDefinition snapshot.
    pub fn compile(sd: &StructureDefinition) -> Result<Self> {
        let kind = SchemaKind::parse_str(&sd.kind).ok_or_else(|| {
            ValidatorError::schema(format!("Unknown StructureDefinition kind '{}'", sd.kind))
        })?;
        let raw_elements = sd
            .snapshot
            .as_ref()
            .map(|s| s.element.as_slice())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                ValidatorError::schema(format!("StructureDefinition {} has no snapshot", sd.url))
            })?;

        let ids = assign_element_ids(raw_elements);
        let mut elements = raw_elements
            .iter()
            .zip(ids)
            .map(|(raw, id)| SchemaElement::compile(raw, id))
            .collect::<Result<Vec<_>>>()?;

        link_slice_owners(&mut elements);

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, element) in elements.iter().enumerate().skip(1) {
            if element.is_slice_scoped() {
                continue;
            }
            if let Some((parent, _)) = element.path.rsplit_once('.') {
                children.entry(parent.to_string()).or_default().push(index);
            }
        }

        Ok(Self {
            url: sd.url.clone(),
            version: sd.version.clone(),
            name: sd.name.clone(),
            type_name: sd.type_name.clone(),
            kind,
            is_abstract: sd.abstract_type,
            base_definition: sd.base_definition.clone(),
            derivation: sd.derivation.clone(),
            elements,
            children,
        })
    }

    /// Whether this schema constrains another definition rather than defining a type.
    pub fn is_profile(&self) -> bool {
        self.derivation.as_deref() == Some("constraint")
    }

    pub fn root(&self) -> &SchemaElement {
        &self.elements[0]
    }

    /// Direct, non-slice children of the element at `path`.
    pub fn children_of(&self, path: &str) -> impl Iterator<Item = (usize, &SchemaElement)> {
        self.children
            .get(path)
            .into_iter()
            .flatten()
            .map(|&index| (index, &self.elements[index]))
    }

    pub fn has_children(&self, path: &str) -> bool {
        self.children.get(path).is_some_and(|c| !c.is_empty())
    }

    /// Slices declared for the sliced element at `index`, in declaration order.
    pub fn slices_of(&self, index: usize) -> Vec<Slice<'_>> {
        let sliced = &self.elements[index];
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.path == sliced.path && e.slice_owner == sliced.slice_owner && e.slice_name.is_some()
            })
            .map(|(slice_index, element)| Slice {
                name: element.slice_name.as_deref().unwrap_or_default(),
                index: slice_index,
                element,
                children: self
                    .elements
                    .iter()
                    .filter(|c| c.slice_owner == Some(slice_index))
                    .collect(),
            })
            .collect()
    }
}

/// Use declared element ids, deriving one from the enclosing slice when absent.
fn assign_element_ids(raw: &[ElementDefinition]) -> Vec<String> {
    let mut open_slices: Vec<(String, String)> = Vec::new();
    let mut ids = Vec::with_capacity(raw.len());

    for element in raw {
        while let Some((path, _)) = open_slices.last() {
            let inside = element
                .path
                .strip_prefix(path.as_str())
                .is_some_and(|rest| rest.starts_with('.'));
            if inside {
                break;
            }
            open_slices.pop();
        }

        let id = match &element.id {
            Some(id) => id.clone(),
            None => {
                let base = match open_slices.last() {
                    Some((path, id)) => format!("{id}{}", &element.path[path.len()..]),
                    None => element.path.clone(),
                };
                match &element.slice_name {
                    Some(slice) => format!("{base}:{slice}"),
                    None => base,
                }
            }
        };

        if element.slice_name.is_some() {
            open_slices.push((element.path.clone(), id.clone()));
        }
        ids.push(id);
    }

    ids
}

/// Record for every element the index of the nearest enclosing slice root.
fn link_slice_owners(elements: &mut [SchemaElement]) {
    let index_by_id: HashMap<String, usize> = elements
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.clone(), i))
        .collect();

    for element in elements.iter_mut() {
        let segments: Vec<&str> = element.id.split('.').collect();
        element.slice_owner = (1..segments.len()).rev().find_map(|k| {
            if !segments[k - 1].contains(':') {
                return None;
            }
            index_by_id.get(&segments[..k].join(".")).copied()
        });
    }
}
