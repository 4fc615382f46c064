pub mod issue;
pub mod schema;
pub mod structure_definition;
pub mod value_set;

pub use issue::{IssueCode, IssueSeverity, OperationOutcome, ValidationIssue, deduplicate};
pub use schema::{
    Binding, BindingStrength, Cardinality, Constraint, ConstraintSeverity, Discriminator,
    DiscriminatorType, ElementType, Max, PrimitiveType, Schema, SchemaElement, SchemaKind, Slice,
    Slicing, SlicingRules, TypeCode, ValueConstraint,
};
pub use structure_definition::{
    ElementDefinition, ElementDefinitionBinding, ElementDefinitionConstraint,
    ElementDefinitionDiscriminator, ElementDefinitionSlicing, ElementDefinitionType,
    StructureDefinition, StructureDefinitionSnapshot, is_structure_definition,
};
pub use value_set::{
    CodeSystem, CodeSystemConcept, ValueSet, ValueSetCompose, ValueSetConcept, ValueSetContains,
    ValueSetExpansion, ValueSetInclude,
};
