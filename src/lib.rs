//! # OctoFHIR FHIR Validator
//!
//! Profile-aware validation of FHIR resources (as `serde_json::Value`)
//! against StructureDefinitions.
//!
//! ## Features
//!
//! - **Structure**: cardinality, primitive and complex types, choice elements, unknown elements
//! - **Slicing**: value/pattern/exists/type/profile discriminators, closed and openAtEnd rules
//! - **Fixed and pattern values**, extensions and global element invariants
//! - **Constraints**: expressions evaluated through a pluggable [`ConstraintEvaluator`]
//! - **Terminology**: bindings checked against an external service (cached) or local ValueSets
//! - **Profiles**: `meta.profile` and explicit profile overrides, mustSupport reporting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_fhir_validator::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let registry = InMemorySchemaRegistry::new().with_definition_paths(["definitions/"]);
//! let validator = FhirValidator::builder(Arc::new(registry)).build()?;
//!
//! let patient = serde_json::json!({"resourceType": "Patient", "active": true});
//! let outcome = validator.validate(&patient).await;
//! println!("{}", serde_json::to_string_pretty(&outcome)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod registry;
pub mod terminology;
pub mod types;
pub mod validation;
pub mod validator;

pub use config::{CacheConfig, ValidationLevel, ValidationOptions, ValidatorConfig};
pub use error::{Result, ValidatorError};
pub use evaluator::{
    ConstraintEvaluator, ConstraintOutcome, ConstraintVerdict, EvaluationContext,
    evaluate_constraint,
};
pub use registry::{InMemorySchemaRegistry, SchemaRegistry};
pub use terminology::{
    CacheStats, CachedTerminologyService, CodeValidationResult, InMemoryTerminologyService,
    LocalValueSetResolver, TerminologyError, TerminologyErrorCode, TerminologyResult,
    TerminologyService,
};
pub use types::*;
pub use validation::{IssueCollector, ValidationContext};
pub use validator::{FhirValidator, FhirValidatorBuilder};
