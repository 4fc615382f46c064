//! Validator facade.
//!
//! One [`FhirValidator`] owns the registry handle, the optional terminology
//! service (wrapped in its own cache) and the optional constraint evaluator.
//! Each `validate` call runs the passes in a fixed order and returns a single
//! [`OperationOutcome`].

use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{ValidationOptions, ValidatorConfig};
use crate::error::Result;
use crate::evaluator::ConstraintEvaluator;
use crate::registry::SchemaRegistry;
use crate::terminology::{
    CacheStats, CachedTerminologyService, LocalValueSetResolver, TerminologyService,
};
use crate::types::{IssueCode, OperationOutcome, Schema, ValidationIssue, deduplicate};
use crate::validation::constraints::check_constraints;
use crate::validation::invariants::check_global_invariants;
use crate::validation::must_support::check_must_support;
use crate::validation::{BindingChecker, ElementValidator, IssueCollector, ValidationContext};

pub struct FhirValidatorBuilder {
    registry: Arc<dyn SchemaRegistry>,
    terminology: Option<Arc<dyn TerminologyService>>,
    evaluator: Option<Arc<dyn ConstraintEvaluator>>,
    config: ValidatorConfig,
}

impl FhirValidatorBuilder {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry,
            terminology: None,
            evaluator: None,
            config: ValidatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Default options used by [`FhirValidator::validate`].
    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.config.options = options;
        self
    }

    /// External terminology service; lookups are cached per validator.
    pub fn with_terminology_service(mut self, service: Arc<dyn TerminologyService>) -> Self {
        self.terminology = Some(service);
        self
    }

    pub fn with_constraint_evaluator(mut self, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn build(self) -> Result<FhirValidator> {
        self.config.validate()?;

        let terminology = self.terminology.map(|service| {
            Arc::new(CachedTerminologyService::new(
                service,
                self.config.terminology_cache.clone(),
            ))
        });

        Ok(FhirValidator {
            local_terminology: LocalValueSetResolver::new(self.registry.clone()),
            registry: self.registry,
            terminology,
            evaluator: self.evaluator,
            config: self.config,
        })
    }
}

pub struct FhirValidator {
    registry: Arc<dyn SchemaRegistry>,
    terminology: Option<Arc<CachedTerminologyService>>,
    local_terminology: LocalValueSetResolver,
    evaluator: Option<Arc<dyn ConstraintEvaluator>>,
    config: ValidatorConfig,
}

impl std::fmt::Debug for FhirValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirValidator")
            .field("config", &self.config)
            .field("terminology", &self.terminology.is_some())
            .field("evaluator", &self.evaluator.is_some())
            .finish_non_exhaustive()
    }
}

impl FhirValidator {
    /// Validator with default configuration and no external collaborators.
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            local_terminology: LocalValueSetResolver::new(registry.clone()),
            registry,
            terminology: None,
            evaluator: None,
            config: ValidatorConfig::default(),
        }
    }

    pub fn builder(registry: Arc<dyn SchemaRegistry>) -> FhirValidatorBuilder {
        FhirValidatorBuilder::new(registry)
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub async fn validate(&self, resource: &Value) -> OperationOutcome {
        self.validate_with_options(resource, &self.config.options).await
    }

    pub async fn validate_with_options(
        &self,
        resource: &Value,
        options: &ValidationOptions,
    ) -> OperationOutcome {
        self.run(resource, options, None).await
    }

    /// Like [`validate_with_options`](Self::validate_with_options), recording
    /// `location` (typically a file name) on every issue.
    pub async fn validate_with_location(
        &self,
        resource: &Value,
        options: &ValidationOptions,
        location: impl Into<String>,
    ) -> OperationOutcome {
        self.run(resource, options, Some(location.into())).await
    }

    pub async fn is_valid(&self, resource: &Value) -> bool {
        self.validate(resource).await.is_valid()
    }

    pub async fn is_valid_with_options(&self, resource: &Value, options: &ValidationOptions) -> bool {
        self.validate_with_options(resource, options).await.is_valid()
    }

    /// Validate resources one after another.
    pub async fn validate_batch(&self, resources: &[Value]) -> Vec<OperationOutcome> {
        self.validate_batch_with_options(resources, &self.config.options)
            .await
    }

    pub async fn validate_batch_with_options(
        &self,
        resources: &[Value],
        options: &ValidationOptions,
    ) -> Vec<OperationOutcome> {
        let mut outcomes = Vec::with_capacity(resources.len());
        for resource in resources {
            outcomes.push(self.validate_with_options(resource, options).await);
        }
        outcomes
    }

    /// Validate up to `batch_concurrency` resources at a time; outcomes keep input order.
    pub async fn validate_batch_concurrent(&self, resources: &[Value]) -> Vec<OperationOutcome> {
        self.validate_batch_concurrent_with_options(resources, &self.config.options)
            .await
    }

    pub async fn validate_batch_concurrent_with_options(
        &self,
        resources: &[Value],
        options: &ValidationOptions,
    ) -> Vec<OperationOutcome> {
        stream::iter(
            resources
                .iter()
                .map(|resource| self.validate_with_options(resource, options)),
        )
        .buffered(self.config.batch_concurrency.max(1))
        .collect()
        .await
    }

    /// Statistics of the terminology cache, when a terminology service is configured.
    pub async fn terminology_cache_stats(&self) -> Option<CacheStats> {
        let service = self.terminology.as_ref()?;
        service.sync().await;
        Some(service.cache_stats())
    }

    pub fn clear_terminology_cache(&self) {
        if let Some(service) = &self.terminology {
            service.clear_cache();
        }
    }

    async fn run(
        &self,
        resource: &Value,
        options: &ValidationOptions,
        location: Option<String>,
    ) -> OperationOutcome {
        let Some(object) = resource.as_object() else {
            return OperationOutcome::single(ValidationIssue::fatal(
                IssueCode::Invalid,
                "Resource must be a JSON object",
            ));
        };
        let Some(resource_type) = object.get("resourceType").and_then(Value::as_str) else {
            return OperationOutcome::single(
                ValidationIssue::fatal(IssueCode::Required, "Resource is missing 'resourceType'")
                    .with_expression("resourceType"),
            );
        };

        if let Err(error) = self.registry.initialize().await {
            warn!("Schema registry initialization failed: {}", error);
            return OperationOutcome::single(ValidationIssue::fatal(
                IssueCode::Exception,
                format!("Schema registry could not be initialized: {error}"),
            ));
        }

        let Some(base) = self.registry.get_schema(resource_type) else {
            return OperationOutcome::single(
                ValidationIssue::fatal(
                    IssueCode::NotSupported,
                    format!("No schema found for resource type '{resource_type}'"),
                )
                .with_expression(resource_type),
            );
        };

        let ctx = ValidationContext::new(resource, resource_type).with_location(location);
        let mut sink = IssueCollector::new(options.fail_fast);

        self.run_passes(&base, object, resource, options, &ctx, true, &mut sink)
            .await;

        for url in declared_profiles(object, options, &base.url) {
            if sink.should_stop() {
                break;
            }
            let Some(profile) = self.registry.get_profile(&url) else {
                sink.push(ctx.error(
                    IssueCode::NotFound,
                    format!("Profile '{url}' could not be resolved"),
                ));
                continue;
            };
            if profile.type_name != resource_type {
                sink.push(ctx.error(
                    IssueCode::Invalid,
                    format!(
                        "Profile '{}' constrains '{}' and cannot be applied to a '{}' resource",
                        url, profile.type_name, resource_type
                    ),
                ));
                continue;
            }

            debug!("Applying profile {} to {}", url, resource_type);
            let mut profile_sink = IssueCollector::new(options.fail_fast);
            self.run_passes(&profile, object, resource, options, &ctx, false, &mut profile_sink)
                .await;
            if options.must_support && options.level.runs_structural() && !profile_sink.should_stop() {
                check_must_support(&profile, resource, &ctx, &mut profile_sink);
            }
            sink.extend(
                profile_sink
                    .into_issues()
                    .into_iter()
                    .map(|issue| issue.with_profile(&url)),
            );
        }

        finalize(sink.into_issues(), options)
    }

    /// Structural, constraint and terminology passes of one schema.
    #[allow(clippy::too_many_arguments)]
    async fn run_passes(
        &self,
        schema: &Schema,
        object: &Map<String, Value>,
        resource: &Value,
        options: &ValidationOptions,
        ctx: &ValidationContext<'_>,
        global_invariants: bool,
        sink: &mut IssueCollector,
    ) {
        if options.level.runs_structural() {
            ElementValidator::new(self.registry.as_ref(), options)
                .validate_resource(schema, object, ctx, sink);
            if global_invariants && !sink.should_stop() {
                check_global_invariants(resource, ctx, sink);
            }
        }

        if options.level.runs_constraints() && !sink.should_stop() {
            match &self.evaluator {
                Some(evaluator) => check_constraints(schema, resource, evaluator.as_ref(), ctx, sink),
                None => debug!("No constraint evaluator configured; skipping constraints of {}", schema.url),
            }
        }

        if options.level.runs_terminology() && !sink.should_stop() {
            let service = self
                .terminology
                .as_deref()
                .map(|service| service as &dyn TerminologyService);
            BindingChecker::new(service, &self.local_terminology, options.include_warnings)
                .check(schema, resource, ctx, sink)
                .await;
        }
    }
}

/// Profiles from `meta.profile` followed by the explicit override, without
/// duplicates and without the base definition itself.
fn declared_profiles(
    object: &Map<String, Value>,
    options: &ValidationOptions,
    base_url: &str,
) -> Vec<String> {
    let meta_profiles = object
        .get("meta")
        .and_then(|meta| meta.get("profile"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);

    let mut profiles: Vec<String> = Vec::new();
    for url in meta_profiles.chain(options.profile.as_deref()) {
        if url != base_url && !profiles.iter().any(|p| p == url) {
            profiles.push(url.to_string());
        }
    }
    profiles
}

fn finalize(mut issues: Vec<ValidationIssue>, options: &ValidationOptions) -> OperationOutcome {
    if !options.include_warnings {
        issues.retain(ValidationIssue::is_error);
    }
    let mut issues = deduplicate(issues);
    if issues.is_empty() {
        issues.push(ValidationIssue::information(IssueCode::Informational, "All OK"));
    }
    OperationOutcome::new(issues)
}
