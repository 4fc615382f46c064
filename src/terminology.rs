//! Terminology validation services for binding validation.
//!
//! - [`TerminologyService`] is the interface the binding checker calls
//! - [`CachedTerminologyService`] wraps any service with a TTL-bounded cache
//! - [`InMemoryTerminologyService`] holds explicit code lists (tests, simple setups)
//! - [`LocalValueSetResolver`] answers from ValueSets and CodeSystems in a registry
//!
//! Caches are owned by the service instance that creates them; nothing here is
//! process-global.

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::registry::SchemaRegistry;
use crate::types::{ValueSet, ValueSetContains, ValueSetInclude};

/// Error codes for terminology/binding validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminologyErrorCode {
    /// VS1001: Value set not found
    ValueSetNotFound = 1001,
    /// VS1003: Invalid code system
    InvalidCodeSystem = 1003,
    /// VS1008: Terminology service unavailable
    ServiceUnavailable = 1008,
    /// VS1010: Value set cannot be evaluated locally
    NotEvaluable = 1010,
}

impl std::fmt::Display for TerminologyErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VS{:04}", *self as u32)
    }
}

/// Errors that can occur during terminology validation
#[derive(Debug, Error)]
pub enum TerminologyError {
    #[error("Value set not found: {url}")]
    ValueSetNotFound { url: String },

    #[error("Invalid code system: {system}")]
    InvalidCodeSystem { system: String },

    #[error("Terminology service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Value set {url} cannot be evaluated: {reason}")]
    NotEvaluable { url: String, reason: String },
}

impl TerminologyError {
    pub fn code(&self) -> TerminologyErrorCode {
        match self {
            TerminologyError::ValueSetNotFound { .. } => TerminologyErrorCode::ValueSetNotFound,
            TerminologyError::InvalidCodeSystem { .. } => TerminologyErrorCode::InvalidCodeSystem,
            TerminologyError::ServiceUnavailable { .. } => TerminologyErrorCode::ServiceUnavailable,
            TerminologyError::NotEvaluable { .. } => TerminologyErrorCode::NotEvaluable,
        }
    }
}

pub type TerminologyResult<T> = Result<T, TerminologyError>;

/// Result of validating a code against a value set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeValidationResult {
    pub valid: bool,
    /// Canonical display for the code, if known
    pub display: Option<String>,
    /// Explanation when the code is not valid
    pub message: Option<String>,
    /// Set when the supplied display differs from the canonical one
    pub display_warning: Option<String>,
}

impl CodeValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    pub fn valid_with_display(display: String) -> Self {
        Self {
            valid: true,
            display: Some(display),
            ..Default::default()
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Compare a supplied display against the canonical one.
    fn check_display(mut self, supplied: Option<&str>) -> Self {
        if let (Some(given), Some(expected)) = (supplied, self.display.as_deref()) {
            if !given.eq_ignore_ascii_case(expected) {
                self.display_warning = Some(format!(
                    "Display '{given}' does not match the expected display '{expected}'"
                ));
            }
        }
        self
    }
}

/// Trait for terminology validation services.
///
/// Implementations can connect to FHIR terminology servers, local databases,
/// or in-memory value sets.
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// Validate a code against a value set.
    ///
    /// `system` and `display` come from the instance when it carries them
    /// (Coding / CodeableConcept); a bare `code` value has neither.
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    value_set_url: String,
    code: String,
    system: Option<String>,
    display: Option<String>,
}

/// A cached wrapper around a TerminologyService.
///
/// Successful lookups are cached with TTL eviction; failures are not cached.
pub struct CachedTerminologyService {
    inner: Arc<dyn TerminologyService>,
    cache: Cache<CacheKey, CodeValidationResult>,
}

impl CachedTerminologyService {
    pub fn new(inner: Arc<dyn TerminologyService>, config: CacheConfig) -> Self {
        let cache = Cache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_size)
            .build();

        Self { inner, cache }
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Apply pending cache maintenance so that statistics are current.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub weighted_size: u64,
}

#[async_trait]
impl TerminologyService for CachedTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        let key = CacheKey {
            value_set_url: value_set_url.to_string(),
            code: code.to_string(),
            system: system.map(str::to_string),
            display: display.map(str::to_string),
        };

        if let Some(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let result = self
            .inner
            .validate_code(value_set_url, code, system, display)
            .await?;

        self.cache.insert(key, result.clone()).await;

        Ok(result)
    }
}

/// (code, system) -> display
type CodeMap = HashMap<(String, Option<String>), Option<String>>;

/// A simple in-memory terminology service holding explicit code lists.
#[derive(Debug, Default)]
pub struct InMemoryTerminologyService {
    value_sets: HashMap<String, CodeMap>,
}

impl InMemoryTerminologyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code(
        &mut self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) {
        self.value_sets
            .entry(value_set_url.to_string())
            .or_default()
            .insert(
                (code.to_string(), system.map(str::to_string)),
                display.map(str::to_string),
            );
    }

    pub fn add_codes(&mut self, value_set_url: &str, codes: &[(&str, Option<&str>)]) {
        for (code, system) in codes {
            self.add_code(value_set_url, code, *system, None);
        }
    }
}

#[async_trait]
impl TerminologyService for InMemoryTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        let Some(vs) = self.value_sets.get(value_set_url) else {
            return Err(TerminologyError::ValueSetNotFound {
                url: value_set_url.to_string(),
            });
        };

        let exact = vs.get(&(code.to_string(), system.map(str::to_string)));
        // Codes registered without a system match any system, and a bare code matches any entry.
        let found = exact
            .or_else(|| vs.get(&(code.to_string(), None)))
            .or_else(|| {
                system
                    .is_none()
                    .then(|| vs.iter().find(|((c, _), _)| c == code).map(|(_, d)| d))
                    .flatten()
            });

        Ok(match found {
            Some(Some(known)) => {
                CodeValidationResult::valid_with_display(known.clone()).check_display(display)
            }
            Some(None) => CodeValidationResult::valid(),
            None => CodeValidationResult::invalid(format!(
                "Code '{code}' is not in value set '{value_set_url}'"
            )),
        })
    }
}

enum Membership {
    Member(Option<String>),
    NotMember,
    /// Membership depends on content that is not available locally
    Unknown(String),
    /// A whole-system include names a CodeSystem the registry does not hold
    UnknownSystem(String),
}

/// Answers binding checks from ValueSets and CodeSystems known to a registry.
///
/// Expansions are used when present; otherwise `compose` is evaluated with
/// explicit concept lists, whole-system includes (resolved against registry
/// CodeSystems), imported value sets and excludes. Filters are not evaluated.
pub struct LocalValueSetResolver {
    registry: Arc<dyn SchemaRegistry>,
}

impl LocalValueSetResolver {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry }
    }

    fn membership(
        &self,
        value_set: &ValueSet,
        code: &str,
        system: Option<&str>,
        visited: &mut HashSet<String>,
    ) -> Membership {
        if !visited.insert(value_set.url.clone()) {
            return Membership::NotMember;
        }

        if let Some(expansion) = value_set.expansion.as_ref().filter(|e| !e.contains.is_empty()) {
            return match find_in_expansion(&expansion.contains, code, system) {
                Some(found) => Membership::Member(found.display.clone()),
                None => Membership::NotMember,
            };
        }

        let Some(compose) = &value_set.compose else {
            return Membership::Unknown(format!("value set {} has no content", value_set.url));
        };

        for exclude in &compose.exclude {
            if let Membership::Member(_) = self.include_membership(exclude, code, system, visited) {
                return Membership::NotMember;
            }
        }

        let mut unresolved = None;
        for include in &compose.include {
            match self.include_membership(include, code, system, visited) {
                Membership::Member(display) => return Membership::Member(display),
                Membership::NotMember => {}
                other => unresolved = Some(other),
            }
        }

        unresolved.unwrap_or(Membership::NotMember)
    }

    fn include_membership(
        &self,
        include: &ValueSetInclude,
        code: &str,
        system: Option<&str>,
        visited: &mut HashSet<String>,
    ) -> Membership {
        if let (Some(wanted), Some(declared)) = (system, include.system.as_deref()) {
            if wanted != declared {
                return Membership::NotMember;
            }
        }

        for imported in &include.value_set {
            let Some(vs) = self.registry.get_value_set(imported) else {
                return Membership::Unknown(format!("imported value set {imported} is not available"));
            };
            match self.membership(&vs, code, system, visited) {
                Membership::NotMember => {}
                other => return other,
            }
        }

        if !include.concept.is_empty() {
            return match include.concept.iter().find(|c| c.code == code) {
                Some(concept) => {
                    let display = concept.display.clone().or_else(|| {
                        include
                            .system
                            .as_deref()
                            .and_then(|s| self.registry.get_code_system(s))
                            .and_then(|cs| cs.find_concept(code).and_then(|c| c.display.clone()))
                    });
                    Membership::Member(display)
                }
                None => Membership::NotMember,
            };
        }

        if !include.filter.is_empty() {
            return Membership::Unknown("value set filters are not evaluated locally".to_string());
        }

        match include.system.as_deref() {
            Some(system_url) => match self.registry.get_code_system(system_url) {
                Some(cs) => match cs.find_concept(code) {
                    Some(concept) => Membership::Member(concept.display.clone()),
                    None => Membership::NotMember,
                },
                None => Membership::UnknownSystem(system_url.to_string()),
            },
            None => Membership::NotMember,
        }
    }
}

fn find_in_expansion<'a>(
    contains: &'a [ValueSetContains],
    code: &str,
    system: Option<&str>,
) -> Option<&'a ValueSetContains> {
    contains.iter().find_map(|entry| {
        let code_matches = entry.code.as_deref() == Some(code);
        let system_matches = match (system, entry.system.as_deref()) {
            (Some(wanted), Some(declared)) => wanted == declared,
            _ => true,
        };
        if code_matches && system_matches {
            Some(entry)
        } else {
            find_in_expansion(&entry.contains, code, system)
        }
    })
}

#[async_trait]
impl TerminologyService for LocalValueSetResolver {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        let Some(value_set) = self.registry.get_value_set(value_set_url) else {
            return Err(TerminologyError::ValueSetNotFound {
                url: value_set_url.to_string(),
            });
        };

        match self.membership(&value_set, code, system, &mut HashSet::new()) {
            Membership::Member(Some(known)) => {
                Ok(CodeValidationResult::valid_with_display(known).check_display(display))
            }
            Membership::Member(None) => Ok(CodeValidationResult::valid()),
            Membership::NotMember => Ok(CodeValidationResult::invalid(format!(
                "Code '{code}' is not in value set '{value_set_url}'"
            ))),
            Membership::Unknown(reason) => Err(TerminologyError::NotEvaluable {
                url: value_set_url.to_string(),
                reason,
            }),
            Membership::UnknownSystem(system) => Err(TerminologyError::InvalidCodeSystem { system }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySchemaRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_service() {
        let mut service = InMemoryTerminologyService::new();
        service.add_code(
            "http://example.org/vs/gender",
            "male",
            Some("http://hl7.org/fhir/administrative-gender"),
            Some("Male"),
        );

        let result = service
            .validate_code(
                "http://example.org/vs/gender",
                "male",
                Some("http://hl7.org/fhir/administrative-gender"),
                Some("Man"),
            )
            .await
            .unwrap();
        assert!(result.valid);
        assert_eq!(result.display, Some("Male".to_string()));
        assert!(result.display_warning.is_some());

        let result = service
            .validate_code("http://example.org/vs/gender", "unknown", None, None)
            .await
            .unwrap();
        assert!(!result.valid);

        assert!(
            service
                .validate_code("http://example.org/missing", "x", None, None)
                .await
                .is_err()
        );
    }

    struct CountingService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TerminologyService for CountingService {
        async fn validate_code(
            &self,
            _value_set_url: &str,
            code: &str,
            _system: Option<&str>,
            _display: Option<&str>,
        ) -> TerminologyResult<CodeValidationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if code == "down" {
                return Err(TerminologyError::ServiceUnavailable {
                    message: "timeout".to_string(),
                });
            }
            Ok(CodeValidationResult::valid())
        }
    }

    #[tokio::test]
    async fn test_cached_service() {
        let inner = Arc::new(CountingService {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedTerminologyService::new(
            inner.clone(),
            CacheConfig::new(Duration::from_secs(60), 100),
        );

        for _ in 0..3 {
            let result = cached
                .validate_code("http://example.org/vs", "ABC", None, None)
                .await
                .unwrap();
            assert!(result.valid);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cached.sync().await;
        assert_eq!(cached.cache_stats().entry_count, 1);

        // failures are retried
        for _ in 0..2 {
            assert!(
                cached
                    .validate_code("http://example.org/vs", "down", None, None)
                    .await
                    .is_err()
            );
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        cached.clear_cache();
        cached.sync().await;
        assert_eq!(cached.cache_stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_local_resolver() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        registry
            .register_resource(json!({
                "resourceType": "CodeSystem",
                "url": "http://example.org/cs/status",
                "concept": [
                    {"code": "active", "display": "Active"},
                    {"code": "inactive", "display": "Inactive",
                     "concept": [{"code": "retired", "display": "Retired"}]}
                ]
            }))
            .unwrap();
        registry
            .register_resource(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/status",
                "compose": {
                    "include": [{"system": "http://example.org/cs/status"}],
                    "exclude": [{"system": "http://example.org/cs/status", "concept": [{"code": "inactive"}]}]
                }
            }))
            .unwrap();
        registry
            .register_resource(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/filtered",
                "compose": {"include": [{"system": "http://loinc.org", "filter": [{"property": "class"}]}]}
            }))
            .unwrap();
        registry
            .register_resource(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/snomed",
                "compose": {"include": [{"system": "http://snomed.info/sct"}]}
            }))
            .unwrap();

        let resolver = LocalValueSetResolver::new(registry);
        let vs = "http://example.org/vs/status";

        let result = resolver.validate_code(vs, "retired", None, None).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.display.as_deref(), Some("Retired"));

        assert!(!resolver.validate_code(vs, "inactive", None, None).await.unwrap().valid);
        assert!(!resolver.validate_code(vs, "bogus", None, None).await.unwrap().valid);
        assert!(
            !resolver
                .validate_code(vs, "active", Some("http://other.org"), None)
                .await
                .unwrap()
                .valid
        );

        let err = resolver
            .validate_code("http://example.org/vs/filtered", "1234-5", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), TerminologyErrorCode::NotEvaluable);
        assert_eq!(err.code().to_string(), "VS1010");

        let err = resolver
            .validate_code("http://example.org/vs/snomed", "22298006", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), TerminologyErrorCode::InvalidCodeSystem);
        assert_eq!(err.code().to_string(), "VS1003");
    }
}
