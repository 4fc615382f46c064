use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ValidatorError};

/// Which validation passes to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationLevel {
    /// Cardinality, types, slicing, fixed/pattern and global invariants only
    Structural,
    /// Constraint expressions only
    Constraints,
    /// Terminology bindings only
    Terminology,
    #[default]
    Full,
}

impl ValidationLevel {
    pub fn runs_structural(&self) -> bool {
        matches!(self, Self::Structural | Self::Full)
    }

    pub fn runs_constraints(&self) -> bool {
        matches!(self, Self::Constraints | Self::Full)
    }

    pub fn runs_terminology(&self) -> bool {
        matches!(self, Self::Terminology | Self::Full)
    }
}

/// Per-call validation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    pub level: ValidationLevel,
    /// Validate against this profile in addition to those declared in `meta.profile`
    pub profile: Option<String>,
    pub include_warnings: bool,
    /// Stop a pass as soon as one error has been collected
    pub fail_fast: bool,
    /// Warn about absent mustSupport elements of profiles
    pub must_support: bool,
    /// Validate the elements scoped to each matched slice against the slice's items
    pub validate_slice_contents: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            level: ValidationLevel::Full,
            profile: None,
            include_warnings: true,
            fail_fast: false,
            must_support: false,
            validate_slice_contents: false,
        }
    }
}

impl ValidationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_warnings(mut self, include: bool) -> Self {
        self.include_warnings = include;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_must_support(mut self, enabled: bool) -> Self {
        self.must_support = enabled;
        self
    }

    pub fn with_slice_contents(mut self, enabled: bool) -> Self {
        self.validate_slice_contents = enabled;
        self
    }
}

/// Configuration for the terminology cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached validation results
    pub ttl: Duration,
    /// Maximum number of entries in the cache
    pub max_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600), // 1 hour
            max_size: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn new(ttl: Duration, max_size: u64) -> Self {
        Self { ttl, max_size }
    }

    /// Create configuration for short-lived caches (5 minutes)
    pub fn short_lived() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size: 1_000,
        }
    }

    /// Create configuration for long-lived caches (24 hours)
    pub fn long_lived() -> Self {
        Self {
            ttl: Duration::from_secs(86400),
            max_size: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub options: ValidationOptions,
    pub terminology_cache: CacheConfig,
    /// Upper bound on resources validated at once by the concurrent batch entry point
    pub batch_concurrency: usize,
    /// Files or directories of StructureDefinitions, ValueSets and CodeSystems
    pub definition_paths: Vec<PathBuf>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            options: ValidationOptions::default(),
            terminology_cache: CacheConfig::default(),
            batch_concurrency: num_cpus::get(),
            definition_paths: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_concurrency == 0 {
            return Err(ValidatorError::config("batch_concurrency must be greater than zero"));
        }
        if self.terminology_cache.max_size == 0 {
            return Err(ValidatorError::config(
                "terminology_cache.max_size must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    pub fn add_definition_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.definition_paths.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_options() {
        let options = ValidationOptions::default();
        assert_eq!(options.level, ValidationLevel::Full);
        assert!(options.include_warnings);
        assert!(!options.fail_fast);
        assert!(!options.validate_slice_contents);
    }

    #[test]
    fn test_levels() {
        assert!(ValidationLevel::Structural.runs_structural());
        assert!(!ValidationLevel::Constraints.runs_structural());
        assert!(!ValidationLevel::Terminology.runs_structural());
        assert!(!ValidationLevel::Constraints.runs_terminology());
        assert!(!ValidationLevel::Terminology.runs_constraints());
        assert!(ValidationLevel::Full.runs_structural());
        assert!(!ValidationLevel::Structural.runs_constraints());
        assert!(!ValidationLevel::Structural.runs_terminology());
        assert!(ValidationLevel::Constraints.runs_constraints());
        assert!(ValidationLevel::Terminology.runs_terminology());
        assert!(ValidationLevel::Full.runs_constraints());
        assert!(ValidationLevel::Full.runs_terminology());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"options": {{"level": "structural", "fail_fast": true}}, "batch_concurrency": 2}}"#
        )
        .unwrap();

        let config = ValidatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.options.level, ValidationLevel::Structural);
        assert!(config.options.fail_fast);
        assert!(config.options.include_warnings);
        assert_eq!(config.batch_concurrency, 2);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = ValidatorConfig::default().with_batch_concurrency(0);
        assert!(config.validate().is_err());
    }
}
