//! Schema registry.
//!
//! The validator only consumes the [`SchemaRegistry`] lookup interface. The
//! bundled [`InMemorySchemaRegistry`] keeps compiled schemas in lock-free maps
//! and can load definitions from JSON files, directories and Bundles.

use async_trait::async_trait;
use papaya::HashMap as PapayaMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{Result, ValidatorError};
use crate::types::{CodeSystem, Schema, StructureDefinition, ValueSet};

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Load bundled definitions. Must be idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Base definition for a type name, or any definition by canonical URL.
    fn get_schema(&self, id: &str) -> Option<Arc<Schema>>;

    /// Definition by canonical URL (optionally `url|version`).
    fn get_profile(&self, url: &str) -> Option<Arc<Schema>>;

    fn get_value_set(&self, url: &str) -> Option<Arc<ValueSet>> {
        let _ = url;
        None
    }

    fn get_code_system(&self, url: &str) -> Option<Arc<CodeSystem>> {
        let _ = url;
        None
    }
}

/// Registry backed by in-memory concurrent maps.
pub struct InMemorySchemaRegistry {
    /// Base (non-constraint) definitions by type name
    types: PapayaMap<String, Arc<Schema>>,
    /// All definitions by canonical URL and by `url|version`
    canonicals: PapayaMap<String, Arc<Schema>>,
    value_sets: PapayaMap<String, Arc<ValueSet>>,
    code_systems: PapayaMap<String, Arc<CodeSystem>>,
    sources: Vec<PathBuf>,
    initialized: OnceCell<()>,
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemorySchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySchemaRegistry")
            .field("types", &self.types.len())
            .field("canonicals", &self.canonicals.len())
            .field("value_sets", &self.value_sets.len())
            .field("code_systems", &self.code_systems.len())
            .field("sources", &self.sources)
            .finish()
    }
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self {
            types: PapayaMap::new(),
            canonicals: PapayaMap::new(),
            value_sets: PapayaMap::new(),
            code_systems: PapayaMap::new(),
            sources: Vec::new(),
            initialized: OnceCell::new(),
        }
    }

    /// Files or directories loaded by [`SchemaRegistry::initialize`].
    pub fn with_definition_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sources.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn register_structure_definition(&self, sd: &StructureDefinition) -> Result<Arc<Schema>> {
        let schema = Arc::new(Schema::compile(sd)?);

        if !schema.is_profile() {
            self.types
                .pin()
                .insert(schema.type_name.clone(), schema.clone());
        }

        let canonicals = self.canonicals.pin();
        canonicals.insert(schema.url.clone(), schema.clone());
        if let Some(version) = &schema.version {
            canonicals.insert(format!("{}|{}", schema.url, version), schema.clone());
        }

        debug!("Registered StructureDefinition {}", schema.url);
        Ok(schema)
    }

    pub fn register_value_set(&self, value_set: ValueSet) {
        let value_set = Arc::new(value_set);
        let map = self.value_sets.pin();
        if let Some(version) = &value_set.version {
            map.insert(format!("{}|{}", value_set.url, version), value_set.clone());
        }
        map.insert(value_set.url.clone(), value_set);
    }

    pub fn register_code_system(&self, code_system: CodeSystem) {
        let code_system = Arc::new(code_system);
        let map = self.code_systems.pin();
        if let Some(version) = &code_system.version {
            map.insert(format!("{}|{}", code_system.url, version), code_system.clone());
        }
        map.insert(code_system.url.clone(), code_system);
    }

    /// Register a StructureDefinition, ValueSet, CodeSystem or a Bundle of them.
    ///
    /// Returns how many definitions were registered. Other resource types are ignored.
    pub fn register_resource(&self, resource: Value) -> Result<usize> {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match resource_type.as_str() {
            "StructureDefinition" => {
                let sd: StructureDefinition = serde_json::from_value(resource)?;
                self.register_structure_definition(&sd)?;
                Ok(1)
            }
            "ValueSet" => {
                self.register_value_set(serde_json::from_value(resource)?);
                Ok(1)
            }
            "CodeSystem" => {
                self.register_code_system(serde_json::from_value(resource)?);
                Ok(1)
            }
            "Bundle" => {
                let mut count = 0;
                let entries = resource
                    .get("entry")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for entry in entries {
                    let Some(inner) = entry.get("resource").cloned() else {
                        continue;
                    };
                    match self.register_resource(inner) {
                        Ok(n) => count += n,
                        Err(e) => warn!("Skipping Bundle entry: {}", e),
                    }
                }
                Ok(count)
            }
            _ => Ok(0),
        }
    }

    /// Load definitions from a JSON file or (recursively) a directory of JSON files.
    pub async fn load_path(&self, path: &Path) -> Result<usize> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ValidatorError::load(format!("Cannot read {}: {}", path.display(), e))
        })?;

        if metadata.is_file() {
            return self.load_file(path).await;
        }

        let mut count = 0;
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(entry_path);
                } else if entry_path.extension().is_some_and(|ext| ext == "json") {
                    match self.load_file(&entry_path).await {
                        Ok(n) => count += n,
                        Err(e) => warn!("Skipping {}: {}", entry_path.display(), e),
                    }
                }
            }
        }

        info!("Loaded {} definitions from {}", count, path.display());
        Ok(count)
    }

    async fn load_file(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let resource: Value = serde_json::from_str(&content)?;
        self.register_resource(resource)
    }

    /// Number of distinct canonical entries.
    pub fn len(&self) -> usize {
        self.canonicals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonicals.is_empty()
    }
}

fn lookup<T: Clone>(map: &PapayaMap<String, T>, url: &str) -> Option<T> {
    let guard = map.pin();
    if let Some(found) = guard.get(url) {
        return Some(found.clone());
    }
    let (base, _) = url.split_once('|')?;
    guard.get(base).cloned()
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                for source in &self.sources {
                    self.load_path(source).await?;
                }
                Ok::<(), ValidatorError>(())
            })
            .await?;
        Ok(())
    }

    fn get_schema(&self, id: &str) -> Option<Arc<Schema>> {
        if let Some(schema) = self.types.pin().get(id) {
            return Some(schema.clone());
        }
        lookup(&self.canonicals, id)
    }

    fn get_profile(&self, url: &str) -> Option<Arc<Schema>> {
        lookup(&self.canonicals, url)
    }

    fn get_value_set(&self, url: &str) -> Option<Arc<ValueSet>> {
        lookup(&self.value_sets, url)
    }

    fn get_code_system(&self, url: &str) -> Option<Arc<CodeSystem>> {
        lookup(&self.code_systems, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient_definition() -> Value {
        json!({
            "resourceType": "StructureDefinition",
            "url": "http://hl7.org/fhir/StructureDefinition/Patient",
            "version": "4.0.1",
            "name": "Patient",
            "kind": "resource",
            "type": "Patient",
            "derivation": "specialization",
            "snapshot": {"element": [{"path": "Patient", "min": 0, "max": "*"}]}
        })
    }

    #[test]
    fn test_lookup_by_type_url_and_version() {
        let registry = InMemorySchemaRegistry::new();
        registry.register_resource(patient_definition()).unwrap();

        assert!(registry.get_schema("Patient").is_some());
        assert!(
            registry
                .get_profile("http://hl7.org/fhir/StructureDefinition/Patient|4.0.1")
                .is_some()
        );
        assert!(
            registry
                .get_profile("http://hl7.org/fhir/StructureDefinition/Patient|9.9.9")
                .is_some()
        );
        assert!(registry.get_schema("Observation").is_none());
    }

    #[test]
    fn test_profiles_are_not_base_types() {
        let registry = InMemorySchemaRegistry::new();
        registry
            .register_resource(json!({
                "resourceType": "StructureDefinition",
                "url": "http://example.org/StructureDefinition/my-patient",
                "name": "MyPatient",
                "kind": "resource",
                "type": "Patient",
                "derivation": "constraint",
                "snapshot": {"element": [{"path": "Patient", "min": 0, "max": "*"}]}
            }))
            .unwrap();

        assert!(registry.get_schema("Patient").is_none());
        assert!(
            registry
                .get_profile("http://example.org/StructureDefinition/my-patient")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_initialize_loads_directory_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("patient.json"),
            serde_json::to_string(&patient_definition()).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("bundle.json"),
            serde_json::to_string(&json!({
                "resourceType": "Bundle",
                "entry": [{"resource": {
                    "resourceType": "ValueSet",
                    "url": "http://example.org/vs",
                    "compose": {"include": [{"system": "http://example.org/cs", "concept": [{"code": "a"}]}]}
                }}]
            }))
            .unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("package.json"), "{\"name\": \"pkg\"}").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let registry =
            Arc::new(InMemorySchemaRegistry::new().with_definition_paths([dir.path()]));

        let (a, b) = tokio::join!(registry.initialize(), registry.initialize());
        a.unwrap();
        b.unwrap();
        registry.initialize().await.unwrap();

        assert!(registry.get_schema("Patient").is_some());
        assert!(registry.get_value_set("http://example.org/vs").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_path_is_a_load_error() {
        let registry = InMemorySchemaRegistry::new()
            .with_definition_paths(["/definitely/not/here/definitions"]);
        let err = registry.initialize().await.unwrap_err();
        assert!(matches!(err, ValidatorError::Load { .. }));
    }
}
