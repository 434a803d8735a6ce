//! Mapping registry
//!
//! Holds the attribute tables for every mapped type once a load has
//! completed. A process-wide instance is built on first use; a failed build
//! leaves the slot empty so a later call can retry.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use tracing::info;

use super::definition::MappingDefinition;
use super::loader::{load_mappings, MappingLoader};
use super::parser::MappingParser;
use super::table::AttributeTable;
use crate::config::FieldGateConfig;
use crate::error::MappingError;
use crate::introspect::PathResolver;

/// Global registry instance.
static GLOBAL: OnceCell<Arc<MappingRegistry>> = OnceCell::new();

/// Read-only attribute tables keyed by type identifier.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    tables: IndexMap<String, AttributeTable>,
    /// Types with their own top-level mapping, as opposed to types reached
    /// only through nested descent.
    mapped_types: Vec<String>,
    files: Vec<PathBuf>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an in-memory definition.
    pub fn from_definition(
        definition: &MappingDefinition,
        resolver: &PathResolver,
    ) -> Result<Self, MappingError> {
        let tables = MappingParser::new(resolver).parse(definition)?;
        Ok(Self {
            tables,
            mapped_types: definition.type_ids().map(str::to_string).collect(),
            files: Vec::new(),
        })
    }

    /// Discover, load and resolve every mapping file named by `config`.
    pub fn load(
        config: &FieldGateConfig,
        resolver: &PathResolver,
        xml_loader: Option<&dyn MappingLoader>,
    ) -> Result<Self, MappingError> {
        let loaded = load_mappings(&config.mapping_dirs(), xml_loader)?;
        let mut registry = Self::from_definition(&loaded.definition, resolver)?;
        registry.files = loaded.files;

        info!(
            "Mapping registry ready: {} tables ({} mapped types) from {} files",
            registry.tables.len(),
            registry.mapped_types.len(),
            registry.files.len()
        );
        Ok(registry)
    }

    pub fn table(&self, type_id: &str) -> Option<&AttributeTable> {
        self.tables.get(type_id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &AttributeTable> {
        self.tables.values()
    }

    /// Types declared at the top level of a mapping file.
    pub fn mapped_types(&self) -> &[String] {
        &self.mapped_types
    }

    pub fn is_mapped(&self, type_id: &str) -> bool {
        self.mapped_types.iter().any(|t| t == type_id)
    }

    /// Mapping files the registry was built from, in processing order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Global registry, built with `init` on first call.
    ///
    /// Concurrent first callers block until one build finishes. If the build
    /// fails the error is returned and the next call tries again.
    pub fn global_or_try_init<F>(init: F) -> Result<Arc<MappingRegistry>, MappingError>
    where
        F: FnOnce() -> Result<MappingRegistry, MappingError>,
    {
        GLOBAL
            .get_or_try_init(|| init().map(Arc::new))
            .map(Arc::clone)
    }

    /// Global registry if it has been built.
    pub fn global() -> Option<Arc<MappingRegistry>> {
        GLOBAL.get().cloned()
    }

    /// Install `registry` as the global instance.
    ///
    /// Returns the registry back if one is already installed.
    pub fn init_global(registry: MappingRegistry) -> Result<(), Arc<MappingRegistry>> {
        GLOBAL.set(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{SchemaRegistry, TypeSchema};

    fn resolver() -> PathResolver {
        let schema = SchemaRegistry::new()
            .with_type("Entity", TypeSchema::new().accessor("getAuthor", "Person"))
            .with_type("Person", TypeSchema::new());
        PathResolver::new(Arc::new(schema))
    }

    #[test]
    fn nested_types_get_tables_but_are_not_mapped() {
        let definition = MappingDefinition::from_yaml_str(
            "Entity:\n  item.normalization.get:\n    author:\n      firstName: ~\n",
            "inline",
        )
        .unwrap();
        let registry = MappingRegistry::from_definition(&definition, &resolver()).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.is_mapped("Entity"));
        assert!(!registry.is_mapped("Person"));
        assert!(registry.table("Person").unwrap().get("firstName").is_some());
        assert!(registry.table("Book").is_none());
    }

    #[test]
    fn load_reads_configured_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("config/serializer-groups");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("entity.yaml"),
            "Entity:\n  item.normalization.get:\n    name: ~\n",
        )
        .unwrap();

        let config = FieldGateConfig {
            project_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let registry = MappingRegistry::load(&config, &resolver(), None).unwrap();

        assert_eq!(registry.files().len(), 1);
        assert!(registry.table("Entity").unwrap().get("name").is_some());
    }

    #[test]
    fn failed_global_init_can_be_retried() {
        let err = MappingRegistry::global_or_try_init(|| {
            Err(MappingError::NotLocalFile {
                location: "ftp://example.com/a.yaml".into(),
            })
        });
        // Another test may have installed the global already.
        if MappingRegistry::global().is_none() {
            assert!(err.is_err());
        }

        let registry = MappingRegistry::global_or_try_init(|| Ok(MappingRegistry::new())).unwrap();
        assert!(MappingRegistry::global().is_some());
        assert!(Arc::ptr_eq(&registry, &MappingRegistry::global().unwrap()));
    }
}
