//! Configuration loader
//!
//! Loads `FieldGateConfig` from YAML, or from the environment when no file
//! is given.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default name of the directory holding mapping files inside a config tree.
pub const DEFAULT_MAPPING_SUBDIR: &str = "serializer-groups";

/// How the group evaluator filters tags by direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    /// Denormalization-mode tags are dropped while normalizing; no filtering
    /// is applied while denormalizing.
    #[default]
    Asymmetric,
    /// Both directions drop tags whose mode names the other direction.
    Symmetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldGateConfig {
    /// Main project root; mappings live in `{project_dir}/config/{mapping_subdir}`.
    pub project_dir: PathBuf,
    /// Pluggable module roots, scanned in declared order before the project.
    pub module_dirs: Vec<PathBuf>,
    pub mapping_subdir: String,
    /// Separator between namespace segments of a type identifier.
    pub namespace_separator: String,
    /// Declared types that never name a concrete nested type.
    pub collection_types: Vec<String>,
    pub direction_policy: DirectionPolicy,
    /// Static type schema for the bundled introspector.
    pub schema_file: Option<PathBuf>,
    /// Resource and operation metadata for the bundled provider.
    pub resources_file: Option<PathBuf>,
}

impl Default for FieldGateConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            module_dirs: Vec::new(),
            mapping_subdir: DEFAULT_MAPPING_SUBDIR.to_string(),
            namespace_separator: "\\".to_string(),
            collection_types: [
                "Collection",
                "ArrayCollection",
                "Doctrine\\Common\\Collections\\Collection",
                "Doctrine\\Common\\Collections\\ArrayCollection",
                "array",
                "iterable",
                "Vec",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            direction_policy: DirectionPolicy::default(),
            schema_file: None,
            resources_file: None,
        }
    }
}

impl FieldGateConfig {
    /// Load configuration from a YAML file.
    ///
    /// Relative paths inside the file are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading fieldgate configuration from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut config: FieldGateConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.rebase(base);
        }

        Ok(config)
    }

    /// Load from FIELDGATE_CONFIG, or defaults with FIELDGATE_PROJECT_DIR applied.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("FIELDGATE_CONFIG") {
            return Self::load(path);
        }

        let mut config = Self::default();
        if let Ok(dir) = std::env::var("FIELDGATE_PROJECT_DIR") {
            config.project_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    /// Directories to scan for mapping files, in processing order.
    pub fn mapping_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::with_capacity(self.module_dirs.len() + 1);

        for module in &self.module_dirs {
            let resources = module.join("Resources").join("config");
            let config_dir = if resources.is_dir() {
                resources
            } else {
                module.join("config")
            };
            dirs.push(config_dir.join(&self.mapping_subdir));
        }

        dirs.push(
            self.project_dir
                .join("config")
                .join(&self.mapping_subdir),
        );
        dirs
    }

    fn rebase(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        rebase(&mut self.project_dir);
        self.module_dirs.iter_mut().for_each(rebase);
        if let Some(p) = self.schema_file.as_mut() {
            rebase(p);
        }
        if let Some(p) = self.resources_file.as_mut() {
            rebase(p);
        }
    }
}
