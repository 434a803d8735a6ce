//! Mapping file discovery and loading
//!
//! Mapping files live in `{module}/…/{mapping_subdir}` and
//! `{project}/config/{mapping_subdir}` (see `FieldGateConfig::mapping_dirs`).
//! Each directory is walked recursively; files are processed in path order,
//! directories in the order given, and every file is merged additively into
//! one `MappingDefinition`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::definition::MappingDefinition;
use crate::error::MappingError;

/// Mapping file formats recognised during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFormat {
    Yaml,
    Xml,
}

impl MappingFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(Self::Yaml),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }
}

/// Loader for a mapping format the crate does not parse itself (XML).
pub trait MappingLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<MappingDefinition, MappingError>;
}

impl<F> MappingLoader for F
where
    F: Fn(&Path) -> Result<MappingDefinition, MappingError> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<MappingDefinition, MappingError> {
        self(path)
    }
}

/// Result of loading every mapping file found in a set of directories.
#[derive(Debug, Clone, Default)]
pub struct LoadedMappings {
    pub definition: MappingDefinition,
    /// Files merged into `definition`, in processing order.
    pub files: Vec<PathBuf>,
}

/// Turn a mapping location into a local path.
///
/// Plain paths and `file://` URLs are accepted; any other scheme is rejected.
pub fn ensure_local(location: &str) -> Result<PathBuf, MappingError> {
    if let Some(path) = location.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if location.contains("://") {
        return Err(MappingError::NotLocalFile {
            location: location.to_string(),
        });
    }
    Ok(PathBuf::from(location))
}

/// Read and validate one YAML mapping file.
pub fn load_yaml_file(location: &str) -> Result<MappingDefinition, MappingError> {
    let path = ensure_local(location)?;

    let content = fs::read_to_string(&path).map_err(|source| MappingError::Io {
        path: path.clone(),
        source,
    })?;
    let value: Value = serde_yaml::from_str(&content).map_err(|source| MappingError::Yaml {
        path: path.clone(),
        source,
    })?;

    let definition = MappingDefinition::from_value(value, &path.display().to_string())?;
    debug!(
        "Loaded {} groups for {} types from {}",
        definition.group_count(),
        definition.type_ids().count(),
        path.display()
    );
    Ok(definition)
}

/// Mapping files under `dir`, recursively, sorted by path.
///
/// Symbolic links are followed; a missing directory yields no files.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, MappingError> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        debug!("Mapping directory not found: {}", dir.display());
        return Ok(files);
    }

    let mut visited = HashSet::new();
    walk(dir, &mut visited, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(
    dir: &Path,
    visited: &mut HashSet<PathBuf>,
    files: &mut Vec<PathBuf>,
) -> Result<(), MappingError> {
    let io_err = |source| MappingError::Io {
        path: dir.to_path_buf(),
        source,
    };

    // Symlinked directories can loop back on themselves.
    let canonical = fs::canonicalize(dir).map_err(io_err)?;
    if !visited.insert(canonical) {
        return Ok(());
    }

    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping unreadable entry {}: {}", path.display(), e);
                continue;
            }
        };

        if metadata.is_dir() {
            walk(&path, visited, files)?;
        } else if metadata.is_file() && MappingFormat::from_path(&path).is_some() {
            files.push(path);
        }
    }
    Ok(())
}

/// Discover and load every mapping file in `dirs`.
///
/// XML files go to `xml_loader`; without one they are skipped. The first
/// failing file aborts the load.
pub fn load_mappings(
    dirs: &[PathBuf],
    xml_loader: Option<&dyn MappingLoader>,
) -> Result<LoadedMappings, MappingError> {
    let mut loaded = LoadedMappings::default();

    for dir in dirs {
        for path in discover(dir)? {
            let definition = match MappingFormat::from_path(&path) {
                Some(MappingFormat::Yaml) => load_yaml_file(&path.to_string_lossy())?,
                Some(MappingFormat::Xml) => match xml_loader {
                    Some(loader) => loader.load(&path)?,
                    None => {
                        warn!(
                            "No XML mapping loader registered; skipping {}",
                            path.display()
                        );
                        continue;
                    }
                },
                None => continue,
            };

            loaded.definition.merge(definition);
            loaded.files.push(path);
        }
    }

    info!(
        "Loaded {} mapping files: {} types, {} groups",
        loaded.files.len(),
        loaded.definition.type_ids().count(),
        loaded.definition.group_count()
    );
    Ok(loaded)
}
