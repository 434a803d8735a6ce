//! Static schema registry
//!
//! A `TypeIntrospector` backed by a schema declared up front, either in YAML
//! or through the builder methods.
//!
//! ```yaml
//! types:
//!   App\Entity\Book:
//!     accessors:
//!       getAuthor: { returns: App\Entity\Person }
//!       getReviews: { returns: Collection, doc: "@return Review[]" }
//!     properties:
//!       publisher:
//!         relations:
//!           - { kind: many_to_one, target: App\Entity\Publisher }
//!       editor: { type: Person }
//!   App\Entity\Person: {}
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AccessorInfo, PropertyInfo, Relation, RelationKind, TypeIntrospector};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorSchema {
    #[serde(default, rename = "returns")]
    pub return_type: Option<String>,
    #[serde(default, rename = "doc")]
    pub doc_comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(default, rename = "type")]
    pub declared_type: Option<String>,
    #[serde(default, rename = "doc")]
    pub doc_comment: Option<String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    #[serde(default)]
    pub accessors: HashMap<String, AccessorSchema>,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
}

impl TypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an accessor with a declared return type.
    pub fn accessor(mut self, method: impl Into<String>, returns: impl Into<String>) -> Self {
        self.accessors.insert(
            method.into(),
            AccessorSchema {
                return_type: Some(returns.into()),
                doc_comment: None,
            },
        );
        self
    }

    /// Add an accessor described only by its documentation comment.
    pub fn documented_accessor(
        mut self,
        method: impl Into<String>,
        return_type: Option<&str>,
        doc: impl Into<String>,
    ) -> Self {
        self.accessors.insert(
            method.into(),
            AccessorSchema {
                return_type: return_type.map(str::to_string),
                doc_comment: Some(doc.into()),
            },
        );
        self
    }

    /// Add a property with a declared type.
    pub fn property(mut self, name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        self.properties.insert(
            name.into(),
            PropertySchema {
                declared_type: Some(declared_type.into()),
                ..Default::default()
            },
        );
        self
    }

    /// Add a property documented with `@var`.
    pub fn documented_property(mut self, name: impl Into<String>, doc: impl Into<String>) -> Self {
        self.properties.insert(
            name.into(),
            PropertySchema {
                doc_comment: Some(doc.into()),
                ..Default::default()
            },
        );
        self
    }

    /// Add a property carrying association metadata.
    pub fn relation(
        mut self,
        name: impl Into<String>,
        kind: RelationKind,
        target: impl Into<String>,
    ) -> Self {
        self.properties
            .entry(name.into())
            .or_default()
            .relations
            .push(Relation {
                kind,
                target: target.into(),
            });
        self
    }
}

/// Type schema keyed by type identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default)]
    types: HashMap<String, TypeSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, type_id: impl Into<String>, schema: TypeSchema) -> Self {
        self.types.insert(type_id.into(), schema);
        self
    }

    pub fn insert(&mut self, type_id: impl Into<String>, schema: TypeSchema) {
        self.types.insert(type_id.into(), schema);
    }

    /// Load a schema from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let registry = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        info!(
            "Loaded type schema with {} types from {}",
            registry.types.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeIntrospector for SchemaRegistry {
    fn accessor(&self, owner: &str, method: &str) -> Option<AccessorInfo> {
        let accessor = self.types.get(owner)?.accessors.get(method)?;
        Some(AccessorInfo {
            return_type: accessor.return_type.clone(),
            doc_comment: accessor.doc_comment.clone(),
        })
    }

    fn property(&self, owner: &str, property: &str) -> Option<PropertyInfo> {
        let prop = self.types.get(owner)?.properties.get(property)?;
        Some(PropertyInfo {
            declared_type: prop.declared_type.clone(),
            doc_comment: prop.doc_comment.clone(),
            relations: prop.relations.clone(),
        })
    }

    fn type_exists(&self, type_id: &str) -> bool {
        self.types.contains_key(type_id)
    }
}
