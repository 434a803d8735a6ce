//! Resource and operation metadata
//!
//! ```yaml
//! resources:
//!   App\Entity\Book:
//!     attributes:
//!       normalization_context: { iri_only: false }
//!     item_operations:
//!       get: { method: GET }
//!       patch:
//!         method: PATCH
//!         input_formats: { json: [application/merge-patch+json] }
//!         denormalization_context: { groups: [book:write] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::groups::OperationType;

/// One operation of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    #[serde(default)]
    pub method: Option<String>,
    /// Format name → accepted MIME types.
    #[serde(default)]
    pub input_formats: IndexMap<String, Vec<String>>,
    /// Everything else: `normalization_context`, `input`, `output`, ...
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl OperationMetadata {
    pub fn with_method(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_input_format(mut self, format: impl Into<String>, mime_types: &[&str]) -> Self {
        self.input_formats.insert(
            format.into(),
            mime_types.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    /// PATCH accepting JSON merge-patch documents.
    pub fn accepts_merge_patch(&self) -> bool {
        self.method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("PATCH"))
            .unwrap_or(false)
            && self
                .input_formats
                .get("json")
                .map(|mimes| mimes.iter().any(|m| m == "application/merge-patch+json"))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Resource-level attributes, the fallback for operation attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub collection_operations: IndexMap<String, OperationMetadata>,
    #[serde(default)]
    pub item_operations: IndexMap<String, OperationMetadata>,
    #[serde(default)]
    pub subresource_operations: IndexMap<String, OperationMetadata>,
}

impl ResourceMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_operation(
        mut self,
        operation_type: OperationType,
        name: impl Into<String>,
        operation: OperationMetadata,
    ) -> Self {
        let operations = match operation_type {
            OperationType::Collection => &mut self.collection_operations,
            OperationType::Item => &mut self.item_operations,
            OperationType::Subresource => &mut self.subresource_operations,
        };
        operations.insert(name.into(), operation);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn operations(&self, operation_type: OperationType) -> &IndexMap<String, OperationMetadata> {
        match operation_type {
            OperationType::Collection => &self.collection_operations,
            OperationType::Item => &self.item_operations,
            OperationType::Subresource => &self.subresource_operations,
        }
    }

    /// Operation attribute `key`, falling back to the resource-level one.
    ///
    /// `null` counts as absent.
    pub fn typed_operation_attribute(
        &self,
        operation_type: OperationType,
        operation_name: &str,
        key: &str,
    ) -> Option<&Value> {
        self.operations(operation_type)
            .get(operation_name)
            .and_then(|op| op.attributes.get(key))
            .or_else(|| self.attributes.get(key))
            .filter(|value| !value.is_null())
    }
}

/// Source of resource metadata.
pub trait ResourceMetadataProvider: Send + Sync {
    fn resource(&self, resource_class: &str) -> Option<ResourceMetadata>;
}

/// Resource metadata declared up front, typically loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRegistry {
    #[serde(default)]
    resources: HashMap<String, ResourceMetadata>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, resource_class: impl Into<String>, metadata: ResourceMetadata) -> Self {
        self.resources.insert(resource_class.into(), metadata);
        self
    }

    /// Load resource metadata from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let registry = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        info!(
            "Loaded metadata for {} resources from {}",
            registry.resources.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceMetadataProvider for ResourceRegistry {
    fn resource(&self, resource_class: &str) -> Option<ResourceMetadata> {
        self.resources.get(resource_class).cloned()
    }
}
