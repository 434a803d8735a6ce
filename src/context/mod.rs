//! Serialization context builder
//!
//! Turns one request into the `SerializationConfig` handed to the serializer:
//!
//! ```text
//! RawRequest ──► RequestAttributes ──► ResourceMetadata (operation context)
//!                                            │
//!              explicit groups? ─── yes ─────┤
//!                     │ no                   ▼
//!        AttributeTable ──► GroupEvaluator ──► SerializationConfig
//! ```

mod request;
mod resource;

pub use request::{RawRequest, RequestAttributes, SubresourceContext};
pub use resource::{
    OperationMetadata, ResourceMetadata, ResourceMetadataProvider, ResourceRegistry,
};

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::DirectionPolicy;
use crate::error::{ContextError, MappingError};
use crate::expression::{AuthorizationChecker, ExpressionEvaluator};
use crate::groups::{Direction, GroupEvaluator, OperationType};
use crate::mapping::MappingRegistry;

/// Context keys mapped onto `SerializationConfig` fields.
const RESERVED_KEYS: &[&str] = &[
    "groups",
    "api_allow_update",
    "deep_object_to_populate",
    "as_collection",
    "skip_null_values",
    "enable_max_depth",
    "iri_only",
    "input",
    "output",
    "resource_class",
    "operation_type",
    "request_uri",
    "uri",
    "subresource_identifiers",
    "subresource_resources",
    "subresource_property",
    "subresource_resource_class",
    "swagger_definition_name",
];

/// Everything the serializer needs for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializationConfig {
    pub groups: Vec<String>,
    pub resource_class: String,
    pub operation_type: OperationType,
    pub operation_name: String,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_update: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_object_to_populate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_collection: Option<bool>,
    pub iri_only: bool,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub request_uri: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subresource_identifiers: Option<IndexMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subresource_resources: Option<IndexMap<String, IndexMap<String, Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subresource_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subresource_resource_class: Option<String>,
    pub enable_max_depth: bool,
    pub skip_null_values: bool,
    /// Remaining keys of the operation's serialization context.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

type RegistryInit = dyn Fn() -> Result<MappingRegistry, MappingError> + Send + Sync;

#[derive(Clone)]
enum Tables {
    Ready(Arc<MappingRegistry>),
    /// Built into the global registry on first use.
    Global(Arc<RegistryInit>),
}

/// Builds serialization configs. Holds no per-request state.
#[derive(Clone)]
pub struct ContextBuilder {
    tables: Tables,
    resources: Arc<dyn ResourceMetadataProvider>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    auth_checker: Arc<dyn AuthorizationChecker>,
    direction_policy: DirectionPolicy,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("direction_policy", &self.direction_policy)
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    pub fn new(
        registry: Arc<MappingRegistry>,
        resources: Arc<dyn ResourceMetadataProvider>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        auth_checker: Arc<dyn AuthorizationChecker>,
    ) -> Self {
        Self {
            tables: Tables::Ready(registry),
            resources,
            evaluator,
            auth_checker,
            direction_policy: DirectionPolicy::default(),
        }
    }

    /// Builder backed by the global registry, built by `init` on first use.
    pub fn with_global_registry<F>(
        init: F,
        resources: Arc<dyn ResourceMetadataProvider>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        auth_checker: Arc<dyn AuthorizationChecker>,
    ) -> Self
    where
        F: Fn() -> Result<MappingRegistry, MappingError> + Send + Sync + 'static,
    {
        Self {
            tables: Tables::Global(Arc::new(init)),
            resources,
            evaluator,
            auth_checker,
            direction_policy: DirectionPolicy::default(),
        }
    }

    pub fn with_direction_policy(mut self, policy: DirectionPolicy) -> Self {
        self.direction_policy = policy;
        self
    }

    /// Same builder acting for another caller.
    pub fn for_caller(&self, auth_checker: Arc<dyn AuthorizationChecker>) -> Self {
        Self {
            auth_checker,
            ..self.clone()
        }
    }

    fn registry(&self) -> Result<Arc<MappingRegistry>, ContextError> {
        match &self.tables {
            Tables::Ready(registry) => Ok(Arc::clone(registry)),
            Tables::Global(init) => Ok(MappingRegistry::global_or_try_init(|| init())?),
        }
    }

    /// Build the serialization config for `request`.
    ///
    /// `attributes` are read from the request's attribute bag when `None`.
    pub fn build_context(
        &self,
        request: &RawRequest,
        direction: Direction,
        attributes: Option<RequestAttributes>,
    ) -> Result<SerializationConfig, ContextError> {
        let attributes = match attributes {
            Some(attributes) => attributes,
            None => RequestAttributes::extract(request)?,
        };
        let operation_type = attributes.operation_type;
        let operation_name = attributes.operation_name.as_str();

        let resource = self
            .resources
            .resource(&attributes.resource_class)
            .ok_or_else(|| ContextError::UnknownResource(attributes.resource_class.clone()))?;

        let context_key = match direction {
            Direction::Normalization => "normalization_context",
            Direction::Denormalization => "denormalization_context",
        };
        let mut context = resource
            .typed_operation_attribute(operation_type, operation_name, context_key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut allow_update = bool_key(&context, "api_allow_update");
        let mut deep_object_to_populate = bool_key(&context, "deep_object_to_populate");
        let mut as_collection = bool_key(&context, "as_collection");

        if direction == Direction::Denormalization {
            if allow_update.is_none() {
                let method = request.method.to_ascii_uppercase();
                let writable = method == "PUT" || method == "PATCH";
                allow_update = Some(writable);
                if writable && method == "PATCH" {
                    deep_object_to_populate = deep_object_to_populate.or(Some(true));
                }
            }
            if request.is_csv() {
                as_collection = Some(false);
            }
        }

        let iri_only = resource
            .attribute("normalization_context")
            .and_then(|c| c.get("iri_only"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let input = resource
            .typed_operation_attribute(operation_type, operation_name, "input")
            .cloned();
        let output = resource
            .typed_operation_attribute(operation_type, operation_name, "output")
            .cloned();

        let (subresource_identifiers, subresource_resources) =
            match attributes.subresource.as_ref() {
                Some(subresource) => {
                    let (identifiers, resources) = subresource_ids(subresource, request);
                    (Some(identifiers), Some(resources))
                }
                None => (None, None),
            };
        let subresource_property = attributes
            .subresource
            .as_ref()
            .and_then(|s| s.property.clone());
        let subresource_resource_class = subresource_property.as_ref().and_then(|_| {
            attributes
                .subresource
                .as_ref()
                .and_then(|s| s.resource_class.clone())
        });

        let groups = match explicit_groups(context.get("groups")) {
            Some(groups) => {
                debug!(
                    resource = attributes.resource_class.as_str(),
                    "using {} configured groups",
                    groups.len()
                );
                groups
            }
            None => self.evaluate_groups(&attributes, direction, request)?,
        };

        let skip_null_values = bool_key(&context, "skip_null_values").unwrap_or_else(|| {
            resource
                .item_operations
                .values()
                .any(|operation| operation.accepts_merge_patch())
        });
        let enable_max_depth = bool_key(&context, "enable_max_depth").unwrap_or(true);

        context.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));

        Ok(SerializationConfig {
            groups,
            resource_class: attributes.resource_class.clone(),
            operation_type,
            operation_name: attributes.operation_name.clone(),
            direction,
            allow_update,
            deep_object_to_populate,
            as_collection,
            iri_only,
            input,
            output,
            request_uri: request.request_uri.clone(),
            uri: request.uri.clone(),
            subresource_identifiers,
            subresource_resources,
            subresource_property,
            subresource_resource_class,
            enable_max_depth,
            skip_null_values,
            extra: context,
        })
    }

    fn evaluate_groups(
        &self,
        attributes: &RequestAttributes,
        direction: Direction,
        request: &RawRequest,
    ) -> Result<Vec<String>, ContextError> {
        let registry = self.registry()?;
        let Some(table) = registry.table(&attributes.resource_class) else {
            debug!(
                resource = attributes.resource_class.as_str(),
                "no serializer groups mapped"
            );
            return Ok(Vec::new());
        };

        GroupEvaluator::new(self.evaluator.as_ref(), self.auth_checker.as_ref())
            .with_direction_policy(self.direction_policy)
            .active_groups(table, attributes.operation_type, direction, request.data())
    }
}

fn bool_key(context: &Map<String, Value>, key: &str) -> Option<bool> {
    context.get(key).and_then(Value::as_bool)
}

/// Configured groups, or `None` when evaluation should run.
fn explicit_groups(value: Option<&Value>) -> Option<Vec<String>> {
    let groups: Vec<String> = match value? {
        Value::String(group) => vec![group.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let groups: Vec<String> = groups.into_iter().filter(|g| !g.is_empty()).collect();
    (!groups.is_empty()).then_some(groups)
}

fn subresource_ids(
    subresource: &SubresourceContext,
    request: &RawRequest,
) -> (
    IndexMap<String, Value>,
    IndexMap<String, IndexMap<String, Value>>,
) {
    let mut identifiers = IndexMap::new();
    let mut resources: IndexMap<String, IndexMap<String, Value>> = IndexMap::new();

    for (parameter, resource_class) in &subresource.identifiers {
        let value = request.attribute(parameter).cloned().unwrap_or(Value::Null);
        resources
            .entry(resource_class.clone())
            .or_default()
            .insert(parameter.clone(), value.clone());
        identifiers.insert(parameter.clone(), value);
    }

    (identifiers, resources)
}
