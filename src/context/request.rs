//! Request attribute extraction

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ContextError;
use crate::groups::OperationType;

const RESOURCE_CLASS: &str = "_api_resource_class";
const SUBRESOURCE_CONTEXT: &str = "_api_subresource_context";
const OPERATION_KEYS: [(&str, OperationType); 3] = [
    ("_api_collection_operation_name", OperationType::Collection),
    ("_api_item_operation_name", OperationType::Item),
    ("_api_subresource_operation_name", OperationType::Subresource),
];

/// What the request layer hands over for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRequest {
    pub method: String,
    /// Full URI including scheme and host.
    pub uri: String,
    /// Path and query as received.
    pub request_uri: String,
    /// Request body format (`json`, `csv`, ...) or MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Routing attribute bag: `_api_*` keys, route parameters, `data`.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl RawRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let request_uri = request_uri_of(&uri);
        Self {
            method: method.into(),
            uri,
            request_uri,
            content_type: None,
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// The `data` attribute when it holds something.
    pub fn data(&self) -> Option<&Value> {
        self.attribute("data")
            .filter(|data| crate::expression::truthy(data))
    }

    pub fn is_csv(&self) -> bool {
        matches!(
            self.content_type.as_deref(),
            Some("csv") | Some("text/csv")
        )
    }
}

fn request_uri_of(uri: &str) -> String {
    match uri.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(index) => rest[index..].to_string(),
            None => "/".to_string(),
        },
        None => uri.to_string(),
    }
}

/// Nested-resource routing details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubresourceContext {
    /// Route parameter → owning resource class.
    pub identifiers: IndexMap<String, String>,
    pub property: Option<String>,
    pub resource_class: Option<String>,
}

/// Routing facts needed to build a serialization config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAttributes {
    pub resource_class: String,
    pub operation_type: OperationType,
    pub operation_name: String,
    pub subresource: Option<SubresourceContext>,
}

impl RequestAttributes {
    pub fn new(
        resource_class: impl Into<String>,
        operation_type: OperationType,
        operation_name: impl Into<String>,
    ) -> Self {
        Self {
            resource_class: resource_class.into(),
            operation_type,
            operation_name: operation_name.into(),
            subresource: None,
        }
    }

    /// Read the `_api_*` keys of the request's attribute bag.
    pub fn extract(request: &RawRequest) -> Result<Self, ContextError> {
        let resource_class = request
            .attribute(RESOURCE_CLASS)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ContextError::InvalidRequestAttributes(format!("missing {}", RESOURCE_CLASS))
            })?;

        let (operation_type, operation_name) = OPERATION_KEYS
            .iter()
            .find_map(|(key, operation_type)| {
                request
                    .attribute(key)
                    .and_then(Value::as_str)
                    .map(|name| (*operation_type, name))
            })
            .ok_or_else(|| {
                ContextError::InvalidRequestAttributes("missing operation name".to_string())
            })?;

        let subresource = request
            .attribute(SUBRESOURCE_CONTEXT)
            .map(parse_subresource)
            .transpose()?;

        Ok(Self {
            resource_class: resource_class.to_string(),
            operation_type,
            operation_name: operation_name.to_string(),
            subresource,
        })
    }
}

fn parse_subresource(value: &Value) -> Result<SubresourceContext, ContextError> {
    let invalid = |message: &str| {
        ContextError::InvalidRequestAttributes(format!("{}: {}", SUBRESOURCE_CONTEXT, message))
    };

    let context = value.as_object().ok_or_else(|| invalid("expected a map"))?;
    let mut subresource = SubresourceContext::default();

    if let Some(identifiers) = context.get("identifiers") {
        let identifiers = identifiers
            .as_object()
            .ok_or_else(|| invalid("identifiers must be a map"))?;
        for (parameter, target) in identifiers {
            // `[ResourceClass, property?, ...]` or a bare class name
            let class = match target {
                Value::Array(items) => items.first().and_then(Value::as_str),
                Value::String(class) => Some(class.as_str()),
                _ => None,
            }
            .ok_or_else(|| invalid("identifier targets must name a resource class"))?;
            subresource
                .identifiers
                .insert(parameter.clone(), class.to_string());
        }
    }

    subresource.property = context
        .get("property")
        .and_then(Value::as_str)
        .map(str::to_string);
    subresource.resource_class = context
        .get("resource_class")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(subresource)
}
