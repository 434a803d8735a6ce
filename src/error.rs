//! Error types for mapping load, expression evaluation and context building
//!
//! Mapping errors are fatal at load time and abort the whole load. Context
//! errors reject a single request.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating, reading or resolving mapping definitions.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("mapping source \"{location}\" is not a local file")]
    NotLocalFile { location: String },

    #[error("malformed mapping in {origin}: {message}")]
    Malformed { origin: String, message: String },

    #[error("the mapping described for group \"{group}\" of type \"{type_id}\" in {origin} should not be empty")]
    EmptyGroup {
        type_id: String,
        group: String,
        origin: String,
    },

    #[error("directive \"{directive}\" in group \"{group}\" of type \"{type_id}\" has no enclosing attribute")]
    MissingParent {
        directive: String,
        type_id: String,
        group: String,
    },

    #[error("security prefix \"{prefix}\" in group \"{group}\" of type \"{type_id}\" has no matching _security{prefix} definition")]
    UnknownSecurityPrefix {
        prefix: String,
        type_id: String,
        group: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl MappingError {
    pub(crate) fn malformed(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Errors from parsing or evaluating a security expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("cannot parse expression \"{expression}\": {message}")]
    Parse { expression: String, message: String },

    #[error("variable \"{0}\" is not defined")]
    UnknownVariable(String),

    #[error("function \"{0}\" is not defined")]
    UnknownFunction(String),

    #[error("invalid argument for {function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// Errors surfaced while building a serialization config for a request.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("request attributes are not valid: {0}")]
    InvalidRequestAttributes(String),

    #[error("no resource metadata for \"{0}\"")]
    UnknownResource(String),

    #[error("cannot evaluate criteria \"{criteria}\": {source}")]
    Expression {
        criteria: String,
        #[source]
        source: ExpressionError,
    },

    #[error("mapping load failed: {0}")]
    Mapping(#[from] MappingError),
}

impl ContextError {
    /// Status code a request layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequestAttributes(_) => 400,
            Self::UnknownResource(_) => 404,
            Self::Expression { .. } => 500,
            Self::Mapping(_) => 500,
        }
    }
}
