//! Type introspection
//!
//! The mapping parser needs to know which type a field leads to before it can
//! descend into a nested attribute tree. `TypeIntrospector` exposes the raw
//! facts (accessors, properties, relation metadata, known types);
//! `PathResolver` turns them into a nested type.
//!
//! ```text
//! TypeIntrospector (SchemaRegistry / host reflection)
//!        │
//!        ▼
//! PathResolver::resolve_field_type(owner, field) ──► Option<type id>
//!        │
//!        ▼
//! MappingParser (nested descent)
//! ```

mod resolver;
mod schema;

pub use resolver::{as_camel_case, PathResolver};
pub use schema::{AccessorSchema, PropertySchema, SchemaRegistry, TypeSchema};

use serde::{Deserialize, Serialize};

/// Association kinds that carry an explicit target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: String,
}

/// What is known about an accessor method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessorInfo {
    /// Declared return type, if any.
    pub return_type: Option<String>,
    /// Documentation comment, searched for `@return TypeName`.
    pub doc_comment: Option<String>,
}

/// What is known about a structural property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyInfo {
    pub declared_type: Option<String>,
    /// Documentation comment, searched for `@var TypeName`.
    pub doc_comment: Option<String>,
    pub relations: Vec<Relation>,
}

/// Reflection capability over the host's types.
///
/// Implemented by `SchemaRegistry` for static schemas; hosts with native
/// reflection can implement it directly.
pub trait TypeIntrospector: Send + Sync {
    /// Accessor method `method` declared on `owner`.
    fn accessor(&self, owner: &str, method: &str) -> Option<AccessorInfo>;

    /// Property `property` declared on `owner`.
    fn property(&self, owner: &str, property: &str) -> Option<PropertyInfo>;

    /// Whether `type_id` names a known application type.
    fn type_exists(&self, type_id: &str) -> bool;
}
