//! fieldgate: declarative, security-aware field visibility for serializers
//!
//! Mapping files declare, per type and operation group, which fields are
//! serialized and under which security conditions:
//!
//! ```yaml
//! App\Entity\Book:
//!   item.normalization.get:
//!     title: ~
//!     author:
//!       _security: "is_granted('ROLE_USER')"
//!       name: ~
//! ```
//!
//! This crate contains:
//! - Mapping discovery, loading and resolution into per-type attribute tables
//! - Path resolution of nested field types through a `TypeIntrospector`
//! - A restricted security expression language
//! - Per-request group evaluation and serialization context building
//!
//! Reading and writing the fields themselves is left to the serializer, which
//! only needs `SerializationConfig::groups` and `AttributeTable::is_visible`.

pub mod config;
pub mod context;
pub mod error;
pub mod expression;
pub mod groups;
pub mod introspect;
pub mod mapping;

// Re-export commonly used types
pub use config::{DirectionPolicy, FieldGateConfig};
pub use context::{
    ContextBuilder, RawRequest, RequestAttributes, ResourceMetadataProvider, ResourceRegistry,
    SerializationConfig,
};
pub use error::{ContextError, ExpressionError, MappingError};
pub use expression::{
    AuthorizationChecker, ExpressionEvaluator, RoleAuthorizationChecker, SafeExpressionEvaluator,
    Variables,
};
pub use groups::{Direction, GroupEvaluator, GroupTag, OperationType};
pub use introspect::{PathResolver, SchemaRegistry, TypeIntrospector};
pub use mapping::{
    AttributeEntry, AttributeTable, MappingDefinition, MappingParser, MappingRegistry,
};
