//! Serializer-group mappings
//!
//! ```text
//! mapping files ──► loader ──► MappingDefinition ──► MappingParser ──► AttributeTable per type
//!                                                        │                     │
//!                                                  PathResolver         MappingRegistry
//! ```

mod definition;
mod loader;
mod parser;
mod registry;
mod table;

pub use definition::{GroupTrees, MappingDefinition};
pub use loader::{
    discover, ensure_local, load_mappings, load_yaml_file, LoadedMappings, MappingFormat,
    MappingLoader,
};
pub use parser::MappingParser;
pub use registry::MappingRegistry;
pub use table::{AttributeEntry, AttributeTable, AttributeTableBuilder};
