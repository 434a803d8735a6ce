//! Raw mapping definitions
//!
//! A `MappingDefinition` is the validated, unresolved content of one or more
//! mapping files: type → operation group → attribute trees. Trees from later
//! files are appended after earlier ones, never replacing them.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

use crate::error::MappingError;

/// Attribute trees declared for one operation group of one type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTrees {
    trees: Vec<Mapping>,
}

impl GroupTrees {
    pub fn trees(&self) -> &[Mapping] {
        &self.trees
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingDefinition {
    types: IndexMap<String, IndexMap<String, GroupTrees>>,
}

impl MappingDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a definition from a parsed YAML document.
    ///
    /// `origin` names the source in error messages (usually a file path).
    pub fn from_value(value: Value, origin: &str) -> Result<Self, MappingError> {
        let mut definition = Self::new();

        let types = match value {
            Value::Null => return Ok(definition),
            Value::Mapping(m) if m.is_empty() => return Ok(definition),
            Value::Mapping(m) => m,
            other => {
                return Err(MappingError::malformed(
                    origin,
                    format!("expected a map of types, found {}", describe(&other)),
                ))
            }
        };

        for (type_key, groups) in types {
            let type_id = key_string(&type_key, origin)?;

            let groups = match groups {
                Value::Mapping(m) => m,
                other => {
                    return Err(MappingError::malformed(
                        origin,
                        format!(
                            "type \"{}\" must map operation groups to attributes, found {}",
                            type_id,
                            describe(&other)
                        ),
                    ))
                }
            };

            for (group_key, tree) in groups {
                let group = key_string(&group_key, origin)?;
                if group.contains(':') {
                    return Err(MappingError::malformed(
                        origin,
                        format!(
                            "group name \"{}\" of type \"{}\" must not contain ':'",
                            group, type_id
                        ),
                    ));
                }

                let tree = match tree {
                    Value::Mapping(m) if !m.is_empty() => m,
                    other if is_blank(&other) => {
                        return Err(MappingError::EmptyGroup {
                            type_id,
                            group,
                            origin: origin.to_string(),
                        })
                    }
                    other => {
                        return Err(MappingError::malformed(
                            origin,
                            format!(
                                "group \"{}\" of type \"{}\" must be a map of attributes, found {}",
                                group,
                                type_id,
                                describe(&other)
                            ),
                        ))
                    }
                };

                definition.push(&type_id, &group, tree);
            }
        }

        Ok(definition)
    }

    /// Parse a definition from YAML text.
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self, MappingError> {
        let value: Value = serde_yaml::from_str(yaml).map_err(|source| MappingError::Yaml {
            path: origin.into(),
            source,
        })?;
        Self::from_value(value, origin)
    }

    /// Append one attribute tree for `(type_id, group)`.
    pub fn push(&mut self, type_id: &str, group: &str, tree: Mapping) {
        self.types
            .entry(type_id.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default()
            .trees
            .push(tree);
    }

    /// Additively merge `other` after the content already present.
    pub fn merge(&mut self, other: MappingDefinition) {
        for (type_id, groups) in other.types {
            let target = self.types.entry(type_id).or_default();
            for (group, trees) in groups {
                target.entry(group).or_default().trees.extend(trees.trees);
            }
        }
    }

    /// Mapped type identifiers in declaration order.
    pub fn type_ids(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(|k| k.as_str())
    }

    pub fn groups(&self, type_id: &str) -> Option<&IndexMap<String, GroupTrees>> {
        self.types.get(type_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexMap<String, GroupTrees>)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.types.values().map(|g| g.len()).sum()
    }
}

fn key_string(key: &Value, origin: &str) -> Result<String, MappingError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        other => Err(MappingError::malformed(
            origin,
            format!("keys must be strings, found {}", describe(other)),
        )),
    }
}

pub(crate) fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a map",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Group bodies that declare nothing: `~`, `{}`, `[]`, `""` or `false`.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Mapping(m) => m.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
