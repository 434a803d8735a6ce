//! Attribute tables
//!
//! One `AttributeTable` per mapped type: field name → `AttributeEntry`, plus
//! the catch-all group set that drives group evaluation. Tables are built
//! through `AttributeTableBuilder` during a parse and are read-only afterwards.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

/// Visibility metadata for one field of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeEntry {
    name: String,
    groups: IndexSet<String>,
    max_depth: Option<u32>,
    serialized_name: Option<String>,
    ignore: bool,
}

impl AttributeEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: IndexSet::new(),
            max_depth: None,
            serialized_name: None,
            ignore: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group tags in the order they were first added.
    pub fn groups(&self) -> &IndexSet<String> {
        &self.groups
    }

    pub fn max_depth(&self) -> Option<u32> {
        self.max_depth
    }

    pub fn serialized_name(&self) -> Option<&str> {
        self.serialized_name.as_deref()
    }

    pub fn ignore(&self) -> bool {
        self.ignore
    }

    /// True when the entry carries at least one of `active` groups.
    pub fn is_tagged_with_any<S: AsRef<str>>(&self, active: &[S]) -> bool {
        active.iter().any(|g| self.groups.contains(g.as_ref()))
    }

    pub(crate) fn add_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    pub(crate) fn set_max_depth(&mut self, depth: u32) {
        self.max_depth = Some(depth);
    }

    pub(crate) fn set_serialized_name(&mut self, name: impl Into<String>) {
        self.serialized_name = Some(name.into());
    }

    pub(crate) fn set_ignore(&mut self, ignore: bool) {
        self.ignore = ignore;
    }
}

/// Read-only visibility table for one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeTable {
    type_id: String,
    attributes: IndexMap<String, AttributeEntry>,
    all_groups: IndexSet<String>,
}

impl AttributeTable {
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn get(&self, field: &str) -> Option<&AttributeEntry> {
        self.attributes.get(field)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeEntry> {
        self.attributes.values()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Catch-all entry: every tag produced while walking this type's groups.
    pub fn all_groups(&self) -> &IndexSet<String> {
        &self.all_groups
    }

    /// Whether a serializer should read/write `field` under `active` groups.
    pub fn is_visible<S: AsRef<str>>(&self, field: &str, active: &[S]) -> bool {
        self.attributes
            .get(field)
            .map(|entry| !entry.ignore && entry.is_tagged_with_any(active))
            .unwrap_or(false)
    }

    /// Entries visible under `active` groups, in table order.
    pub fn visible_attributes<'a, S: AsRef<str>>(
        &'a self,
        active: &'a [S],
    ) -> impl Iterator<Item = &'a AttributeEntry> + 'a {
        self.attributes
            .values()
            .filter(move |entry| !entry.ignore && entry.is_tagged_with_any(active))
    }
}

/// Accumulates entries and tags for one type while a parse is running.
#[derive(Debug, Clone, Default)]
pub struct AttributeTableBuilder {
    type_id: String,
    attributes: IndexMap<String, AttributeEntry>,
    all_groups: IndexSet<String>,
}

impl AttributeTableBuilder {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            ..Default::default()
        }
    }

    /// Entry for `field`, created empty on first use.
    pub fn entry(&mut self, field: &str) -> &mut AttributeEntry {
        self.attributes
            .entry(field.to_string())
            .or_insert_with(|| AttributeEntry::new(field))
    }

    pub fn add_catch_all(&mut self, group: impl Into<String>) {
        self.all_groups.insert(group.into());
    }

    pub fn build(self) -> AttributeTable {
        AttributeTable {
            type_id: self.type_id,
            attributes: self.attributes,
            all_groups: self.all_groups,
        }
    }
}
