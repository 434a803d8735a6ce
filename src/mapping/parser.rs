//! Mapping parser
//!
//! Walks each type's operation-group trees and produces one `AttributeTable`
//! per type reached. Every plain field name gets the group tag
//! `"{Type}:{group}"`, suffixed with `":{condition}"` when a security
//! condition is in force. Reserved path segments:
//!
//! | segment            | effect                                                      |
//! |--------------------|-------------------------------------------------------------|
//! | `_security`        | tag the enclosing attribute, AND the condition into children |
//! | `_security_<name>` | define a condition for siblings marked `_<name>`            |
//! | `_<name>`          | apply the `_security_<name>` condition to the rest of a path |
//! | `_maxDepth`        | set the enclosing attribute's max depth                      |
//! | `_serializedName`  | rename the enclosing attribute                               |
//! | `_ignore`          | exclude the enclosing attribute                              |
//!
//! Whole-key `_security` and `_security_<name>` entries are applied before
//! their siblings.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use super::definition::{describe, MappingDefinition};
use super::table::{AttributeEntry, AttributeTable, AttributeTableBuilder};
use crate::error::MappingError;
use crate::introspect::PathResolver;

const SECURITY: &str = "_security";
const SECURITY_NAMED: &str = "_security_";

/// One path segment of an attribute key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    /// `_security_<name>`; carries the marker form `_<name>`.
    NamedSecurity(&'a str),
    Security,
    MaxDepth,
    SerializedName,
    Ignore,
    PrefixMarker(&'a str),
    Field(&'a str),
}

impl<'a> Segment<'a> {
    fn classify(segment: &'a str) -> Self {
        if segment.starts_with(SECURITY_NAMED) {
            Segment::NamedSecurity(&segment[SECURITY.len()..])
        } else if segment == SECURITY {
            Segment::Security
        } else if segment.starts_with("_maxDepth") {
            Segment::MaxDepth
        } else if segment.starts_with("_serializedName") {
            Segment::SerializedName
        } else if segment.starts_with("_ignore") {
            Segment::Ignore
        } else if segment.starts_with('_') {
            Segment::PrefixMarker(segment)
        } else {
            Segment::Field(segment)
        }
    }
}

/// Group being walked: root type, group name and its base tag.
struct Scope<'s> {
    root: &'s str,
    group: &'s str,
    base_group: String,
}

impl Scope<'_> {
    fn origin(&self) -> String {
        format!("group \"{}\" of type \"{}\"", self.group, self.root)
    }
}

/// Attribute a directive applies to.
#[derive(Debug, Clone)]
struct EntryRef {
    owner: String,
    field: String,
}

pub struct MappingParser<'r> {
    resolver: &'r PathResolver,
    builders: IndexMap<String, AttributeTableBuilder>,
}

impl<'r> MappingParser<'r> {
    pub fn new(resolver: &'r PathResolver) -> Self {
        Self {
            resolver,
            builders: IndexMap::new(),
        }
    }

    /// Resolve a whole definition into per-type attribute tables.
    pub fn parse(
        mut self,
        definition: &MappingDefinition,
    ) -> Result<IndexMap<String, AttributeTable>, MappingError> {
        for (type_id, groups) in definition.iter() {
            self.builder(type_id);

            for (group, trees) in groups {
                let scope = Scope {
                    root: type_id,
                    group,
                    base_group: format!("{}:{}", type_id, group),
                };

                for tree in trees.trees() {
                    if tree.is_empty() {
                        return Err(MappingError::EmptyGroup {
                            type_id: type_id.to_string(),
                            group: group.clone(),
                            origin: "mapping definition".to_string(),
                        });
                    }
                    self.process_attributes(&scope, tree, Some(type_id), None, None)?;
                }
            }
        }

        Ok(self
            .builders
            .into_iter()
            .map(|(type_id, builder)| (type_id, builder.build()))
            .collect())
    }

    /// Walk one level of an attribute tree.
    ///
    /// `owner` is `None` when the enclosing field has no resolvable type; only
    /// directives take effect at such a level.
    fn process_attributes(
        &mut self,
        scope: &Scope<'_>,
        tree: &Mapping,
        owner: Option<&str>,
        inherited: Option<String>,
        parent: Option<&EntryRef>,
    ) -> Result<(), MappingError> {
        let mut inherited = inherited;
        let mut prefixes: HashMap<String, String> = HashMap::new();

        for (key, value) in tree {
            if self.key_str(scope, key)? == SECURITY {
                self.apply_security(scope, value, &mut inherited, parent)?;
            }
        }

        for (key, value) in tree {
            let key = self.key_str(scope, key)?;
            if is_hoisted(key) && key != SECURITY {
                let marker = &key[SECURITY.len()..];
                let expression = security_expression(scope, key, value)?;
                prefixes.insert(marker.to_string(), combine(inherited.as_deref(), &expression));
            }
        }

        for (key, value) in tree {
            let key = self.key_str(scope, key)?;
            if is_hoisted(key) {
                continue;
            }

            let segments: Vec<&str> = key.split('.').collect();
            let last = segments.len() - 1;
            let mut cursor: Option<String> = owner.map(str::to_string);
            let mut prefix: Option<&str> = None;

            for (index, segment) in segments.iter().enumerate() {
                match Segment::classify(segment) {
                    Segment::NamedSecurity(marker) => {
                        let expression = security_expression(scope, segment, value)?;
                        prefixes.insert(
                            marker.to_string(),
                            combine(inherited.as_deref(), &expression),
                        );
                    }
                    Segment::Security => {
                        self.apply_security(scope, value, &mut inherited, parent)?;
                    }
                    Segment::MaxDepth => {
                        let depth = value
                            .as_u64()
                            .and_then(|d| u32::try_from(d).ok())
                            .ok_or_else(|| {
                                MappingError::malformed(
                                    scope.origin(),
                                    format!(
                                        "{} expects a non-negative integer, found {}",
                                        segment,
                                        describe(value)
                                    ),
                                )
                            })?;
                        self.parent_entry(scope, parent, segment)?
                            .set_max_depth(depth);
                    }
                    Segment::SerializedName => {
                        let name = value.as_str().ok_or_else(|| {
                            MappingError::malformed(
                                scope.origin(),
                                format!("{} expects a string, found {}", segment, describe(value)),
                            )
                        })?;
                        self.parent_entry(scope, parent, segment)?
                            .set_serialized_name(name);
                    }
                    Segment::Ignore => {
                        let ignore = value.as_bool().ok_or_else(|| {
                            MappingError::malformed(
                                scope.origin(),
                                format!("{} expects a boolean, found {}", segment, describe(value)),
                            )
                        })?;
                        self.parent_entry(scope, parent, segment)?.set_ignore(ignore);
                    }
                    Segment::PrefixMarker(marker) => {
                        prefix = Some(marker);
                    }
                    Segment::Field(field) => {
                        let Some(current) = cursor.take() else {
                            warn!(
                                group = scope.group,
                                root = scope.root,
                                "skipping \"{}\": enclosing attribute has no resolvable type",
                                key
                            );
                            break;
                        };

                        let condition = match prefix {
                            Some(marker) => Some(prefixes.get(marker).cloned().ok_or_else(|| {
                                MappingError::UnknownSecurityPrefix {
                                    prefix: marker.to_string(),
                                    type_id: scope.root.to_string(),
                                    group: scope.group.to_string(),
                                }
                            })?),
                            None => inherited.clone(),
                        };

                        let is_last = index == last;
                        let group = group_tag(&scope.base_group, condition.as_deref());

                        // The tag of a field guarded by its own `_security` is
                        // added when that directive is applied.
                        let deferred = is_last && has_security_key(value);
                        self.builder(&current).entry(field);
                        if !deferred {
                            self.builder(&current).entry(field).add_group(group.clone());
                            self.builder(scope.root).add_catch_all(group);
                        }

                        let nested = self.resolver.resolve_field_type(&current, field);
                        let entry = EntryRef {
                            owner: current,
                            field: field.to_string(),
                        };

                        if is_last {
                            match value {
                                Value::Null => {}
                                Value::Mapping(subtree) if subtree.is_empty() => {}
                                Value::Mapping(subtree) => {
                                    if let Some(nested) = &nested {
                                        debug!(
                                            group = scope.group,
                                            "descending {}.{} into {}",
                                            entry.owner,
                                            entry.field,
                                            nested
                                        );
                                    }
                                    self.process_attributes(
                                        scope,
                                        subtree,
                                        nested.as_deref(),
                                        condition,
                                        Some(&entry),
                                    )?;
                                }
                                other => {
                                    return Err(MappingError::malformed(
                                        scope.origin(),
                                        format!(
                                            "attribute \"{}\" must map to nothing or to nested attributes, found {}",
                                            key,
                                            describe(other)
                                        ),
                                    ));
                                }
                            }
                        } else if nested.is_some() {
                            cursor = nested;
                        } else {
                            warn!(
                                group = scope.group,
                                root = scope.root,
                                "cannot resolve the type of {}.{}; skipping the rest of \"{}\"",
                                entry.owner,
                                entry.field,
                                key
                            );
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply a `_security` directive to the enclosing attribute.
    fn apply_security(
        &mut self,
        scope: &Scope<'_>,
        value: &Value,
        inherited: &mut Option<String>,
        parent: Option<&EntryRef>,
    ) -> Result<(), MappingError> {
        let expression = security_expression(scope, SECURITY, value)?;
        let parent = parent.ok_or_else(|| missing_parent(scope, SECURITY))?;

        let combined = combine(inherited.as_deref(), &expression);
        let group = group_tag(&scope.base_group, Some(&combined));

        self.builder(&parent.owner)
            .entry(&parent.field)
            .add_group(group.clone());
        self.builder(scope.root).add_catch_all(group);

        *inherited = Some(combined);
        Ok(())
    }

    fn parent_entry(
        &mut self,
        scope: &Scope<'_>,
        parent: Option<&EntryRef>,
        directive: &str,
    ) -> Result<&mut AttributeEntry, MappingError> {
        let parent = parent.ok_or_else(|| missing_parent(scope, directive))?;
        Ok(self.builder(&parent.owner).entry(&parent.field))
    }

    fn builder(&mut self, type_id: &str) -> &mut AttributeTableBuilder {
        self.builders
            .entry(type_id.to_string())
            .or_insert_with(|| AttributeTableBuilder::new(type_id))
    }

    fn key_str<'v>(&self, scope: &Scope<'_>, key: &'v Value) -> Result<&'v str, MappingError> {
        key.as_str().ok_or_else(|| {
            MappingError::malformed(
                scope.origin(),
                format!("attribute keys must be strings, found {}", describe(key)),
            )
        })
    }
}

/// Whole keys applied before the rest of their level.
fn is_hoisted(key: &str) -> bool {
    key == SECURITY || (key.starts_with(SECURITY_NAMED) && !key.contains('.'))
}

fn has_security_key(value: &Value) -> bool {
    value
        .as_mapping()
        .map(|m| m.iter().any(|(k, _)| k.as_str() == Some(SECURITY)))
        .unwrap_or(false)
}

fn security_expression(
    scope: &Scope<'_>,
    directive: &str,
    value: &Value,
) -> Result<String, MappingError> {
    match value.as_str().map(str::trim) {
        Some(expression) if !expression.is_empty() => Ok(expression.to_string()),
        _ => Err(MappingError::malformed(
            scope.origin(),
            format!(
                "{} expects a non-empty expression, found {}",
                directive,
                describe(value)
            ),
        )),
    }
}

fn missing_parent(scope: &Scope<'_>, directive: &str) -> MappingError {
    MappingError::MissingParent {
        directive: directive.to_string(),
        type_id: scope.root.to_string(),
        group: scope.group.to_string(),
    }
}

/// `(inherited) and (expression)`, or `expression` alone.
fn combine(inherited: Option<&str>, expression: &str) -> String {
    match inherited {
        Some(inherited) => format!("({}) and ({})", inherited, expression),
        None => expression.to_string(),
    }
}

fn group_tag(base_group: &str, condition: Option<&str>) -> String {
    match condition {
        Some(condition) => format!("{}:{}", base_group, condition),
        None => base_group.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{RelationKind, SchemaRegistry, TypeSchema};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const GET: &str = "Entity:item.normalization.get";

    fn resolver() -> PathResolver {
        let registry = SchemaRegistry::new()
            .with_type(
                "Entity",
                TypeSchema::new()
                    .accessor("getAuthor", "Person")
                    .relation("reviews", RelationKind::OneToMany, "Review"),
            )
            .with_type(
                "Person",
                TypeSchema::new().accessor("getAddress", "Address"),
            )
            .with_type("Address", TypeSchema::new())
            .with_type("Review", TypeSchema::new());
        PathResolver::new(Arc::new(registry))
    }

    fn parse(yaml: &str) -> Result<IndexMap<String, AttributeTable>, MappingError> {
        let definition = MappingDefinition::from_yaml_str(yaml, "inline")?;
        let resolver = resolver();
        MappingParser::new(&resolver).parse(&definition)
    }

    fn groups(tables: &IndexMap<String, AttributeTable>, type_id: &str, field: &str) -> Vec<String> {
        tables[type_id]
            .get(field)
            .unwrap_or_else(|| panic!("{type_id}.{field} missing"))
            .groups()
            .iter()
            .cloned()
            .collect()
    }

    #[test]
    fn plain_fields_get_base_group() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    name: ~
    email:
"#,
        )
        .unwrap();

        assert_eq!(groups(&tables, "Entity", "name"), vec![GET]);
        assert_eq!(groups(&tables, "Entity", "email"), vec![GET]);
        assert_eq!(
            tables["Entity"].all_groups().iter().collect::<Vec<_>>(),
            vec![GET]
        );
    }

    #[test]
    fn security_on_scalar_field_tags_only_the_condition() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    name: ~
    secret:
      _security: "is_granted('ROLE_ADMIN')"
"#,
        )
        .unwrap();

        let secret = format!("{GET}:is_granted('ROLE_ADMIN')");
        assert_eq!(groups(&tables, "Entity", "secret"), vec![secret.clone()]);
        assert!(tables["Entity"].all_groups().contains(&secret));
        assert!(tables["Entity"].all_groups().contains(GET));
    }

    #[test]
    fn nested_path_lands_on_nested_type() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      firstName: ~
"#,
        )
        .unwrap();

        assert_eq!(groups(&tables, "Person", "firstName"), vec![GET]);
        assert!(tables["Entity"].get("firstName").is_none());
        assert_eq!(groups(&tables, "Entity", "author"), vec![GET]);
    }

    #[test]
    fn dotted_path_is_equivalent_to_nesting() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    author.address.city: ~
"#,
        )
        .unwrap();

        assert_eq!(groups(&tables, "Entity", "author"), vec![GET]);
        assert_eq!(groups(&tables, "Person", "address"), vec![GET]);
        assert_eq!(groups(&tables, "Address", "city"), vec![GET]);
    }

    #[test]
    fn security_propagates_to_children() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      _security: "is_granted('ROLE_USER')"
      firstName: ~
      address:
        _security: "object.public"
        city: ~
"#,
        )
        .unwrap();

        let user = format!("{GET}:is_granted('ROLE_USER')");
        let nested = format!("{GET}:(is_granted('ROLE_USER')) and (object.public)");

        assert_eq!(groups(&tables, "Entity", "author"), vec![user.clone()]);
        assert_eq!(groups(&tables, "Person", "firstName"), vec![user.clone()]);
        assert_eq!(groups(&tables, "Person", "address"), vec![nested.clone()]);
        assert_eq!(groups(&tables, "Address", "city"), vec![nested.clone()]);

        let all: Vec<_> = tables["Entity"].all_groups().iter().cloned().collect();
        assert_eq!(all, vec![user, nested]);
    }

    #[test]
    fn security_applies_regardless_of_key_order() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      firstName: ~
      _security: "is_granted('ROLE_USER')"
"#,
        )
        .unwrap();

        assert_eq!(
            groups(&tables, "Person", "firstName"),
            vec![format!("{GET}:is_granted('ROLE_USER')")]
        );
    }

    #[test]
    fn named_prefixes_scope_siblings() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      _security_owner: "object.owner == user"
      _security_admin: "is_granted('ROLE_ADMIN')"
      _owner.firstName: ~
      _admin.address: ~
      lastName: ~
"#,
        )
        .unwrap();

        assert_eq!(
            groups(&tables, "Person", "firstName"),
            vec![format!("{GET}:object.owner == user")]
        );
        assert_eq!(
            groups(&tables, "Person", "address"),
            vec![format!("{GET}:is_granted('ROLE_ADMIN')")]
        );
        assert_eq!(groups(&tables, "Person", "lastName"), vec![GET]);
    }

    #[test]
    fn named_prefix_includes_inherited_condition() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      _security: "is_granted('ROLE_USER')"
      _security_admin: "is_granted('ROLE_ADMIN')"
      _admin.lastName: ~
"#,
        )
        .unwrap();

        assert_eq!(
            groups(&tables, "Person", "lastName"),
            vec![format!(
                "{GET}:(is_granted('ROLE_USER')) and (is_granted('ROLE_ADMIN'))"
            )]
        );
    }

    #[test]
    fn unknown_prefix_is_an_error() {
        let err = parse(
            r#"
Entity:
  item.normalization.get:
    _owner.name: ~
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::UnknownSecurityPrefix { ref prefix, .. } if prefix == "_owner"));
    }

    #[test]
    fn top_level_security_has_no_parent() {
        let err = parse(
            r#"
Entity:
  item.normalization.get:
    _security: "is_granted('ROLE_ADMIN')"
    name: ~
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::MissingParent { ref directive, .. } if directive == "_security"));

        let err = parse(
            r#"
Entity:
  item.normalization.get:
    _maxDepth: 1
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::MissingParent { .. }));
    }

    #[test]
    fn scalar_directives_set_parent_entry() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      _maxDepth: 2
      _serializedName: writer
      firstName: ~
    internal:
      _ignore: true
"#,
        )
        .unwrap();

        let author = tables["Entity"].get("author").unwrap();
        assert_eq!(author.max_depth(), Some(2));
        assert_eq!(author.serialized_name(), Some("writer"));
        assert!(!author.ignore());
        assert!(tables["Entity"].get("internal").unwrap().ignore());
    }

    #[test]
    fn directive_values_are_type_checked() {
        let err = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      _maxDepth: deep
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Malformed { .. }));

        let err = parse(
            r#"
Entity:
  item.normalization.get:
    author:
      _security: ""
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Malformed { .. }));
    }

    #[test]
    fn unresolvable_intermediate_skips_rest_of_path() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    title.length: ~
    name: ~
"#,
        )
        .unwrap();

        assert_eq!(groups(&tables, "Entity", "title"), vec![GET]);
        assert!(tables["Entity"].get("length").is_none());
        assert_eq!(groups(&tables, "Entity", "name"), vec![GET]);
    }

    #[test]
    fn groups_from_several_operations_accumulate() {
        let tables = parse(
            r#"
Entity:
  item.normalization.get:
    name: ~
  item.denormalization.put:
    name: ~
  collection.normalization.get:
    name: ~
"#,
        )
        .unwrap();

        assert_eq!(
            groups(&tables, "Entity", "name"),
            vec![
                GET.to_string(),
                "Entity:item.denormalization.put".to_string(),
                "Entity:collection.normalization.get".to_string(),
            ]
        );
        assert_eq!(tables["Entity"].all_groups().len(), 3);
    }

    #[test]
    fn later_trees_override_scalar_directives() {
        let mut definition = MappingDefinition::from_yaml_str(
            r#"
Entity:
  item.normalization.get:
    name:
      _ignore: true
      _maxDepth: 1
"#,
            "first.yaml",
        )
        .unwrap();
        definition.merge(
            MappingDefinition::from_yaml_str(
                r#"
Entity:
  item.normalization.get:
    name:
      _ignore: false
      _serializedName: label
"#,
                "second.yaml",
            )
            .unwrap(),
        );

        let resolver = resolver();
        let tables = MappingParser::new(&resolver).parse(&definition).unwrap();
        let name = tables["Entity"].get("name").unwrap();

        assert!(!name.ignore());
        assert_eq!(name.max_depth(), Some(1));
        assert_eq!(name.serialized_name(), Some("label"));
        assert!(tables["Entity"].is_visible("name", &[GET]));
    }

    #[test]
    fn relation_targets_are_followed() {
        let tables = parse(
            r#"
Entity:
  collection.normalization.get:
    reviews:
      rating: ~
"#,
        )
        .unwrap();

        assert_eq!(
            groups(&tables, "Review", "rating"),
            vec!["Entity:collection.normalization.get"]
        );
    }

    #[test]
    fn non_map_attribute_value_is_malformed() {
        let err = parse(
            r#"
Entity:
  item.normalization.get:
    name: yes please
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Malformed { .. }));
    }
}
