//! Path resolver
//!
//! Finds the nested type reachable through a field. Resolution order, first
//! match wins:
//! 1. accessor `get<Field>` declared return type (collection wrappers skipped)
//! 2. `@return TypeName` in the accessor's doc comment
//! 3. association metadata on the property (`one_to_many`, ...)
//! 4. the property's declared type, or `@var TypeName` in its doc comment
//!
//! Every candidate must name a known type, either as written or qualified
//! with the owner's namespace. `None` means the field is a terminal scalar.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::TypeIntrospector;
use crate::config::FieldGateConfig;

static RETURN_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@return\s*([A-Za-z_\\:][A-Za-z0-9_\\:]*)(\[\])?").expect("valid regex")
});

static VAR_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@var\s*([A-Za-z_\\:][A-Za-z0-9_\\:]*)(\[\])?").expect("valid regex")
});

pub struct PathResolver {
    introspector: Arc<dyn TypeIntrospector>,
    namespace_separator: String,
    collection_types: Vec<String>,
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("namespace_separator", &self.namespace_separator)
            .field("collection_types", &self.collection_types)
            .finish_non_exhaustive()
    }
}

impl PathResolver {
    /// Resolver with the default separator and collection list.
    pub fn new(introspector: Arc<dyn TypeIntrospector>) -> Self {
        Self::with_config(introspector, &FieldGateConfig::default())
    }

    pub fn with_config(introspector: Arc<dyn TypeIntrospector>, config: &FieldGateConfig) -> Self {
        Self {
            introspector,
            namespace_separator: config.namespace_separator.clone(),
            collection_types: config.collection_types.clone(),
        }
    }

    pub fn namespace_separator(&self) -> &str {
        &self.namespace_separator
    }

    /// Nested type reachable from `owner` through `field`, if any.
    pub fn resolve_field_type(&self, owner: &str, field: &str) -> Option<String> {
        let method = format!("get{}", as_camel_case(field, &self.namespace_separator));

        if let Some(accessor) = self.introspector.accessor(owner, &method) {
            let candidate = accessor
                .return_type
                .filter(|t| !self.is_collection(t))
                .or_else(|| {
                    accessor
                        .doc_comment
                        .as_deref()
                        .and_then(|doc| annotation(&RETURN_ANNOTATION, doc))
                });

            if let Some(found) = candidate.and_then(|t| self.validate(owner, &t)) {
                debug!(owner, field, nested = %found, "resolved through accessor {}", method);
                return Some(found);
            }
        }

        let property = self.introspector.property(owner, field)?;

        for relation in &property.relations {
            if let Some(found) = self.validate(owner, &relation.target) {
                debug!(owner, field, nested = %found, "resolved through {:?} relation", relation.kind);
                return Some(found);
            }
        }

        let candidate = property.declared_type.or_else(|| {
            property
                .doc_comment
                .as_deref()
                .and_then(|doc| annotation(&VAR_ANNOTATION, doc))
        });

        let found = candidate.and_then(|t| self.validate(owner, &t));
        if let Some(found) = &found {
            debug!(owner, field, nested = %found, "resolved through property type");
        }
        found
    }

    fn is_collection(&self, type_name: &str) -> bool {
        let trimmed = type_name.trim_start_matches(self.namespace_separator.as_str());
        self.collection_types.iter().any(|c| c == trimmed)
    }

    /// Confirm `candidate` names a known type, qualifying short names with
    /// the owner's namespace.
    fn validate(&self, owner: &str, candidate: &str) -> Option<String> {
        let sep = self.namespace_separator.as_str();
        let candidate = candidate.trim().trim_start_matches(sep);

        if candidate.is_empty() || self.is_collection(candidate) {
            return None;
        }

        if self.introspector.type_exists(candidate) {
            return Some(candidate.to_string());
        }

        let namespace = owner.rsplit_once(sep).map(|(ns, _)| ns)?;
        let qualified = format!("{}{}{}", namespace, sep, candidate);
        self.introspector
            .type_exists(&qualified)
            .then_some(qualified)
    }
}

fn annotation(pattern: &Regex, doc: &str) -> Option<String> {
    pattern
        .captures(doc)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

/// `first_name` / `first.name` / `first\name` → `FirstName`.
///
/// Each word's first letter is upper-cased; the rest is kept as written.
pub fn as_camel_case(field: &str, namespace_separator: &str) -> String {
    let spaced = if namespace_separator.is_empty() {
        field.to_string()
    } else {
        field.replace(namespace_separator, " ")
    };

    spaced
        .split(|c: char| c == '_' || c == '.' || c == ' ')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
