//! Group evaluation
//!
//! Narrows a type's catch-all group set to the groups active for one request.
//! A tag `"{Type}:{concerns}.{mode}.{verb}[:{criteria}]"` survives when:
//! - `concerns` is the requested operation type or `any`
//! - when normalizing, `mode` is `normalization` or `any`
//! - it has no criteria, or its criteria evaluate to true
//!
//! Criteria that read `object.` are dropped when no instance is available.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::DirectionPolicy;
use crate::error::{ContextError, ExpressionError};
use crate::expression::{AuthorizationChecker, ExpressionEvaluator, Variables};
use crate::mapping::AttributeTable;

const WILDCARD: &str = "any";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Collection,
    Item,
    Subresource,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Item => "item",
            Self::Subresource => "subresource",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection" => Ok(Self::Collection),
            "item" => Ok(Self::Item),
            "subresource" => Ok(Self::Subresource),
            other => Err(format!("unknown operation type \"{}\"", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Object to serialized form.
    Normalization,
    /// Serialized form to object.
    Denormalization,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normalization => "normalization",
            Self::Denormalization => "denormalization",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normalization" => Ok(Self::Normalization),
            "denormalization" => Ok(Self::Denormalization),
            other => Err(format!("unknown direction \"{}\"", other)),
        }
    }
}

/// A catch-all tag split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupTag<'a> {
    pub raw: &'a str,
    /// Operation group name, e.g. `item.normalization.get`.
    pub group: &'a str,
    pub concerns: &'a str,
    pub mode: &'a str,
    pub verb: &'a str,
    pub criteria: Option<&'a str>,
}

impl<'a> GroupTag<'a> {
    /// Split `raw`, a tag produced while walking `type_id`'s mapping.
    pub fn parse(type_id: &str, raw: &'a str) -> Self {
        let scoped = raw
            .strip_prefix(type_id)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(raw);

        let (group, criteria) = match scoped.split_once(':') {
            Some((group, criteria)) => (group, Some(criteria)),
            None => (scoped, None),
        };

        let mut parts = group.splitn(3, '.');
        let concerns = parts.next().unwrap_or_default();
        let mode = parts.next().unwrap_or_default();
        let verb = parts.next().unwrap_or_default();

        Self {
            raw,
            group,
            concerns,
            mode,
            verb,
            criteria,
        }
    }

    /// Whether the criteria read the instance.
    pub fn needs_instance(&self) -> bool {
        self.criteria
            .map(|c| c.contains("object."))
            .unwrap_or(false)
    }
}

/// Per-request group filter.
pub struct GroupEvaluator<'e> {
    evaluator: &'e dyn ExpressionEvaluator,
    auth_checker: &'e dyn AuthorizationChecker,
    direction_policy: DirectionPolicy,
}

impl<'e> GroupEvaluator<'e> {
    pub fn new(
        evaluator: &'e dyn ExpressionEvaluator,
        auth_checker: &'e dyn AuthorizationChecker,
    ) -> Self {
        Self {
            evaluator,
            auth_checker,
            direction_policy: DirectionPolicy::default(),
        }
    }

    pub fn with_direction_policy(mut self, policy: DirectionPolicy) -> Self {
        self.direction_policy = policy;
        self
    }

    /// Catch-all tags of `table` active for this request, in table order.
    pub fn active_groups(
        &self,
        table: &AttributeTable,
        operation_type: OperationType,
        direction: Direction,
        instance: Option<&Value>,
    ) -> Result<Vec<String>, ContextError> {
        let variables = Variables::new(instance, self.auth_checker);
        let mut active = Vec::new();

        for raw in table.all_groups() {
            let tag = GroupTag::parse(table.type_id(), raw);

            if let Some(reason) = self.rejection(&tag, operation_type, direction) {
                debug!(group = raw.as_str(), "rejected: {}", reason);
                continue;
            }

            if let Some(criteria) = tag.criteria {
                if instance.is_none() && tag.needs_instance() {
                    debug!(group = raw.as_str(), "rejected: criteria need an instance");
                    continue;
                }

                let passed = self
                    .evaluator
                    .evaluate(criteria, &variables)
                    .map_err(|source: ExpressionError| ContextError::Expression {
                        criteria: criteria.to_string(),
                        source,
                    })?;
                if !passed {
                    debug!(group = raw.as_str(), "rejected: criteria evaluated to false");
                    continue;
                }
            }

            debug!(group = raw.as_str(), "accepted");
            active.push(raw.clone());
        }

        Ok(active)
    }

    fn rejection(
        &self,
        tag: &GroupTag<'_>,
        operation_type: OperationType,
        direction: Direction,
    ) -> Option<&'static str> {
        if tag.concerns != operation_type.as_str() && tag.concerns != WILDCARD {
            return Some("operation type mismatch");
        }

        let mode_matches = tag.mode == direction.as_str() || tag.mode == WILDCARD;
        match (direction, self.direction_policy) {
            (Direction::Normalization, _) if !mode_matches => Some("direction mismatch"),
            (Direction::Denormalization, DirectionPolicy::Symmetric) if !mode_matches => {
                Some("direction mismatch")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{RoleAuthorizationChecker, SafeExpressionEvaluator};
    use crate::mapping::AttributeTableBuilder;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn table(tags: &[&str]) -> AttributeTable {
        let mut builder = AttributeTableBuilder::new("Entity");
        for tag in tags {
            builder.entry("field").add_group(*tag);
            builder.add_catch_all(*tag);
        }
        builder.build()
    }

    fn active(
        table: &AttributeTable,
        op: OperationType,
        direction: Direction,
        instance: Option<&Value>,
        checker: &RoleAuthorizationChecker,
    ) -> Vec<String> {
        let evaluator = SafeExpressionEvaluator::new();
        GroupEvaluator::new(&evaluator, checker)
            .active_groups(table, op, direction, instance)
            .unwrap()
    }

    #[test]
    fn tag_parsing() {
        let tag = GroupTag::parse(
            "App\\Book",
            "App\\Book:item.normalization.get:(is_granted('A')) and (object.x == 1)",
        );
        assert_eq!(tag.group, "item.normalization.get");
        assert_eq!(tag.concerns, "item");
        assert_eq!(tag.mode, "normalization");
        assert_eq!(tag.verb, "get");
        assert_eq!(tag.criteria, Some("(is_granted('A')) and (object.x == 1)"));
        assert!(tag.needs_instance());

        let tag = GroupTag::parse("Owner::Type", "Owner::Type:any.any");
        assert_eq!(tag.concerns, "any");
        assert_eq!(tag.mode, "any");
        assert_eq!(tag.verb, "");
        assert_eq!(tag.criteria, None);
    }

    #[test]
    fn operation_type_must_match() {
        let table = table(&[
            "Entity:item.normalization.get",
            "Entity:collection.normalization.get",
            "Entity:any.normalization.list",
        ]);
        let checker = RoleAuthorizationChecker::anonymous();

        assert_eq!(
            active(&table, OperationType::Item, Direction::Normalization, None, &checker),
            vec!["Entity:item.normalization.get", "Entity:any.normalization.list"]
        );
    }

    #[test]
    fn direction_filter_is_asymmetric_by_default() {
        let table = table(&[
            "Entity:item.normalization.get",
            "Entity:item.denormalization.put",
            "Entity:item.any.patch",
        ]);
        let checker = RoleAuthorizationChecker::anonymous();

        assert_eq!(
            active(&table, OperationType::Item, Direction::Normalization, None, &checker),
            vec!["Entity:item.normalization.get", "Entity:item.any.patch"]
        );
        assert_eq!(
            active(&table, OperationType::Item, Direction::Denormalization, None, &checker),
            vec![
                "Entity:item.normalization.get",
                "Entity:item.denormalization.put",
                "Entity:item.any.patch"
            ]
        );
    }

    #[test]
    fn symmetric_policy_filters_denormalization_too() {
        let table = table(&[
            "Entity:item.normalization.get",
            "Entity:item.denormalization.put",
        ]);
        let evaluator = SafeExpressionEvaluator::new();
        let checker = RoleAuthorizationChecker::anonymous();
        let groups = GroupEvaluator::new(&evaluator, &checker)
            .with_direction_policy(DirectionPolicy::Symmetric)
            .active_groups(&table, OperationType::Item, Direction::Denormalization, None)
            .unwrap();

        assert_eq!(groups, vec!["Entity:item.denormalization.put"]);
    }

    #[test]
    fn criteria_are_evaluated() {
        let table = table(&[
            "Entity:item.normalization.get",
            "Entity:item.normalization.get:is_granted('ROLE_ADMIN')",
        ]);
        let admin = RoleAuthorizationChecker::new(json!({"id": 1}), ["ROLE_ADMIN"]);
        let user = RoleAuthorizationChecker::new(json!({"id": 2}), ["ROLE_USER"]);

        assert_eq!(
            active(&table, OperationType::Item, Direction::Normalization, None, &admin).len(),
            2
        );
        assert_eq!(
            active(&table, OperationType::Item, Direction::Normalization, None, &user),
            vec!["Entity:item.normalization.get"]
        );
    }

    #[test]
    fn instance_criteria_need_an_instance() {
        let table = table(&["Entity:item.normalization.get:object.owner == user"]);
        let owner = RoleAuthorizationChecker::new(json!({"id": 2}), ["ROLE_USER"]);
        let book = json!({"owner": {"id": 2}});

        assert!(active(&table, OperationType::Item, Direction::Normalization, None, &owner)
            .is_empty());
        assert_eq!(
            active(&table, OperationType::Item, Direction::Normalization, Some(&book), &owner),
            vec!["Entity:item.normalization.get:object.owner == user"]
        );
    }

    #[test]
    fn evaluator_errors_propagate() {
        let table = table(&["Entity:item.normalization.get:unknown_fn()"]);
        let evaluator = SafeExpressionEvaluator::new();
        let checker = RoleAuthorizationChecker::anonymous();
        let err = GroupEvaluator::new(&evaluator, &checker)
            .active_groups(&table, OperationType::Item, Direction::Normalization, None)
            .unwrap_err();

        assert!(matches!(err, ContextError::Expression { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn custom_evaluator_is_invoked() {
        let table = table(&["Entity:item.normalization.get:anything at all"]);
        let checker = RoleAuthorizationChecker::anonymous();
        fn always(_: &str, _: &Variables<'_>) -> Result<bool, ExpressionError> {
            Ok(true)
        }

        let groups = GroupEvaluator::new(&always, &checker)
            .active_groups(&table, OperationType::Item, Direction::Normalization, None)
            .unwrap();
        assert_eq!(groups.len(), 1);
    }
}
