//! Security expressions
//!
//! Conditions attached by `_security` directives are evaluated through the
//! `ExpressionEvaluator` capability. `SafeExpressionEvaluator` is the bundled
//! implementation: a restricted language over JSON values with no access to
//! anything but the supplied variables and the authorization checker.

mod ast;
mod auth;
mod interpreter;
mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use auth::{AuthorizationChecker, RoleAuthorizationChecker};
pub use interpreter::{truthy, SafeExpressionEvaluator};
pub use parser::parse_expression;

use serde_json::{Map, Value};

use crate::error::ExpressionError;

/// Variables visible to an expression.
#[derive(Clone, Copy)]
pub struct Variables<'a> {
    /// The instance being serialized, bound to `object`.
    pub object: Option<&'a Value>,
    /// Caller identity, bound to `auth_checker`, `user` and `roles`.
    pub auth_checker: &'a dyn AuthorizationChecker,
    /// Additional named values.
    pub extra: Option<&'a Map<String, Value>>,
}

impl<'a> Variables<'a> {
    pub fn new(object: Option<&'a Value>, auth_checker: &'a dyn AuthorizationChecker) -> Self {
        Self {
            object,
            auth_checker,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: &'a Map<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl std::fmt::Debug for Variables<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variables")
            .field("object", &self.object)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Boolean evaluation of a security condition.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, variables: &Variables<'_>)
        -> Result<bool, ExpressionError>;
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&str, &Variables<'_>) -> Result<bool, ExpressionError> + Send + Sync,
{
    fn evaluate(
        &self,
        expression: &str,
        variables: &Variables<'_>,
    ) -> Result<bool, ExpressionError> {
        self(expression, variables)
    }
}
