//! Restricted expression interpreter
//!
//! Evaluates parsed expressions over `serde_json::Value`. Truthiness follows
//! the usual loose rules: `null`, `false`, `0`, `""` and `[]` are false.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde_json::{Number, Value};

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::parser::parse_expression;
use super::{ExpressionEvaluator, Variables};
use crate::error::ExpressionError;

/// Bundled evaluator. Parsed expressions are cached by source text.
#[derive(Debug, Default)]
pub struct SafeExpressionEvaluator {
    cache: RwLock<HashMap<String, Arc<Expr>>>,
}

impl SafeExpressionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `expression` to a value rather than a boolean.
    pub fn evaluate_value(
        &self,
        expression: &str,
        variables: &Variables<'_>,
    ) -> Result<Value, ExpressionError> {
        let ast = self.parsed(expression)?;
        Interpreter { variables }.eval(&ast)
    }

    fn parsed(&self, expression: &str) -> Result<Arc<Expr>, ExpressionError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(ast) = cache.get(expression) {
                return Ok(Arc::clone(ast));
            }
        }

        let ast = Arc::new(parse_expression(expression)?);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(expression.to_string(), Arc::clone(&ast));
        }
        Ok(ast)
    }
}

impl ExpressionEvaluator for SafeExpressionEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        variables: &Variables<'_>,
    ) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, variables)
            .map(|value| truthy(&value))
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

struct Interpreter<'v, 'a> {
    variables: &'v Variables<'a>,
}

impl Interpreter<'_, '_> {
    fn eval(&self, expr: &Expr) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Variable(name) => self.variable(name),
            Expr::Member { target, name } => {
                let target = self.eval(target)?;
                member(&target, name)
            }
            Expr::MethodCall {
                target,
                method,
                args,
            } => self.method_call(target, method, args),
            Expr::Call { function, args } => self.call(function, args),
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&operand))),
                    UnaryOp::Neg => negate(&operand),
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
        }
    }

    fn variable(&self, name: &str) -> Result<Value, ExpressionError> {
        let checker = self.variables.auth_checker;
        match name {
            "object" => Ok(self.variables.object.cloned().unwrap_or(Value::Null)),
            "user" => Ok(checker.user().unwrap_or(Value::Null)),
            "roles" => Ok(Value::Array(
                checker.roles().into_iter().map(Value::String).collect(),
            )),
            _ => self
                .variables
                .extra
                .and_then(|extra| extra.get(name))
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownVariable(name.to_string())),
        }
    }

    fn method_call(
        &self,
        target: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<Value, ExpressionError> {
        if matches!(target, Expr::Variable(name) if name == "auth_checker") {
            return match method {
                "isGranted" => self.call("is_granted", args),
                _ => Err(ExpressionError::UnknownFunction(format!(
                    "auth_checker.{}",
                    method
                ))),
            };
        }

        if !args.is_empty() {
            return Err(ExpressionError::InvalidArgument {
                function: method.to_string(),
                message: "only zero-argument accessors can be called".to_string(),
            });
        }

        let target = self.eval(target)?;
        member(&target, &accessor_property(method))
    }

    fn call(&self, function: &str, args: &[Expr]) -> Result<Value, ExpressionError> {
        let checker = self.variables.auth_checker;
        match function {
            "is_granted" => {
                let (attribute, subject) = match args {
                    [attribute] => (self.eval(attribute)?, None),
                    [attribute, subject] => (self.eval(attribute)?, Some(self.eval(subject)?)),
                    _ => return Err(arity(function, "one or two arguments")),
                };
                let granted = match &attribute {
                    Value::String(attribute) => checker.is_granted(attribute, subject.as_ref()),
                    Value::Array(attributes) => attributes.iter().any(|a| {
                        a.as_str()
                            .map(|a| checker.is_granted(a, subject.as_ref()))
                            .unwrap_or(false)
                    }),
                    _ => {
                        return Err(ExpressionError::InvalidArgument {
                            function: function.to_string(),
                            message: "attribute must be a string or a list of strings".to_string(),
                        })
                    }
                };
                Ok(Value::Bool(granted))
            }
            "is_authenticated" => {
                if !args.is_empty() {
                    return Err(arity(function, "no arguments"));
                }
                Ok(Value::Bool(checker.is_authenticated()))
            }
            "has_role" => {
                let [role] = args else {
                    return Err(arity(function, "one argument"));
                };
                let role = self.eval(role)?;
                let role = role.as_str().ok_or_else(|| ExpressionError::InvalidArgument {
                    function: function.to_string(),
                    message: "role must be a string".to_string(),
                })?;
                Ok(Value::Bool(checker.roles().iter().any(|r| r == role)))
            }
            _ => Err(ExpressionError::UnknownFunction(function.to_string())),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, ExpressionError> {
        match op {
            BinaryOp::And => {
                let left = truthy(&self.eval(left)?);
                Ok(Value::Bool(left && truthy(&self.eval(right)?)))
            }
            BinaryOp::Or => {
                let left = truthy(&self.eval(left)?);
                Ok(Value::Bool(left || truthy(&self.eval(right)?)))
            }
            _ => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                compare(op, &left, &right).map(Value::Bool)
            }
        }
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(loose_eq(left, right)),
        BinaryOp::NotEq => Ok(!loose_eq(left, right)),
        BinaryOp::Identical => Ok(left == right),
        BinaryOp::NotIdentical => Ok(left != right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let (a, b) = numbers(left, right).ok_or_else(|| {
                        ExpressionError::TypeMismatch(format!(
                            "cannot order {} and {}",
                            kind(left),
                            kind(right)
                        ))
                    })?;
                    a.partial_cmp(&b).ok_or_else(|| {
                        ExpressionError::TypeMismatch("cannot order NaN".to_string())
                    })?
                }
            };
            Ok(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::In | BinaryOp::NotIn => {
            let Value::Array(items) = right else {
                return Err(ExpressionError::TypeMismatch(format!(
                    "right side of \"in\" must be a list, found {}",
                    kind(right)
                )));
            };
            let found = items.iter().any(|item| loose_eq(left, item));
            Ok(if op == BinaryOp::In { found } else { !found })
        }
        BinaryOp::Matches => {
            let (Value::String(subject), Value::String(pattern)) = (left, right) else {
                return Err(ExpressionError::TypeMismatch(
                    "\"matches\" needs a string and a pattern".to_string(),
                ));
            };
            Ok(compile_pattern(pattern)?.is_match(subject))
        }
        BinaryOp::And | BinaryOp::Or => Ok(truthy(left) && truthy(right)),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Bool(b), other) | (other, Value::Bool(b)) => *b == truthy(other),
        (Value::Null, other) | (other, Value::Null) => !truthy(other) && !other.is_array(),
        _ => match numbers(left, right) {
            Some((a, b)) => a == b,
            None => left == right,
        },
    }
}

/// Both sides as numbers, accepting numeric strings against numbers.
fn numbers(left: &Value, right: &Value) -> Option<(f64, f64)> {
    fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    if !left.is_number() && !right.is_number() {
        return None;
    }
    Some((as_number(left)?, as_number(right)?))
}

fn negate(value: &Value) -> Result<Value, ExpressionError> {
    match value {
        Value::Number(n) => {
            // i64::MIN has no integer negation; it takes the float path
            if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
                Ok(Value::Number(Number::from(i)))
            } else {
                n.as_f64()
                    .and_then(|f| Number::from_f64(-f))
                    .map(Value::Number)
                    .ok_or_else(|| ExpressionError::TypeMismatch("cannot negate number".into()))
            }
        }
        other => Err(ExpressionError::TypeMismatch(format!(
            "cannot negate {}",
            kind(other)
        ))),
    }
}

/// Property lookup. Missing properties and properties of `null` are `null`.
fn member(target: &Value, name: &str) -> Result<Value, ExpressionError> {
    match target {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(ExpressionError::TypeMismatch(format!(
            "cannot read \"{}\" of {}",
            name,
            kind(other)
        ))),
    }
}

/// `getOwner` → `owner`, `isPublic` → `public`, `hasItems` → `items`.
fn accessor_property(method: &str) -> String {
    for prefix in ["get", "is", "has"] {
        if let Some(rest) = method.strip_prefix(prefix) {
            let mut chars = rest.chars();
            if let Some(first) = chars.next().filter(|c| c.is_uppercase()) {
                return first.to_lowercase().chain(chars).collect();
            }
        }
    }
    method.to_string()
}

/// Accepts `/pattern/flags` as well as a bare pattern.
fn compile_pattern(pattern: &str) -> Result<Regex, ExpressionError> {
    let source = match pattern
        .strip_prefix('/')
        .and_then(|rest| rest.rsplit_once('/'))
    {
        Some((body, flags)) if flags.chars().all(|c| "imsx".contains(c)) => {
            if flags.is_empty() {
                body.to_string()
            } else {
                format!("(?{}){}", flags, body)
            }
        }
        _ => pattern.to_string(),
    };

    Regex::new(&source).map_err(|e| ExpressionError::InvalidArgument {
        function: "matches".to_string(),
        message: e.to_string(),
    })
}

fn arity(function: &str, expected: &str) -> ExpressionError {
    ExpressionError::InvalidArgument {
        function: function.to_string(),
        message: format!("expects {}", expected),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RoleAuthorizationChecker;
    use serde_json::json;

    fn eval_with(expr: &str, object: Option<&Value>, checker: &RoleAuthorizationChecker) -> bool {
        SafeExpressionEvaluator::new()
            .evaluate(expr, &Variables::new(object, checker))
            .unwrap()
    }

    fn eval(expr: &str) -> bool {
        eval_with(expr, None, &RoleAuthorizationChecker::anonymous())
    }

    #[test]
    fn test_is_granted() {
        let admin = RoleAuthorizationChecker::new(json!({"id": 1}), ["ROLE_ADMIN"]);
        let user = RoleAuthorizationChecker::new(json!({"id": 2}), ["ROLE_USER"]);

        assert!(eval_with("is_granted('ROLE_ADMIN')", None, &admin));
        assert!(!eval_with("is_granted('ROLE_ADMIN')", None, &user));
        assert!(eval_with("is_granted(['ROLE_ADMIN', 'ROLE_USER'])", None, &user));
        assert!(eval_with("auth_checker.isGranted('ROLE_USER')", None, &user));
        assert!(eval_with("has_role('ROLE_USER') and is_authenticated()", None, &user));
        assert!(!eval("is_authenticated()"));
    }

    #[test]
    fn test_object_access() {
        let book = json!({"owner": {"id": 2}, "public": false, "tags": ["a", "b"]});
        let owner = RoleAuthorizationChecker::new(json!({"id": 2}), ["ROLE_USER"]);
        let other = RoleAuthorizationChecker::new(json!({"id": 3}), ["ROLE_USER"]);

        assert!(eval_with("object.owner == user", Some(&book), &owner));
        assert!(!eval_with("object.owner == user", Some(&book), &other));
        assert!(eval_with("object.getOwner().id === 2", Some(&book), &other));
        assert!(!eval_with("object.isPublic()", Some(&book), &other));
        assert!(eval_with("'a' in object.tags", Some(&book), &other));
        assert!(eval_with("object.missing.deeper == null", Some(&book), &other));
    }

    #[test]
    fn test_operators() {
        assert!(eval("1 < 2 && 2 <= 2 and 3 > 2 and 3 >= 3"));
        assert!(eval("not false"));
        assert!(eval("!(1 == 2)"));
        assert!(eval("'5' == 5"));
        assert!(!eval("'5' === 5"));
        assert!(eval("'5' !== 5"));
        assert!(eval("'x' not in ['a', 'b']"));
        assert!(eval("'abc' matches '/^A/i'"));
        assert!(eval("'abc' matches 'b'"));
        assert!(eval("-1 < 0"));
        assert!(eval("false or 'yes'"));
        assert!(!eval("0 or '' or [] or null"));
    }

    #[test]
    fn test_errors() {
        let evaluator = SafeExpressionEvaluator::new();
        let checker = RoleAuthorizationChecker::anonymous();
        let vars = Variables::new(None, &checker);

        assert_eq!(
            evaluator.evaluate("secret", &vars),
            Err(ExpressionError::UnknownVariable("secret".to_string()))
        );
        assert_eq!(
            evaluator.evaluate("system('ls')", &vars),
            Err(ExpressionError::UnknownFunction("system".to_string()))
        );
        assert!(matches!(
            evaluator.evaluate("1 in 2", &vars),
            Err(ExpressionError::TypeMismatch(_))
        ));
        assert!(matches!(
            evaluator.evaluate("object.save(1)", &vars),
            Err(ExpressionError::InvalidArgument { .. })
        ));
        assert!(matches!(
            evaluator.evaluate("is_granted(", &vars),
            Err(ExpressionError::Parse { .. })
        ));
    }

    #[test]
    fn test_extra_variables_and_cache() {
        let evaluator = SafeExpressionEvaluator::new();
        let checker = RoleAuthorizationChecker::anonymous();
        let mut extra = serde_json::Map::new();
        extra.insert("limit".to_string(), json!(10));
        let vars = Variables::new(None, &checker).with_extra(&extra);

        assert!(evaluator.evaluate("limit > 5", &vars).unwrap());
        assert!(evaluator.evaluate("limit > 5", &vars).unwrap());
        assert_eq!(evaluator.cache.read().unwrap().len(), 1);
    }

    #[test]
    fn test_negate_extreme_integers() {
        let checker = RoleAuthorizationChecker::anonymous();
        let object = json!({"n": i64::MIN, "m": -5});

        assert!(eval_with("-object.n > 0", Some(&object), &checker));
        assert!(eval_with("-object.m == 5", Some(&object), &checker));
        assert!(eval_with("-(-object.m) == -5", Some(&object), &checker));
    }
}
