//! Caller identity and authorization

use serde_json::Value;

/// Authorization capability exposed to security expressions.
pub trait AuthorizationChecker: Send + Sync {
    /// Whether the caller holds `attribute`, optionally against `subject`.
    fn is_granted(&self, attribute: &str, subject: Option<&Value>) -> bool;

    /// The authenticated user, if any.
    fn user(&self) -> Option<Value> {
        None
    }

    fn roles(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }
}

/// Grants an attribute when it is one of the caller's roles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleAuthorizationChecker {
    user: Option<Value>,
    roles: Vec<String>,
}

impl RoleAuthorizationChecker {
    /// Unauthenticated caller with no roles.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(user: Value, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            user: Some(user),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

impl AuthorizationChecker for RoleAuthorizationChecker {
    fn is_granted(&self, attribute: &str, _subject: Option<&Value>) -> bool {
        match attribute {
            "IS_AUTHENTICATED" | "IS_AUTHENTICATED_FULLY" | "IS_AUTHENTICATED_REMEMBERED" => {
                self.is_authenticated()
            }
            "PUBLIC_ACCESS" | "IS_AUTHENTICATED_ANONYMOUSLY" => true,
            _ => self.roles.iter().any(|r| r == attribute),
        }
    }

    fn user(&self) -> Option<Value> {
        self.user.clone()
    }

    fn roles(&self) -> Vec<String> {
        self.roles.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anonymous_has_nothing() {
        let checker = RoleAuthorizationChecker::anonymous();
        assert!(!checker.is_authenticated());
        assert!(!checker.is_granted("ROLE_USER", None));
        assert!(checker.is_granted("PUBLIC_ACCESS", None));
    }

    #[test]
    fn roles_are_granted() {
        let checker = RoleAuthorizationChecker::new(json!({"id": 7}), ["ROLE_USER"])
            .with_role("ROLE_ADMIN");
        assert!(checker.is_authenticated());
        assert!(checker.is_granted("ROLE_ADMIN", None));
        assert!(checker.is_granted("IS_AUTHENTICATED_FULLY", None));
        assert!(!checker.is_granted("ROLE_SUPER_ADMIN", None));
        assert_eq!(checker.roles(), vec!["ROLE_USER", "ROLE_ADMIN"]);
    }
}
