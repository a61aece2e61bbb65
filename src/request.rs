use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An authenticated user or service principal.
///
/// Role checks are case-sensitive set membership.
///
/// # Examples
///
/// ```
/// use dispatch_core::Principal;
///
/// let admin = Principal::new("u-1", "alice").with_roles(["ADMIN", "USER"]);
/// assert!(admin.has_role("ADMIN"));
/// assert!(!admin.has_role("admin"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for this principal
    pub id: String,
    /// Login or display name
    pub username: String,
    /// Granted roles
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Principal {
    /// Creates a principal without roles.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Adds roles to the principal.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if the principal holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns `true` if the principal holds at least one of `roles`.
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.has_role(r.as_ref()))
    }

    /// Returns `true` if the principal holds every one of `roles`.
    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().all(|r| self.has_role(r.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_checks_are_case_sensitive() {
        let p = Principal::new("u1", "alice").with_roles(["ADMIN"]);
        assert!(p.has_role("ADMIN"));
        assert!(!p.has_role("Admin"));
    }

    #[test]
    fn any_and_all_roles() {
        let p = Principal::new("u1", "alice").with_roles(["READ", "WRITE"]);

        assert!(p.has_any_role(&["ADMIN", "READ"]));
        assert!(!p.has_any_role(&["ADMIN"]));
        assert!(p.has_all_roles(&["READ", "WRITE"]));
        assert!(!p.has_all_roles(&["READ", "ADMIN"]));
    }

    #[test]
    fn empty_role_sets() {
        let p = Principal::new("u1", "alice");
        let none: [&str; 0] = [];

        assert!(!p.has_any_role(&none));
        assert!(p.has_all_roles(&none));
    }

    #[test]
    fn roles_default_when_absent_in_json() {
        let p: Principal = serde_json::from_str(r#"{"id":"u2","username":"bob"}"#).unwrap();
        assert_eq!(p.username, "bob");
        assert!(p.roles.is_empty());
    }
}
