/// A role requirement a route declares.
///
/// Requirements are evaluated by `AccessGate::check` in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// The principal must hold this role
    Role(String),
    /// The principal must hold at least one of these roles
    AnyRole(Vec<String>),
    /// The principal must hold every one of these roles
    AllRoles(Vec<String>),
}

/// Requires a single role.
pub struct HasRole(String);

impl HasRole {
    /// Creates a requirement for `role`.
    pub fn named(role: impl Into<String>) -> Self {
        Self(role.into())
    }
}

/// Requires at least one role from a set.
pub struct AnyRole(Vec<String>);

impl AnyRole {
    /// Creates a requirement for any of `roles`.
    pub fn of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(roles.into_iter().map(Into::into).collect())
    }
}

/// Requires every role from a set.
pub struct AllRoles(Vec<String>);

impl AllRoles {
    /// Creates a requirement for all of `roles`.
    pub fn of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(roles.into_iter().map(Into::into).collect())
    }
}

// Conversions to Requirement
impl From<HasRole> for Requirement {
    fn from(r: HasRole) -> Self {
        Requirement::Role(r.0)
    }
}

impl From<AnyRole> for Requirement {
    fn from(r: AnyRole) -> Self {
        Requirement::AnyRole(r.0)
    }
}

impl From<AllRoles> for Requirement {
    fn from(r: AllRoles) -> Self {
        Requirement::AllRoles(r.0)
    }
}
