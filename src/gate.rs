use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::ErrorSpec;
use crate::policy::Requirement;
use crate::request::Principal;

type Predicate = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// The authorization gate of a route.
///
/// Role requirements are checked first, in declaration order, and the first
/// failure wins. Predicates run afterwards against the fully built context.
/// Every failure is `Forbidden`.
///
/// # Examples
///
/// ```
/// use dispatch_core::gate::AccessGate;
/// use dispatch_core::policy::{AnyRole, HasRole};
/// use dispatch_core::Principal;
///
/// let gate = AccessGate::new()
///     .require(HasRole::named("USER"))
///     .require(AnyRole::of(["ADMIN", "AUDITOR"]));
///
/// let auditor = Principal::new("u-1", "alice").with_roles(["USER", "AUDITOR"]);
/// assert!(gate.check_roles(&auditor).is_ok());
///
/// let user = Principal::new("u-2", "bob").with_roles(["USER"]);
/// assert_eq!(gate.check_roles(&user).unwrap_err().status, 403);
/// ```
#[derive(Clone, Default)]
pub struct AccessGate {
    requirements: Vec<Requirement>,
    predicates: Vec<Predicate>,
}

impl fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGate")
            .field("requirements", &self.requirements)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl AccessGate {
    /// Creates a gate that admits every principal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a requirement, deduplicating identical requirements.
    pub fn require(mut self, requirement: impl Into<Requirement>) -> Self {
        let req = requirement.into();

        if !self.requirements.contains(&req) {
            self.requirements.push(req);
        }

        self
    }

    /// Adds a predicate evaluated over the built context.
    pub fn authorize_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Returns the declared role requirements.
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Checks the role requirements against `principal`.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` for the first requirement that fails.
    pub fn check_roles(&self, principal: &Principal) -> Result<(), ErrorSpec> {
        for req in &self.requirements {
            Self::check_one(principal, req)?;
        }
        Ok(())
    }

    /// Checks role requirements, then predicates.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` for the first failing requirement or predicate.
    pub fn check(&self, ctx: &ExecutionContext) -> Result<(), ErrorSpec> {
        self.check_roles(ctx.principal())?;

        if self.predicates.iter().any(|allowed| !allowed(ctx)) {
            return Err(ErrorSpec::forbidden(format!(
                "Principal '{}' is not allowed to perform this operation",
                ctx.principal().username
            )));
        }
        Ok(())
    }

    fn check_one(principal: &Principal, req: &Requirement) -> Result<(), ErrorSpec> {
        let satisfied = match req {
            Requirement::Role(role) => principal.has_role(role),
            Requirement::AnyRole(roles) => principal.has_any_role(roles.as_slice()),
            Requirement::AllRoles(roles) => principal.has_all_roles(roles.as_slice()),
        };
        if satisfied {
            return Ok(());
        }

        let (message, roles) = match req {
            Requirement::Role(role) => (format!("Missing role '{}'", role), vec![role.clone()]),
            Requirement::AnyRole(roles) => (
                format!("Requires one of roles {:?}", roles),
                roles.clone(),
            ),
            Requirement::AllRoles(roles) => {
                (format!("Requires all of roles {:?}", roles), roles.clone())
            }
        };
        Err(ErrorSpec::forbidden(message).with_data(serde_json::json!({ "roles": roles })))
    }
}
