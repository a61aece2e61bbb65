use crate::context::{Attributes, ExecutionContext};
use crate::gate::AccessGate;
use crate::policy::{AllRoles, AnyRole, HasRole};
use crate::request::Principal;

use super::HttpMethod;

/// A declared endpoint: method, path template and per-route policy.
///
/// # Examples
///
/// ```
/// use dispatch_core::web::{HttpMethod, Route};
///
/// let route = Route::new(HttpMethod::Post, "/orders").require_role("USER");
/// assert_eq!(route.status(), 201);
/// assert_eq!(route.span_name(), "POST /orders");
///
/// let accepted = Route::new(HttpMethod::Post, "/jobs").with_status(202);
/// assert_eq!(accepted.status(), 202);
/// ```
#[derive(Debug, Clone)]
pub struct Route {
    method: HttpMethod,
    path: String,
    status: Option<u16>,
    gate: AccessGate,
    default_principal: Option<Principal>,
    attributes: Attributes,
}

impl Route {
    /// Declares a route with no requirements.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            status: None,
            gate: AccessGate::new(),
            default_principal: None,
            attributes: Attributes::new(),
        }
    }

    /// Overrides the success status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Requires `role`.
    pub fn require_role(mut self, role: impl Into<String>) -> Self {
        self.gate = self.gate.require(HasRole::named(role));
        self
    }

    /// Requires at least one of `roles`.
    pub fn require_any_role<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gate = self.gate.require(AnyRole::of(roles));
        self
    }

    /// Requires all of `roles`.
    pub fn require_all_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gate = self.gate.require(AllRoles::of(roles));
        self
    }

    /// Adds a predicate evaluated against the built context.
    pub fn authorize_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.gate = self.gate.authorize_if(predicate);
        self
    }

    /// Principal used when the call carries no identity.
    pub fn with_default_principal(mut self, principal: Principal) -> Self {
        self.default_principal = Some(principal);
        self
    }

    /// Adds an attribute copied into every context of this route.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Returns the path template.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the success status: declared, or the method's default.
    pub fn status(&self) -> u16 {
        self.status.unwrap_or_else(|| self.method.default_status())
    }

    /// Returns the span name, `"{METHOD} {path}"`.
    pub fn span_name(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub(crate) fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub(crate) fn default_principal(&self) -> Option<&Principal> {
        self.default_principal.as_ref()
    }

    pub(crate) fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}
