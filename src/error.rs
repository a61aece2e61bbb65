use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised while dispatching a call or a message.
///
/// Handlers return `DispatchError` from their `Outcome`. A `Spec` error is a
/// deliberate, already-tagged domain error; everything else is classified as
/// [`ErrorKind::UnknownError`] by [`classify`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A tagged domain error
    #[error(transparent)]
    Spec(#[from] ErrorSpec),

    /// Any other failure raised by handler code
    #[error("unhandled error")]
    Unhandled(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Wraps a foreign error that carries no domain tag.
    pub fn unhandled(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        DispatchError::Unhandled(err.into())
    }

    /// Builds a `Panicked` error from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        DispatchError::Panicked(message)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Unhandled(Box::new(err))
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Unhandled(Box::new(err))
    }
}

/// The kind of a domain error.
///
/// The kind's name is the stable `type` field written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input
    BadRequest,
    /// No identity could be resolved
    Unauthorized,
    /// The identity lacks a required role or failed a predicate
    Forbidden,
    /// The requested resource does not exist
    NotFound,
    /// A required parameter is absent
    MissingParameter,
    /// A parameter does not name a known enum value
    UnsupportedEnumValue,
    /// The database layer failed
    DatabaseError,
    /// Anything without a more specific kind
    UnknownError,
}

impl ErrorKind {
    /// Returns the transport status associated with this kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::BadRequest
            | ErrorKind::MissingParameter
            | ErrorKind::UnsupportedEnumValue => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::DatabaseError | ErrorKind::UnknownError => 500,
        }
    }

    /// Returns the stable wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::MissingParameter => "MissingParameter",
            ErrorKind::UnsupportedEnumValue => "UnsupportedEnumValue",
            ErrorKind::DatabaseError => "DatabaseError",
            ErrorKind::UnknownError => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged domain error: kind, message, transport status and optional data.
///
/// # Examples
///
/// ```
/// use dispatch_core::{ErrorKind, ErrorSpec};
///
/// let err = ErrorSpec::not_found("order 42");
/// assert_eq!(err.kind, ErrorKind::NotFound);
/// assert_eq!(err.status, 404);
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorSpec {
    /// The kind of error
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
    /// Transport status (HTTP status code)
    pub status: u16,
    /// Optional structured detail for the error body
    pub data: Option<serde_json::Value>,
}

impl ErrorSpec {
    /// Creates an error of `kind` with the kind's default status.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: kind.status(),
            data: None,
        }
    }

    /// Attaches structured data rendered in the error body.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns `true` for server-side errors (status >= 500).
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Converts back into a raisable error.
    pub fn into_error(self) -> DispatchError {
        DispatchError::Spec(self)
    }

    /// `BadRequest` (400).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// `Unauthorized` (401).
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// `Forbidden` (403).
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// `NotFound` (404).
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// `MissingParameter` (400) naming the absent parameter.
    pub fn missing_parameter(name: &str) -> Self {
        Self::new(
            ErrorKind::MissingParameter,
            format!("Missing required parameter '{}'", name),
        )
        .with_data(serde_json::json!({ "parameter": name }))
    }

    /// `UnsupportedEnumValue` (400) listing the accepted values.
    pub fn unsupported_enum_value(name: &str, value: &str, accepted: &[&str]) -> Self {
        Self::new(
            ErrorKind::UnsupportedEnumValue,
            format!("Unsupported value '{}' for '{}'", value, name),
        )
        .with_data(serde_json::json!({
            "parameter": name,
            "value": value,
            "accepted": accepted,
        }))
    }

    /// `DatabaseError` (500).
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseError, message)
    }

    /// `UnknownError` (500).
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownError, message)
    }
}

/// Classifies any raised condition into an [`ErrorSpec`].
///
/// Already-tagged errors pass through unchanged; everything else becomes an
/// `UnknownError` with status 500.
pub fn classify(err: &DispatchError) -> ErrorSpec {
    match err {
        DispatchError::Spec(spec) => spec.clone(),
        DispatchError::Unhandled(source) => ErrorSpec::unknown(source.to_string()),
        DispatchError::Panicked(message) => {
            ErrorSpec::unknown(format!("handler panicked: {}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_statuses() {
        assert_eq!(ErrorKind::BadRequest.status(), 400);
        assert_eq!(ErrorKind::MissingParameter.status(), 400);
        assert_eq!(ErrorKind::UnsupportedEnumValue.status(), 400);
        assert_eq!(ErrorKind::Unauthorized.status(), 401);
        assert_eq!(ErrorKind::Forbidden.status(), 403);
        assert_eq!(ErrorKind::NotFound.status(), 404);
        assert_eq!(ErrorKind::DatabaseError.status(), 500);
        assert_eq!(ErrorKind::UnknownError.status(), 500);
    }

    #[test]
    fn kind_wire_name_matches_serde_name() {
        let json = serde_json::to_string(&ErrorKind::UnsupportedEnumValue).unwrap();
        assert_eq!(json, "\"UnsupportedEnumValue\"");
        assert_eq!(ErrorKind::NotFound.to_string(), "NotFound");
    }

    #[test]
    fn classify_passes_tagged_errors_through() {
        let spec = ErrorSpec::forbidden("nope").with_data(serde_json::json!({"role": "ADMIN"}));
        let classified = classify(&spec.clone().into_error());
        assert_eq!(classified, spec);
    }

    #[test]
    fn classify_wraps_foreign_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let classified = classify(&DispatchError::from(io));

        assert_eq!(classified.kind, ErrorKind::UnknownError);
        assert_eq!(classified.status, 500);
        assert_eq!(classified.message, "disk on fire");
    }

    #[test]
    fn classify_is_idempotent() {
        let first = classify(&DispatchError::unhandled("boom"));
        let second = classify(&first.clone().into_error());

        assert_eq!(first.kind, second.kind);
        assert_eq!(first.status, second.status);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let err = DispatchError::from_panic(Box::new("exploded"));
        assert_eq!(err.to_string(), "handler panicked: exploded");

        let err = DispatchError::from_panic(Box::new(String::from("owned")));
        assert!(matches!(err, DispatchError::Panicked(ref m) if m == "owned"));

        let err = DispatchError::from_panic(Box::new(42_u8));
        assert!(matches!(err, DispatchError::Panicked(_)));
    }

    #[test]
    fn missing_parameter_carries_name() {
        let err = ErrorSpec::missing_parameter("id");
        assert_eq!(err.status, 400);
        assert_eq!(err.data.unwrap()["parameter"], "id");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = ErrorSpec::not_found("missing");
        assert_eq!(err.to_string(), "NotFound: missing");
    }
}
