//! Resolving a [`Principal`] from inbound calls and messages.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::ErrorSpec;
use crate::request::Principal;
use crate::web::HttpCall;

/// Header used by [`HeaderIdentity`] unless configured otherwise.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-identity";

/// Strategy for resolving the principal of an operation.
///
/// `extract` reads an HTTP call; `decode`/`encode` handle the header value
/// used by both transports, so queue messages carry the same wire format.
#[async_trait]
pub trait IdentityExtractor: Send + Sync {
    /// Name of the header carrying the encoded principal.
    fn header_name(&self) -> &str;

    /// Resolves the principal of `call`.
    ///
    /// Returns `Ok(None)` when the call carries no identity and
    /// `Unauthorized` when it carries one that cannot be decoded.
    async fn extract(&self, call: &HttpCall) -> Result<Option<Principal>, ErrorSpec> {
        match call.header(self.header_name()) {
            Some(value) => self.decode(value).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes a header value.
    fn decode(&self, value: &str) -> Result<Principal, ErrorSpec>;

    /// Encodes a principal for an outbound header.
    fn encode(&self, principal: &Principal) -> Result<String, ErrorSpec>;
}

/// Base64-encoded JSON principal in a single header.
///
/// # Examples
///
/// ```
/// use dispatch_core::identity::{HeaderIdentity, IdentityExtractor};
/// use dispatch_core::Principal;
///
/// let identity = HeaderIdentity::default();
/// let alice = Principal::new("u-1", "alice").with_roles(["USER"]);
///
/// let header = identity.encode(&alice).unwrap();
/// assert_eq!(identity.decode(&header).unwrap(), alice);
/// assert!(identity.decode("%%%").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: String,
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_HEADER)
    }
}

impl HeaderIdentity {
    /// Reads identities from `header`.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

#[async_trait]
impl IdentityExtractor for HeaderIdentity {
    fn header_name(&self) -> &str {
        &self.header
    }

    fn decode(&self, value: &str) -> Result<Principal, ErrorSpec> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|e| ErrorSpec::unauthorized(format!("malformed identity header: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ErrorSpec::unauthorized(format!("malformed identity header: {}", e)))
    }

    fn encode(&self, principal: &Principal) -> Result<String, ErrorSpec> {
        let json = serde_json::to_vec(principal)
            .map_err(|e| ErrorSpec::unknown(format!("cannot encode principal: {}", e)))?;
        Ok(STANDARD.encode(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::web::HttpMethod;

    #[tokio::test]
    async fn extract_reads_configured_header() {
        let identity = HeaderIdentity::new("X-User");
        let bob = Principal::new("u2", "bob");
        let call = HttpCall::new(HttpMethod::Get, "/")
            .with_header("x-user", identity.encode(&bob).unwrap());

        assert_eq!(identity.extract(&call).await.unwrap(), Some(bob));
    }

    #[tokio::test]
    async fn absent_header_is_none() {
        let call = HttpCall::new(HttpMethod::Get, "/");
        assert_eq!(HeaderIdentity::default().extract(&call).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_header_is_unauthorized() {
        let call = HttpCall::new(HttpMethod::Get, "/").with_header(DEFAULT_IDENTITY_HEADER, "!!");
        let err = HeaderIdentity::default().extract(&call).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn valid_base64_but_not_a_principal_is_unauthorized() {
        let header = STANDARD.encode(br#"{"name":"x"}"#);
        let err = HeaderIdentity::default().decode(&header).unwrap_err();
        assert_eq!(err.status, 401);
    }
}
