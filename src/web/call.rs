//! Framework-neutral view of an inbound HTTP call.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;

use crate::error::ErrorSpec;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Returns the upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Status written on success when the route declares none.
    pub fn default_status(self) -> u16 {
        match self {
            HttpMethod::Post => 201,
            _ => 200,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ErrorSpec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(ErrorSpec::unsupported_enum_value(
                "method",
                s,
                &["GET", "POST", "PUT", "PATCH", "DELETE"],
            )),
        }
    }
}

/// An inbound HTTP call as seen by the dispatcher.
///
/// Server integrations build one of these from their own request type.
/// Header names are stored lower-cased, so lookups are case-insensitive.
///
/// # Examples
///
/// ```
/// use dispatch_core::web::{HttpCall, HttpMethod};
///
/// let call = HttpCall::new(HttpMethod::Get, "/orders/42")
///     .with_header("X-Request-Source", "mobile")
///     .with_path_param("id", "42")
///     .with_query("expand", "lines");
///
/// assert_eq!(call.header("x-request-source"), Some("mobile"));
/// assert_eq!(call.require_path("id").unwrap(), "42");
/// assert!(call.require_query("page").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct HttpCall {
    method: HttpMethod,
    path: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    path_params: HashMap<String, String>,
    body: String,
}

impl HttpCall {
    /// Creates a call with no headers, parameters or body.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            path_params: HashMap::new(),
            body: String::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Adds a path parameter captured by the router.
    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Sets the raw request body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the request method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Returns the request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns all headers, keyed by lower-cased name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Returns a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Returns a path parameter.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Returns the raw body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns a query parameter or `MissingParameter`.
    pub fn require_query(&self, name: &str) -> Result<&str, ErrorSpec> {
        self.query(name)
            .ok_or_else(|| ErrorSpec::missing_parameter(name))
    }

    /// Returns a path parameter or `MissingParameter`.
    pub fn require_path(&self, name: &str) -> Result<&str, ErrorSpec> {
        self.path_param(name)
            .ok_or_else(|| ErrorSpec::missing_parameter(name))
    }

    /// Matches a required query parameter against `accepted` names.
    ///
    /// Fails with `MissingParameter` when absent and `UnsupportedEnumValue`
    /// when the value is not one of the accepted names.
    pub fn parse_enum<T: Copy>(&self, name: &str, accepted: &[(&str, T)]) -> Result<T, ErrorSpec> {
        let value = self.require_query(name)?;
        accepted
            .iter()
            .find(|(label, _)| *label == value)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                let labels: Vec<&str> = accepted.iter().map(|(label, _)| *label).collect();
                ErrorSpec::unsupported_enum_value(name, value, &labels)
            })
    }

    /// Deserializes the body as JSON, mapping failures to `BadRequest`.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, ErrorSpec> {
        serde_json::from_str(&self.body)
            .map_err(|e| ErrorSpec::bad_request(format!("invalid request body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Sort {
        Asc,
        Desc,
    }

    #[test]
    fn headers_are_case_insensitive() {
        let call = HttpCall::new(HttpMethod::Get, "/").with_header("TraceParent", "x");
        assert_eq!(call.header("traceparent"), Some("x"));
        assert_eq!(call.header("TRACEPARENT"), Some("x"));
    }

    #[test]
    fn missing_parameters_are_tagged() {
        let call = HttpCall::new(HttpMethod::Get, "/");

        let err = call.require_query("page").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingParameter);
        let err = call.require_path("id").unwrap_err();
        assert_eq!(err.data.unwrap()["parameter"], "id");
    }

    #[test]
    fn parse_enum_accepts_known_values() {
        let accepted = [("asc", Sort::Asc), ("desc", Sort::Desc)];
        let call = HttpCall::new(HttpMethod::Get, "/").with_query("sort", "desc");
        assert_eq!(call.parse_enum("sort", &accepted).unwrap(), Sort::Desc);
    }

    #[test]
    fn parse_enum_rejects_unknown_values() {
        let accepted = [("asc", Sort::Asc), ("desc", Sort::Desc)];
        let call = HttpCall::new(HttpMethod::Get, "/").with_query("sort", "sideways");

        let err = call.parse_enum("sort", &accepted).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedEnumValue);
        assert_eq!(err.status, 400);
        assert_eq!(err.data.unwrap()["accepted"], serde_json::json!(["asc", "desc"]));
    }

    #[test]
    fn malformed_json_body_is_bad_request() {
        let call = HttpCall::new(HttpMethod::Post, "/").with_body("{not json");
        let err = call.json_body::<serde_json::Value>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn method_parsing_and_defaults() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("BREW".parse::<HttpMethod>().is_err());
        assert_eq!(HttpMethod::Post.default_status(), 201);
        assert_eq!(HttpMethod::Delete.default_status(), 200);
    }
}
