//! Handler results and the transport write surface.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, ErrorSpec};

/// Successful result of a route handler.
pub enum Reply<T> {
    /// Status-only response
    NoContent,
    /// A single JSON-serialized value
    Value(T),
    /// A streamed sequence; `None` elements are skipped
    Stream(Box<dyn Iterator<Item = Option<T>> + Send>),
}

impl<T> Reply<T> {
    /// Wraps an iterator as a streamed reply.
    pub fn stream<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Option<T>>,
        I::IntoIter: Send + 'static,
    {
        Reply::Stream(Box::new(items.into_iter()))
    }
}

impl<T> From<T> for Reply<T> {
    fn from(value: T) -> Self {
        Reply::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::NoContent => f.write_str("NoContent"),
            Reply::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What a route handler returns.
pub type Outcome<T> = Result<Reply<T>, DispatchError>;

/// Body handed to a [`ResponseSink`].
pub enum ResponseBody {
    /// No body
    Empty,
    /// A single JSON document
    Json(serde_json::Value),
    /// A sequence of JSON documents written as they are produced
    Stream(Box<dyn Iterator<Item = serde_json::Value> + Send>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Errors raised while writing a response.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A response was already written for this call
    #[error("response already written")]
    AlreadyResponded,
    /// The peer went away
    #[error("connection closed: {0}")]
    Closed(String),
}

/// The write half of an HTTP exchange.
///
/// Server integrations implement this over their own response type. The
/// dispatcher calls `respond` at most once per call.
#[async_trait]
pub trait ResponseSink: Send {
    /// Writes the status and body.
    async fn respond(&mut self, status: u16, body: ResponseBody) -> Result<(), SinkError>;
}

/// Wire shape of an error response.
///
/// ```json
/// {"type":"Forbidden","status":403,"requestId":"00f067aa0ba902b7","detail":"..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error kind name
    #[serde(rename = "type")]
    pub kind: String,
    /// HTTP status
    pub status: u16,
    /// Request id of the failed call
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Human-readable detail
    pub detail: String,
    /// Optional structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Renders `spec` for the call identified by `request_id`.
    pub fn new(spec: &ErrorSpec, request_id: impl Into<String>) -> Self {
        Self {
            kind: spec.kind.as_str().to_string(),
            status: spec.status,
            request_id: request_id.into(),
            detail: spec.message.clone(),
            data: spec.data.clone(),
        }
    }
}

/// A sink that records what was written. Useful in tests.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<u16>,
    json: Option<serde_json::Value>,
    stream: Option<Vec<serde_json::Value>>,
    writes: usize,
}

impl BufferedResponse {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the written status.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns the written JSON body, if any.
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    /// Returns the collected stream elements, if the body was streamed.
    pub fn stream(&self) -> Option<&[serde_json::Value]> {
        self.stream.as_deref()
    }

    /// Parses the body as an [`ErrorBody`].
    pub fn error_body(&self) -> Option<ErrorBody> {
        serde_json::from_value(self.json.clone()?).ok()
    }

    /// Returns `true` if neither a JSON body nor a stream was written.
    pub fn is_empty(&self) -> bool {
        self.json.is_none() && self.stream.is_none()
    }

    /// Returns how many times `respond` was called.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[async_trait]
impl ResponseSink for BufferedResponse {
    async fn respond(&mut self, status: u16, body: ResponseBody) -> Result<(), SinkError> {
        self.writes += 1;
        if self.status.is_some() {
            return Err(SinkError::AlreadyResponded);
        }
        self.status = Some(status);
        match body {
            ResponseBody::Empty => {}
            ResponseBody::Json(value) => self.json = Some(value),
            ResponseBody::Stream(items) => self.stream = Some(items.collect()),
        }
        Ok(())
    }
}
