use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to a message by the queue client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generates a random id.
    pub fn random() -> Self {
        MessageId(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Client-assigned id
    pub id: MessageId,
    /// Message headers, including `traceparent` and the identity header
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Raw body
    pub body: String,
    /// Number of earlier delivery attempts
    #[serde(default)]
    pub redelivery_count: u32,
}

impl Message {
    /// Creates a first-delivery message.
    pub fn new(id: MessageId, body: impl Into<String>) -> Self {
        Self {
            id,
            headers: HashMap::new(),
            body: body.into(),
            redelivery_count: 0,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the redelivery count.
    pub fn with_redelivery_count(mut self, count: u32) -> Self {
        self.redelivery_count = count;
        self
    }

    /// Returns a header value. Exact matches win over case-insensitive ones.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Deserializes the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_falls_back_to_case_insensitive() {
        let message = Message::new(MessageId::random(), "").with_header("TraceParent", "x");
        assert_eq!(message.header("traceparent"), Some("x"));
        assert_eq!(message.header("missing"), None);
    }

    #[test]
    fn json_body() {
        let message = Message::new(MessageId("m".into()), r#"{"n":3}"#);
        let value: serde_json::Value = message.json().unwrap();
        assert_eq!(value["n"], 3);
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(MessageId::random(), MessageId::random());
    }
}
