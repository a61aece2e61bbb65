use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::logging::ContextLog;
use crate::queue::Message;
use crate::request::Principal;
use crate::span::{Span, TracingHandle};
use crate::web::HttpCall;

/// Free-form, read-only values attached to a context.
pub type Attributes = HashMap<String, serde_json::Value>;

/// The message an event context was built for.
#[derive(Debug, Clone)]
pub struct EventPayload {
    queue: String,
    message: Message,
}

impl EventPayload {
    /// Binds `message` to the queue it was received from.
    pub fn new(queue: impl Into<String>, message: Message) -> Self {
        Self {
            queue: queue.into(),
            message,
        }
    }

    /// Returns the queue name.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Returns the message.
    pub fn message(&self) -> &Message {
        &self.message
    }
}

/// The transport-specific part of a context: exactly one of call or event.
#[derive(Debug)]
pub enum Payload {
    /// An inbound HTTP call
    Http(HttpCall),
    /// A queue delivery
    Event(EventPayload),
}

/// Per-operation context handed to handlers.
///
/// One `ExecutionContext` exists per HTTP call or queue delivery. It is
/// built by the dispatcher after identity resolution and moved into the
/// handler; it is intentionally not `Clone`, so it cannot leak into a second
/// operation. Its `request_id` is the id of the operation's span.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use dispatch_core::context::ExecutionContext;
/// use dispatch_core::span::{NoopExporter, Tracer, TracingHandle};
/// use dispatch_core::web::{HttpCall, HttpMethod};
/// use dispatch_core::Principal;
///
/// let tracer = Tracer::new(Arc::new(NoopExporter));
/// let span = tracer.start_span("GET /orders", None);
/// let ctx = ExecutionContext::from_http(
///     Principal::new("u-1", "alice"),
///     HttpCall::new(HttpMethod::Get, "/orders"),
///     TracingHandle::new(tracer, span.clone()),
/// )
/// .with_attribute("tenant", "acme");
///
/// assert_eq!(ctx.request_id(), span.span_id().to_string());
/// assert_eq!(ctx.attribute("tenant").unwrap(), "acme");
/// assert!(ctx.http().is_some());
/// assert!(ctx.event().is_none());
/// ```
pub struct ExecutionContext {
    request_id: String,
    request_timestamp: DateTime<Utc>,
    principal: Principal,
    attributes: Attributes,
    tracing: TracingHandle,
    payload: Payload,
    transaction: Option<Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("request_timestamp", &self.request_timestamp)
            .field("principal", &self.principal)
            .field("attributes", &self.attributes)
            .field("payload", &self.payload)
            .field("transaction", &self.transaction.is_some())
            .finish()
    }
}

impl ExecutionContext {
    /// Builds the context of an HTTP call.
    pub fn from_http(principal: Principal, call: HttpCall, tracing: TracingHandle) -> Self {
        Self::build(principal, Payload::Http(call), tracing)
    }

    /// Builds the context of a queue delivery.
    pub fn from_event(principal: Principal, event: EventPayload, tracing: TracingHandle) -> Self {
        Self::build(principal, Payload::Event(event), tracing)
    }

    fn build(principal: Principal, payload: Payload, tracing: TracingHandle) -> Self {
        Self {
            request_id: tracing.span().span_id().to_string(),
            request_timestamp: Utc::now(),
            principal,
            attributes: Attributes::new(),
            tracing,
            payload,
            transaction: None,
        }
    }

    /// Adds an attribute.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds several attributes; later keys overwrite earlier ones.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Attaches a transaction handle owned by this context.
    ///
    /// The handle is dropped together with the context.
    pub fn with_transaction<T: Any + Send + Sync>(mut self, transaction: T) -> Self {
        self.transaction = Some(Box::new(transaction));
        self
    }

    /// Returns the request id (the span id as 16 hex chars).
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the time the context was built.
    pub fn request_timestamp(&self) -> DateTime<Utc> {
        self.request_timestamp
    }

    /// Returns the resolved principal.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Returns all attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns one attribute.
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Returns the tracing handle.
    pub fn tracing(&self) -> &TracingHandle {
        &self.tracing
    }

    /// Returns the active span.
    pub fn span(&self) -> &Span {
        self.tracing.span()
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the HTTP call, if this is an HTTP context.
    pub fn http(&self) -> Option<&HttpCall> {
        match &self.payload {
            Payload::Http(call) => Some(call),
            Payload::Event(_) => None,
        }
    }

    /// Returns the queue delivery, if this is an event context.
    pub fn event(&self) -> Option<&EventPayload> {
        match &self.payload {
            Payload::Event(event) => Some(event),
            Payload::Http(_) => None,
        }
    }

    /// Returns the transaction handle if one of type `T` is attached.
    pub fn transaction<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.transaction.as_ref()?.downcast_ref::<T>()
    }

    /// Returns a logger that stamps this context's identifiers on every event.
    pub fn log(&self) -> ContextLog<'_> {
        ContextLog::new(
            &self.request_id,
            self.tracing.span().trace_id(),
            &self.principal.id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MessageId;
    use crate::span::{NoopExporter, Tracer};
    use crate::web::HttpMethod;
    use std::sync::Arc;

    fn handle() -> TracingHandle {
        let tracer = Tracer::new(Arc::new(NoopExporter));
        let span = tracer.start_span("test", None);
        TracingHandle::new(tracer, span)
    }

    fn alice() -> Principal {
        Principal::new("u1", "alice")
    }

    #[test]
    fn request_id_is_span_id() {
        let tracing = handle();
        let expected = tracing.span().span_id().to_string();
        let ctx = ExecutionContext::from_http(alice(), HttpCall::new(HttpMethod::Get, "/"), tracing);

        assert_eq!(ctx.request_id(), expected);
        assert_eq!(ctx.request_id().len(), 16);
    }

    #[test]
    fn event_context_exposes_message() {
        let message = Message::new(MessageId("m-1".into()), "{}");
        let ctx = ExecutionContext::from_event(alice(), EventPayload::new("orders", message), handle());

        let event = ctx.event().unwrap();
        assert_eq!(event.queue(), "orders");
        assert_eq!(event.message().id.as_str(), "m-1");
        assert!(ctx.http().is_none());
    }

    #[test]
    fn attributes_merge_in_order() {
        let mut extra = Attributes::new();
        extra.insert("a".into(), serde_json::json!(2));
        extra.insert("b".into(), serde_json::json!(true));

        let ctx = ExecutionContext::from_http(alice(), HttpCall::new(HttpMethod::Get, "/"), handle())
            .with_attribute("a", 1)
            .with_attributes(extra);

        assert_eq!(ctx.attribute("a"), Some(&serde_json::json!(2)));
        assert_eq!(ctx.attributes().len(), 2);
    }

    #[test]
    fn transaction_is_typed_and_owned() {
        struct Tx {
            id: u32,
        }

        let ctx = ExecutionContext::from_http(alice(), HttpCall::new(HttpMethod::Get, "/"), handle())
            .with_transaction(Tx { id: 7 });

        assert_eq!(ctx.transaction::<Tx>().map(|tx| tx.id), Some(7));
        assert!(ctx.transaction::<String>().is_none());
    }

    #[test]
    fn transaction_drops_with_context() {
        struct Tx(Arc<()>);

        let marker = Arc::new(());
        let ctx = ExecutionContext::from_http(alice(), HttpCall::new(HttpMethod::Get, "/"), handle())
            .with_transaction(Tx(marker.clone()));
        assert_eq!(Arc::strong_count(&marker), 2);

        drop(ctx);
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
