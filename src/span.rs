//! Spans, the tracer that starts them, and exporters that receive them.
//!
//! A [`Span`] is ended exactly once. The first `end_*` call wins and hands a
//! [`FinishedSpan`] to the tracer's [`SpanExporter`]; later calls are ignored.
//! A [`SpanGuard`] ends a still-open span as cancelled when dropped, which
//! covers futures that are dropped mid-flight.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::trace::{SpanId, TraceId, TraceParent};

/// A span tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Text value
    Str(String),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// Boolean value
    Bool(bool),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => f.write_str(s),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(x) => write!(f, "{}", x),
            TagValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Str(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Str(s)
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Int(i)
    }
}

impl From<u16> for TagValue {
    fn from(i: u16) -> Self {
        TagValue::Int(i64::from(i))
    }
}

impl From<u32> for TagValue {
    fn from(i: u32) -> Self {
        TagValue::Int(i64::from(i))
    }
}

impl From<f64> for TagValue {
    fn from(x: f64) -> Self {
        TagValue::Float(x)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

/// Message recorded on spans ended by cancellation.
pub const CANCELLED: &str = "cancelled";

/// Terminal state of a span.
///
/// A cancelled span ends as `Error("cancelled")` and carries the
/// `cancelled = true` tag; see [`FinishedSpan::is_cancelled`].
#[derive(Debug, Clone, PartialEq)]
pub enum SpanStatus {
    /// Operation completed
    Ok,
    /// Operation failed, or was dropped before completing
    Error(String),
}

/// A span after it has ended, as seen by exporters.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    /// Operation name
    pub name: String,
    /// Trace the span belongs to
    pub trace_id: TraceId,
    /// This span's id
    pub span_id: SpanId,
    /// Parent span, if any
    pub parent_span_id: Option<SpanId>,
    /// Sampling decision
    pub sampled: bool,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub ended_at: DateTime<Utc>,
    /// Tags at end time
    pub tags: BTreeMap<String, TagValue>,
    /// Terminal state
    pub status: SpanStatus,
}

impl FinishedSpan {
    /// Returns the tag `key`, if set.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Returns `true` if the span ended because its operation was dropped.
    pub fn is_cancelled(&self) -> bool {
        self.tag(CANCELLED) == Some(&TagValue::Bool(true))
    }
}

/// Receives spans once they end.
pub trait SpanExporter: Send + Sync {
    /// Called exactly once per span.
    fn export(&self, span: FinishedSpan);
}

/// Discards every span.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

impl SpanExporter for NoopExporter {
    fn export(&self, _span: FinishedSpan) {}
}

/// Emits each finished span as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl SpanExporter for LogExporter {
    fn export(&self, span: FinishedSpan) {
        let elapsed_ms = (span.ended_at - span.started_at).num_milliseconds();
        match &span.status {
            SpanStatus::Ok => tracing::debug!(
                span.name = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                elapsed_ms,
                "span ended"
            ),
            SpanStatus::Error(message) => tracing::debug!(
                span.name = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                elapsed_ms,
                error = %message,
                "span ended with error"
            ),
        }
    }
}

/// In-memory recorder for finished spans.
///
/// Intended for tests and local development.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use dispatch_core::span::{InMemoryExporter, Tracer};
///
/// let exporter = Arc::new(InMemoryExporter::new());
/// let tracer = Tracer::new(exporter.clone());
///
/// let span = tracer.start_span("work", None);
/// span.end_ok();
///
/// assert_eq!(exporter.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl InMemoryExporter {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded spans, in end order.
    pub fn spans(&self) -> Vec<FinishedSpan> {
        lock(&self.spans).clone()
    }

    /// Returns the recorded spans with `span_id`.
    pub fn spans_with_id(&self, span_id: SpanId) -> Vec<FinishedSpan> {
        lock(&self.spans)
            .iter()
            .filter(|s| s.span_id == span_id)
            .cloned()
            .collect()
    }

    /// Returns the number of recorded spans.
    pub fn len(&self) -> usize {
        lock(&self.spans).len()
    }

    /// Returns true if no spans have been recorded.
    pub fn is_empty(&self) -> bool {
        lock(&self.spans).is_empty()
    }

    /// Clears all recorded spans.
    pub fn clear(&self) {
        lock(&self.spans).clear();
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&self, span: FinishedSpan) {
        lock(&self.spans).push(span);
    }
}

// A poisoned lock only means another thread panicked while holding it; the
// data is still usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Starts spans and forwards finished ones to an exporter.
#[derive(Clone)]
pub struct Tracer {
    exporter: Arc<dyn SpanExporter>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(Arc::new(LogExporter))
    }
}

impl Tracer {
    /// Creates a tracer exporting to `exporter`.
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self { exporter }
    }

    /// Starts a span, continuing the remote trace when `parent` is given.
    ///
    /// Root spans are sampled; child spans inherit the parent's decision.
    pub fn start_span(&self, name: impl Into<String>, parent: Option<&TraceParent>) -> Span {
        let (trace_id, parent_span_id, sampled) = match parent {
            Some(p) => (p.trace_id, Some(p.span_id), p.sampled),
            None => (TraceId(nonzero_u128()), None, true),
        };
        self.open(name.into(), trace_id, parent_span_id, sampled)
    }

    /// Starts a local child of `parent`.
    pub fn start_child(&self, name: impl Into<String>, parent: &Span) -> Span {
        self.open(
            name.into(),
            parent.trace_id(),
            Some(parent.span_id()),
            parent.sampled(),
        )
    }

    fn open(
        &self,
        name: String,
        trace_id: TraceId,
        parent_span_id: Option<SpanId>,
        sampled: bool,
    ) -> Span {
        Span {
            inner: Arc::new(SpanInner {
                name,
                trace_id,
                span_id: SpanId(nonzero_u64()),
                parent_span_id,
                sampled,
                started_at: Utc::now(),
                state: Mutex::new(SpanState::default()),
                exporter: self.exporter.clone(),
            }),
        }
    }
}

fn nonzero_u128() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

fn nonzero_u64() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

#[derive(Default)]
struct SpanState {
    tags: BTreeMap<String, TagValue>,
    ended: bool,
}

struct SpanInner {
    name: String,
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampled: bool,
    started_at: DateTime<Utc>,
    state: Mutex<SpanState>,
    exporter: Arc<dyn SpanExporter>,
}

/// A started unit of traced work.
///
/// Cloning shares the same underlying span.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.inner.name)
            .field("trace_id", &self.inner.trace_id)
            .field("span_id", &self.inner.span_id)
            .field("parent_span_id", &self.inner.parent_span_id)
            .finish()
    }
}

impl Span {
    /// Returns the operation name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the trace id.
    pub fn trace_id(&self) -> TraceId {
        self.inner.trace_id
    }

    /// Returns this span's id.
    pub fn span_id(&self) -> SpanId {
        self.inner.span_id
    }

    /// Returns the parent span id, if any.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.parent_span_id
    }

    /// Returns the sampling decision.
    pub fn sampled(&self) -> bool {
        self.inner.sampled
    }

    /// Returns the start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Sets a tag. Tags set after the span ended are ignored.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<TagValue>) {
        let mut state = lock(&self.inner.state);
        if !state.ended {
            state.tags.insert(key.into(), value.into());
        }
    }

    /// Returns the current value of tag `key`.
    pub fn tag(&self, key: &str) -> Option<TagValue> {
        lock(&self.inner.state).tags.get(key).cloned()
    }

    /// Returns `true` once the span has ended.
    pub fn is_ended(&self) -> bool {
        lock(&self.inner.state).ended
    }

    /// Ends the span successfully. Returns `false` if it had already ended.
    pub fn end_ok(&self) -> bool {
        self.finish(SpanStatus::Ok)
    }

    /// Ends the span with an error. Returns `false` if it had already ended.
    pub fn end_error(&self, message: impl Into<String>) -> bool {
        self.finish(SpanStatus::Error(message.into()))
    }

    /// Ends the span as cancelled. Returns `false` if it had already ended.
    pub fn end_cancelled(&self) -> bool {
        self.set_tag(CANCELLED, true);
        self.finish(SpanStatus::Error(CANCELLED.to_string()))
    }

    /// Returns a guard that cancels the span if it is still open on drop.
    pub fn guard(&self) -> SpanGuard {
        SpanGuard { span: self.clone() }
    }

    fn finish(&self, status: SpanStatus) -> bool {
        let tags = {
            let mut state = lock(&self.inner.state);
            if state.ended {
                return false;
            }
            state.ended = true;
            std::mem::take(&mut state.tags)
        };

        self.inner.exporter.export(FinishedSpan {
            name: self.inner.name.clone(),
            trace_id: self.inner.trace_id,
            span_id: self.inner.span_id,
            parent_span_id: self.inner.parent_span_id,
            sampled: self.inner.sampled,
            started_at: self.inner.started_at,
            ended_at: Utc::now(),
            tags,
            status,
        });
        true
    }
}

/// Ends the guarded span as cancelled when dropped while still open.
#[derive(Debug)]
pub struct SpanGuard {
    span: Span,
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.span.end_cancelled() {
            tracing::debug!(span_id = %self.span.span_id(), "span closed on cancellation path");
        }
    }
}

/// The active span of an operation plus the tracer for descendant spans.
#[derive(Clone, Debug)]
pub struct TracingHandle {
    tracer: Tracer,
    span: Span,
}

impl TracingHandle {
    /// Binds `span` to the tracer that started it.
    pub fn new(tracer: Tracer, span: Span) -> Self {
        Self { tracer, span }
    }

    /// Returns the active span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Starts a descendant span of the active span.
    pub fn child(&self, name: impl Into<String>) -> Span {
        self.tracer.start_child(name, &self.span)
    }

    /// Returns the active span encoded as a `traceparent` value.
    pub fn traceparent(&self) -> String {
        crate::trace::encode(&self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<InMemoryExporter>, Tracer) {
        let exporter = Arc::new(InMemoryExporter::new());
        let tracer = Tracer::new(exporter.clone());
        (exporter, tracer)
    }

    #[test]
    fn root_span_has_fresh_ids() {
        let (_, tracer) = recording();
        let a = tracer.start_span("a", None);
        let b = tracer.start_span("b", None);

        assert_ne!(a.trace_id(), b.trace_id());
        assert_ne!(a.span_id().0, 0);
        assert!(a.parent_span_id().is_none());
        assert!(a.sampled());
    }

    #[test]
    fn parented_span_continues_trace() {
        let (_, tracer) = recording();
        let parent = crate::trace::decode("00-abc-def-01").unwrap();
        let span = tracer.start_span("op", Some(&parent));

        assert_eq!(span.trace_id(), parent.trace_id);
        assert_eq!(span.parent_span_id(), Some(parent.span_id));
        assert_ne!(span.span_id(), parent.span_id);
    }

    #[test]
    fn span_ends_exactly_once() {
        let (exporter, tracer) = recording();
        let span = tracer.start_span("op", None);

        assert!(span.end_error("first"));
        assert!(!span.end_ok());
        assert!(!span.end_cancelled());

        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error("first".to_string()));
    }

    #[test]
    fn guard_cancels_open_span() {
        let (exporter, tracer) = recording();
        {
            let span = tracer.start_span("op", None);
            let _guard = span.guard();
        }

        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error("cancelled".to_string()));
        assert_eq!(spans[0].tag("cancelled"), Some(&TagValue::Bool(true)));
        assert!(spans[0].is_cancelled());
    }

    #[test]
    fn guard_leaves_ended_span_alone() {
        let (exporter, tracer) = recording();
        {
            let span = tracer.start_span("op", None);
            let _guard = span.guard();
            span.end_ok();
        }

        assert_eq!(exporter.len(), 1);
        assert_eq!(exporter.spans()[0].status, SpanStatus::Ok);
    }

    #[test]
    fn tags_are_frozen_at_end() {
        let (exporter, tracer) = recording();
        let span = tracer.start_span("op", None);
        span.set_tag("user.id", "u1");
        span.set_tag("http.status_code", 200_u16);
        span.end_ok();
        span.set_tag("late", true);

        let finished = &exporter.spans()[0];
        assert_eq!(finished.tag("user.id"), Some(&TagValue::Str("u1".into())));
        assert_eq!(finished.tag("http.status_code"), Some(&TagValue::Int(200)));
        assert!(finished.tag("late").is_none());
    }

    #[test]
    fn handle_creates_descendants() {
        let (_, tracer) = recording();
        let root = tracer.start_span("root", None);
        let handle = TracingHandle::new(tracer, root.clone());

        let child = handle.child("db.query");
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
    }

    #[test]
    fn tag_value_display() {
        assert_eq!(TagValue::from("x").to_string(), "x");
        assert_eq!(TagValue::from(7_i64).to_string(), "7");
        assert_eq!(TagValue::from(false).to_string(), "false");
    }
}
