//! W3C `traceparent` header codec.
//!
//! Wire format: `{version:2hex}-{trace_id:32hex}-{span_id:16hex}-{flags:2hex}`.
//! Decoding never fails loudly: anything unusable yields `None`, which the
//! dispatchers treat as "no parent".

use std::fmt;

use crate::span::Span;

/// Header carrying the trace context on calls and messages.
pub const TRACEPARENT: &str = "traceparent";

const VERSION_LEN: usize = 2;
const TRACE_ID_LEN: usize = 32;
const SPAN_ID_LEN: usize = 16;
const FLAGS_LEN: usize = 2;

const FLAG_SAMPLED: u8 = 0x01;

/// A 128-bit trace identifier, rendered as 32 lowercase hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub u128);

/// A 64-bit span identifier, rendered as 16 lowercase hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Decoded `traceparent` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParent {
    /// Format version
    pub version: u8,
    /// Trace the remote span belongs to
    pub trace_id: TraceId,
    /// The remote (parent) span
    pub span_id: SpanId,
    /// Bit 0 of the flags byte
    pub sampled: bool,
}

/// Decodes a `traceparent` header.
///
/// Returns `None` on wrong arity, non-hex input, over-long parts, or an
/// all-zero trace/span id. Shorter parts are treated as left-padded with `0`.
///
/// # Examples
///
/// ```
/// use dispatch_core::trace::decode;
///
/// let parent = decode("00-abc-def-01").unwrap();
/// assert_eq!(parent.trace_id.to_string(), format!("{:0>32}", "abc"));
/// assert_eq!(parent.span_id.to_string(), format!("{:0>16}", "def"));
/// assert!(parent.sampled);
///
/// assert!(decode("a-b-c").is_none());
/// ```
pub fn decode(header: &str) -> Option<TraceParent> {
    let parts: Vec<&str> = header.trim().split('-').collect();
    let [version, trace_id, span_id, flags] = parts.as_slice() else {
        return None;
    };

    let version = parse_hex(version, VERSION_LEN)? as u8;
    let trace_id = parse_hex(trace_id, TRACE_ID_LEN)?;
    let span_id = parse_hex(span_id, SPAN_ID_LEN)? as u64;
    let flags = parse_hex(flags, FLAGS_LEN)? as u8;

    if trace_id == 0 || span_id == 0 {
        return None;
    }

    Some(TraceParent {
        version,
        trace_id: TraceId(trace_id),
        span_id: SpanId(span_id),
        sampled: flags & FLAG_SAMPLED != 0,
    })
}

/// Encodes `span` as a `traceparent` header value.
///
/// The flags byte follows the span's sampling decision.
pub fn encode(span: &Span) -> String {
    let flags = if span.sampled() { FLAG_SAMPLED } else { 0 };
    format!(
        "00-{}-{}-{:02x}",
        span.trace_id(),
        span.span_id(),
        flags
    )
}

// An empty part reads as all zeros after padding.
fn parse_hex(part: &str, max_len: usize) -> Option<u128> {
    if part.len() > max_len || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if part.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(part, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{NoopExporter, Tracer};
    use std::sync::Arc;

    #[test]
    fn decode_full_header() {
        let parent = decode("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01").unwrap();

        assert_eq!(parent.version, 0);
        assert_eq!(parent.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(parent.span_id.to_string(), "00f067aa0ba902b7");
        assert!(parent.sampled);
    }

    #[test]
    fn decode_rejects_wrong_arity() {
        assert!(decode("").is_none());
        assert!(decode("a-b-c").is_none());
        assert!(decode("00-abc-def-00-extra").is_none());
    }

    #[test]
    fn decode_rejects_all_zero_ids() {
        let header = format!("00-{}-{}-00", "0".repeat(32), "0".repeat(16));
        assert!(decode(&header).is_none());

        let zero_span = format!("00-abc-{}-00", "0".repeat(16));
        assert!(decode(&zero_span).is_none());
    }

    #[test]
    fn decode_pads_short_ids() {
        let parent = decode("00-abc-def-00").unwrap();

        assert_eq!(parent.trace_id.to_string(), format!("{}abc", "0".repeat(29)));
        assert_eq!(parent.span_id.to_string(), format!("{}def", "0".repeat(13)));
        assert!(!parent.sampled);
    }

    #[test]
    fn decode_rejects_overlong_parts() {
        let long_trace = format!("00-{}-def-00", "a".repeat(33));
        assert!(decode(&long_trace).is_none());

        let long_span = format!("00-abc-{}-00", "a".repeat(17));
        assert!(decode(&long_span).is_none());

        assert!(decode("000-abc-def-00").is_none());
        assert!(decode("00-abc-def-001").is_none());
    }

    #[test]
    fn decode_rejects_non_hex() {
        assert!(decode("00-xyz-def-00").is_none());
        assert!(decode("00-+abc-def-00").is_none());
        assert!(decode("00-abc-def-zz").is_none());
    }

    #[test]
    fn sampled_reads_bit_zero_only() {
        assert!(decode("00-abc-def-03").unwrap().sampled);
        assert!(!decode("00-abc-def-02").unwrap().sampled);
    }

    #[test]
    fn encode_then_decode_recovers_ids() {
        let tracer = Tracer::new(Arc::new(NoopExporter));
        let span = tracer.start_span("op", None);

        let parent = decode(&encode(&span)).unwrap();
        assert_eq!(parent.trace_id, span.trace_id());
        assert_eq!(parent.span_id, span.span_id());
        assert_eq!(parent.sampled, span.sampled());
    }

    #[test]
    fn encode_reflects_unsampled_parent() {
        let tracer = Tracer::new(Arc::new(NoopExporter));
        let remote = decode("00-abc-def-00").unwrap();
        let span = tracer.start_span("op", Some(&remote));

        assert!(encode(&span).ends_with("-00"));
        assert!(encode(&span).starts_with(&format!("00-{}-", remote.trace_id)));
    }
}
