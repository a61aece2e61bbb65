use std::fmt;

use crate::trace::TraceId;

/// A context-bound logging interface.
///
/// `ContextLog` is obtained from `ExecutionContext::log()` and is
/// lifetime-bound to the context, so it cannot outlive the operation.
///
/// Every event carries `request_id`, `trace_id` and `principal` fields.
#[derive(Debug)]
pub struct ContextLog<'a> {
    request_id: &'a str,
    trace_id: TraceId,
    principal: &'a str,
}

impl<'a> ContextLog<'a> {
    /// Only `ExecutionContext` creates loggers.
    pub(crate) fn new(request_id: &'a str, trace_id: TraceId, principal: &'a str) -> Self {
        Self {
            request_id,
            trace_id,
            principal,
        }
    }

    /// Returns the request ID associated with this logger.
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    /// Logs an info-level message.
    ///
    /// Use with `format_args!` for efficient formatting:
    /// ```no_run
    /// # use dispatch_core::logging::ContextLog;
    /// # fn example(log: &ContextLog) {
    /// log.info(format_args!("order {} accepted", 42));
    /// # }
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(
            request_id = %self.request_id,
            trace_id = %self.trace_id,
            principal = %self.principal,
            "{}",
            args
        );
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(
            request_id = %self.request_id,
            trace_id = %self.trace_id,
            principal = %self.principal,
            "{}",
            args
        );
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(
            request_id = %self.request_id,
            trace_id = %self.trace_id,
            principal = %self.principal,
            "{}",
            args
        );
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(
            request_id = %self.request_id,
            trace_id = %self.trace_id,
            principal = %self.principal,
            "{}",
            args
        );
    }
}
