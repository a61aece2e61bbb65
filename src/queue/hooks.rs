use async_trait::async_trait;

use crate::error::ErrorSpec;

use super::{Message, QueueError};

/// Error a failure hook may return. It is logged and otherwise ignored.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks invoked when a delivery cannot complete normally.
///
/// Every method has a logging default, so implementors override only what
/// they need. Errors and panics raised by hooks are caught by the consumer.
#[async_trait]
pub trait FailureHooks: Send + Sync {
    /// The message could not be turned into a context (e.g. no identity).
    async fn on_fail_to_read(&self, message: &Message, error: &ErrorSpec) -> Result<(), HookError> {
        tracing::warn!(message_id = %message.id, error.kind = %error.kind, "failed to read message: {}", error.message);
        Ok(())
    }

    /// The handler failed; the message will be nacked.
    async fn on_fail_to_process(
        &self,
        message: &Message,
        error: &ErrorSpec,
    ) -> Result<(), HookError> {
        tracing::warn!(
            message_id = %message.id,
            error.kind = %error.kind,
            redelivery_count = message.redelivery_count,
            "failed to process message: {}",
            error.message
        );
        Ok(())
    }

    /// The handler succeeded but the ack failed.
    async fn on_fail_to_ack(&self, message: &Message, error: &QueueError) -> Result<(), HookError> {
        tracing::error!(message_id = %message.id, error = %error, "failed to ack message");
        Ok(())
    }

    /// The nack failed; the message stays with the queue's own timeout policy.
    async fn on_fail_to_nack(&self, message: &Message, error: &QueueError) -> Result<(), HookError> {
        tracing::error!(message_id = %message.id, error = %error, "failed to nack message");
        Ok(())
    }
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl FailureHooks for LoggingHooks {}
