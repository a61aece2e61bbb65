//! Queue dispatch surface.
//!
//! A [`Consumer`] binds one queue to an [`EventHandler`]. Each delivery
//! continues the sender's trace, resolves the principal from the message's
//! identity header, runs the handler with an [`ExecutionContext`] and then
//! acks or nacks. [`QueueClient`] is the storage seam; [`InMemoryQueue`]
//! implements it for development and tests.
//!
//! [`ExecutionContext`]: crate::context::ExecutionContext

mod client;
mod consumer;
mod hooks;
mod message;
mod retry;

pub use client::{InMemoryQueue, QueueClient, QueueError};
pub use consumer::{
    Consumer, ConsumerBuilder, ConsumerError, ConsumerStatus, DeliveryOutcome, EventHandler,
    SendError,
};
pub use hooks::{FailureHooks, HookError, LoggingHooks};
pub use message::{Message, MessageId};
pub use retry::RetryDelayPolicy;
