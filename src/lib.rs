//! Execution context and dispatch pipeline for HTTP calls and queue deliveries.
//!
//! Both transports run the same steps: continue the caller's trace, resolve
//! the principal, build an [`ExecutionContext`], run the handler and turn
//! its result into a transport outcome (a response or an ack/nack).
//!
//! # Core Types
//!
//! - [`ExecutionContext`]: per-operation context moved into every handler
//! - [`Principal`]: the authenticated user or service
//! - [`ErrorSpec`]: tagged domain error with a transport status
//! - [`web::RequestDispatcher`]: HTTP entry point
//! - [`queue::Consumer`]: queue entry point
//! - [`span::Tracer`]: span lifecycle and export
//!
//! # Examples
//!
//! ```
//! use dispatch_core::{ErrorSpec, Principal};
//! use dispatch_core::context::ExecutionContext;
//! use dispatch_core::web::{Outcome, Reply};
//!
//! async fn show_order(ctx: ExecutionContext) -> Outcome<serde_json::Value> {
//!     let call = ctx.http().ok_or_else(|| ErrorSpec::bad_request("not an HTTP call"))?;
//!     let id = call.require_path("id")?;
//!     ctx.log().info(format_args!("loading order {}", id));
//!     Ok(Reply::Value(serde_json::json!({ "id": id, "owner": ctx.principal().id })))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::print_stdout, clippy::print_stderr, clippy::dbg_macro)]

pub mod config;
pub mod context;
mod error;
pub mod gate;
pub mod identity;
pub mod logging;
pub mod policy;
pub mod queue;
mod request;
pub mod span;
pub mod telemetry;
pub mod trace;
pub mod web;

pub use context::ExecutionContext;
pub use error::{classify, DispatchError, ErrorKind, ErrorSpec};
pub use request::Principal;
