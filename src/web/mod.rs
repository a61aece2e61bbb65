//! HTTP dispatch surface.
//!
//! This module is the boundary between an HTTP server and the handler code.
//! It contains no server-specific code: integrations build an [`HttpCall`]
//! from their request type, implement [`ResponseSink`] over their response
//! type, and hand both to [`RequestDispatcher::dispatch`] together with the
//! matched [`Route`] and its handler.
//!
//! # Example Flow
//!
//! ```
//! use std::sync::Arc;
//! use dispatch_core::config::DispatchConfig;
//! use dispatch_core::context::ExecutionContext;
//! use dispatch_core::span::{InMemoryExporter, Tracer};
//! use dispatch_core::web::{
//!     BufferedResponse, HttpCall, HttpMethod, Outcome, Reply, RequestDispatcher, Route,
//! };
//! use dispatch_core::Principal;
//!
//! async fn greet(ctx: ExecutionContext) -> Outcome<String> {
//!     Ok(Reply::Value(format!("hello {}", ctx.principal().username)))
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = DispatchConfig::default()
//!     .with_default_principal(Principal::new("anon", "guest"));
//! let dispatcher = RequestDispatcher::new(config, Tracer::new(Arc::new(InMemoryExporter::new())));
//!
//! let route = Route::new(HttpMethod::Get, "/greeting");
//! let mut sink = BufferedResponse::new();
//! let status = dispatcher
//!     .dispatch(&route, &greet, HttpCall::new(HttpMethod::Get, "/greeting"), &mut sink)
//!     .await
//!     .unwrap();
//!
//! assert_eq!(status, 200);
//! assert_eq!(sink.json().unwrap(), "hello guest");
//! # });
//! ```

mod call;
mod dispatcher;
mod response;
mod route;

pub use call::{HttpCall, HttpMethod};
pub(crate) use dispatcher::cause_chain;
pub use dispatcher::{RequestDispatcher, RouteHandler};
pub use response::{
    BufferedResponse, ErrorBody, Outcome, Reply, ResponseBody, ResponseSink, SinkError,
};
pub use route::Route;
