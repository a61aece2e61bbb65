//! The HTTP dispatch pipeline.

use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tracing::Instrument;

use crate::config::DispatchConfig;
use crate::context::ExecutionContext;
use crate::error::{classify, DispatchError, ErrorSpec};
use crate::identity::{HeaderIdentity, IdentityExtractor};
use crate::request::Principal;
use crate::span::{Span, Tracer, TracingHandle};
use crate::trace::{self, TRACEPARENT};

use super::{ErrorBody, HttpCall, Outcome, Reply, ResponseBody, ResponseSink, Route, SinkError};

/// A route handler: takes the context by value and produces an [`Outcome`].
///
/// Implemented for every `Fn(ExecutionContext) -> impl Future<Output = Outcome<T>>`.
#[async_trait]
pub trait RouteHandler<T>: Send + Sync {
    /// Handles one call.
    async fn handle(&self, ctx: ExecutionContext) -> Outcome<T>;
}

#[async_trait]
impl<T, F, Fut> RouteHandler<T> for F
where
    T: Send + 'static,
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<T>> + Send,
{
    async fn handle(&self, ctx: ExecutionContext) -> Outcome<T> {
        (self)(ctx).await
    }
}

/// Runs route handlers with identity, tracing, authorization and error
/// translation applied uniformly.
///
/// The dispatcher holds no per-call state; one instance serves every route
/// concurrently.
///
/// For each call it:
/// 1. starts the span `"{METHOD} {path}"`, parented from `traceparent`
/// 2. resolves the principal (header, route default, global default)
/// 3. tags the span with the identity
/// 4. applies the route's role requirements and predicates
/// 5. runs the handler, catching panics
/// 6. writes either the reply or an [`ErrorBody`], then ends the span
pub struct RequestDispatcher {
    identity: Arc<dyn IdentityExtractor>,
    tracer: Tracer,
    config: DispatchConfig,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("identity_header", &self.identity.header_name())
            .field("config", &self.config)
            .finish()
    }
}

impl RequestDispatcher {
    /// Creates a dispatcher reading identities from the configured header.
    pub fn new(config: DispatchConfig, tracer: Tracer) -> Self {
        Self {
            identity: Arc::new(HeaderIdentity::new(config.identity_header.clone())),
            tracer,
            config,
        }
    }

    /// Replaces the identity extractor.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityExtractor>) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the tracer.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Dispatches one call to `handler` and writes the result to `sink`.
    ///
    /// Returns the status written. Every failure inside the pipeline is
    /// rendered as an error response; only a failing sink surfaces here.
    pub async fn dispatch<T, H, S>(
        &self,
        route: &Route,
        handler: &H,
        call: HttpCall,
        sink: &mut S,
    ) -> Result<u16, SinkError>
    where
        T: Serialize + Send + 'static,
        H: RouteHandler<T> + ?Sized,
        S: ResponseSink + ?Sized,
    {
        let parent = call.header(TRACEPARENT).and_then(trace::decode);
        let span = self.tracer.start_span(route.span_name(), parent.as_ref());
        let _guard = span.guard();
        span.set_tag("http.method", route.method().as_str());
        span.set_tag("http.route", route.path());
        span.set_tag("service.name", self.config.service_name.as_str());
        let request_id = span.span_id().to_string();

        tracing::debug!(
            request_id = %request_id,
            trace_id = %span.trace_id(),
            parent = parent.is_some(),
            "dispatching {}",
            route.span_name()
        );

        let result = match self.run(route, handler, call, &span).await {
            Ok(reply) => into_body(reply),
            Err(err) => Err(err),
        };

        match result {
            Ok(body) => {
                let status = route.status();
                span.set_tag("http.status_code", status);
                finish(&span, sink.respond(status, body).await, status)
            }
            Err(err) => {
                let spec = classify(&err);
                log_failure(&request_id, &spec, &err);
                span.set_tag("http.status_code", spec.status);
                span.set_tag("error.kind", spec.kind.as_str());

                let body = serde_json::to_value(ErrorBody::new(&spec, request_id))
                    .map(ResponseBody::Json)
                    .unwrap_or(ResponseBody::Empty);
                let written = sink.respond(spec.status, body).await;
                if let Err(e) = &written {
                    span.end_error(e.to_string());
                } else {
                    span.end_error(spec.message.clone());
                }
                written.map(|_| spec.status)
            }
        }
    }

    async fn run<T, H>(
        &self,
        route: &Route,
        handler: &H,
        call: HttpCall,
        span: &Span,
    ) -> Outcome<T>
    where
        T: Send + 'static,
        H: RouteHandler<T> + ?Sized,
    {
        let principal = self.resolve_principal(route, &call).await?;
        span.set_tag("user.id", principal.id.as_str());
        span.set_tag("user.name", principal.username.as_str());

        let handle = TracingHandle::new(self.tracer.clone(), span.clone());
        let ctx = ExecutionContext::from_http(principal, call, handle)
            .with_attributes(route.attributes().clone());

        route.gate().check(&ctx)?;

        let request_span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id(),
            route = %route.span_name()
        );
        AssertUnwindSafe(handler.handle(ctx))
            .catch_unwind()
            .instrument(request_span)
            .await
            .unwrap_or_else(|payload| Err(DispatchError::from_panic(payload)))
    }

    async fn resolve_principal(&self, route: &Route, call: &HttpCall) -> Result<Principal, ErrorSpec> {
        if let Some(principal) = self.identity.extract(call).await? {
            return Ok(principal);
        }
        route
            .default_principal()
            .or(self.config.default_principal.as_ref())
            .cloned()
            .ok_or_else(|| ErrorSpec::unauthorized("No identity presented"))
    }
}

fn into_body<T: Serialize + Send + 'static>(reply: Reply<T>) -> Result<ResponseBody, DispatchError> {
    Ok(match reply {
        Reply::NoContent => ResponseBody::Empty,
        Reply::Value(value) => ResponseBody::Json(serde_json::to_value(value)?),
        Reply::Stream(items) => ResponseBody::Stream(Box::new(items.flatten().filter_map(|item| {
            match serde_json::to_value(item) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unserializable stream element");
                    None
                }
            }
        }))),
    })
}

fn finish(span: &Span, written: Result<(), SinkError>, status: u16) -> Result<u16, SinkError> {
    match written {
        Ok(()) => {
            span.end_ok();
            Ok(status)
        }
        Err(e) => {
            span.end_error(e.to_string());
            Err(e)
        }
    }
}

fn log_failure(request_id: &str, spec: &ErrorSpec, err: &DispatchError) {
    if spec.is_server_error() {
        tracing::error!(
            request_id = %request_id,
            error.kind = %spec.kind,
            status = spec.status,
            cause = %cause_chain(err),
            "request failed"
        );
    } else {
        tracing::debug!(
            request_id = %request_id,
            error.kind = %spec.kind,
            status = spec.status,
            "request rejected: {}",
            spec.message
        );
    }
}

/// Renders an error and its sources as `outer: inner: root`.
pub(crate) fn cause_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
