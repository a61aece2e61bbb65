//! Queue consumer: lifecycle, delivery pipeline and context-aware sending.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{ConfigError, ConsumerConfig, DispatchConfig};
use crate::context::{EventPayload, ExecutionContext};
use crate::error::{classify, DispatchError, ErrorSpec};
use crate::identity::{HeaderIdentity, IdentityExtractor};
use crate::request::Principal;
use crate::span::{Span, Tracer, TracingHandle};
use crate::trace::{self, TRACEPARENT};

use super::hooks::{FailureHooks, HookError, LoggingHooks};
use super::{Message, MessageId, QueueClient, QueueError};

/// Lifecycle state of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// Not polling
    Stopped,
    /// `start` is creating the queue and spawning the poller
    Starting,
    /// Polling and accepting sends
    Started,
    /// `stop` is draining in-flight messages
    Stopping,
}

/// How a single delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler succeeded and the message was acked
    Acked,
    /// The message was nacked for redelivery
    Nacked,
    /// Handler succeeded but the ack failed
    AckFailed,
    /// The nack failed
    NackFailed,
}

/// Errors raised by [`Consumer::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The consumer is not started
    #[error("consumer for queue '{0}' not started")]
    NotStarted(String),
    /// The principal could not be encoded
    #[error("cannot stamp identity: {0}")]
    Identity(#[from] ErrorSpec),
    /// The queue client failed
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors raised while building or starting a [`Consumer`].
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Invalid configuration
    #[error("invalid consumer configuration: {0}")]
    Config(#[from] ConfigError),
    /// The queue could not be created
    #[error("failed to create queue '{queue}': {source}")]
    Create {
        /// Queue name
        queue: String,
        /// Client error
        #[source]
        source: QueueError,
    },
}

/// A queue message handler.
///
/// Implemented for every `Fn(ExecutionContext, Message) -> impl Future<Output = Result<(), DispatchError>>`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one delivery.
    async fn handle(&self, ctx: ExecutionContext, message: Message) -> Result<(), DispatchError>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(ExecutionContext, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), DispatchError>> + Send,
{
    async fn handle(&self, ctx: ExecutionContext, message: Message) -> Result<(), DispatchError> {
        (self)(ctx, message).await
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    queue: String,
    client: Arc<dyn QueueClient>,
    handler: Arc<dyn EventHandler>,
    hooks: Arc<dyn FailureHooks>,
    identity: Arc<dyn IdentityExtractor>,
    tracer: Tracer,
    dispatch: DispatchConfig,
    config: ConsumerConfig,
    status: RwLock<ConsumerStatus>,
}

/// Consumes one queue, running every delivery through the same pipeline as
/// HTTP calls: trace continuation, identity, context, handler, ack/nack.
///
/// Cloning shares the consumer. Dropping the last handle without calling
/// [`stop`](Consumer::stop) closes the shutdown channel, so the poller
/// finishes its in-flight deliveries and exits.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use std::time::Duration;
/// use dispatch_core::context::ExecutionContext;
/// use dispatch_core::queue::{Consumer, InMemoryQueue, Message};
/// use dispatch_core::{DispatchError, Principal};
/// use dispatch_core::config::ConsumerConfig;
///
/// async fn handle(_ctx: ExecutionContext, _message: Message) -> Result<(), DispatchError> {
///     Ok(())
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let queue = InMemoryQueue::new();
/// let consumer = Consumer::builder("jobs", Arc::new(queue.clone()), handle)
///     .config(ConsumerConfig::default().with_default_principal(Principal::new("svc", "worker")))
///     .build()
///     .unwrap();
///
/// consumer.start().await.unwrap();
/// consumer.send(None, "{}", HashMap::new(), Duration::ZERO).await.unwrap();
/// consumer.stop().await;
/// # });
/// ```
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
    // Held only by handles, never by the poller: the last drop closes `shutdown`.
    // Also serializes start/stop so only one transition runs at a time.
    worker: Arc<Mutex<Option<Worker>>>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.inner.queue)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Consumer`].
pub struct ConsumerBuilder {
    queue: String,
    client: Arc<dyn QueueClient>,
    handler: Arc<dyn EventHandler>,
    hooks: Arc<dyn FailureHooks>,
    identity: Option<Arc<dyn IdentityExtractor>>,
    tracer: Tracer,
    dispatch: DispatchConfig,
    config: ConsumerConfig,
}

impl ConsumerBuilder {
    /// Sets the consumer configuration.
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the shared dispatch configuration.
    pub fn dispatch_config(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the tracer.
    pub fn tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Sets the failure hooks.
    pub fn hooks(mut self, hooks: Arc<dyn FailureHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets the identity codec used for reading and stamping headers.
    pub fn identity(mut self, identity: Arc<dyn IdentityExtractor>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Validates the configuration and builds the consumer.
    pub fn build(self) -> Result<Consumer, ConsumerError> {
        self.dispatch.validate()?;
        self.config.validate()?;

        let identity = self.identity.unwrap_or_else(|| {
            Arc::new(HeaderIdentity::new(self.dispatch.identity_header.clone()))
        });

        Ok(Consumer {
            inner: Arc::new(Inner {
                queue: self.queue,
                client: self.client,
                handler: self.handler,
                hooks: self.hooks,
                identity,
                tracer: self.tracer,
                dispatch: self.dispatch,
                config: self.config,
                status: RwLock::new(ConsumerStatus::Stopped),
            }),
            worker: Arc::new(Mutex::new(None)),
        })
    }
}

impl Consumer {
    /// Starts building a consumer of `queue`.
    pub fn builder<H>(queue: impl Into<String>, client: Arc<dyn QueueClient>, handler: H) -> ConsumerBuilder
    where
        H: EventHandler + 'static,
    {
        ConsumerBuilder {
            queue: queue.into(),
            client,
            handler: Arc::new(handler),
            hooks: Arc::new(LoggingHooks),
            identity: None,
            tracer: Tracer::default(),
            dispatch: DispatchConfig::default(),
            config: ConsumerConfig::default(),
        }
    }

    /// Returns the queue name.
    pub fn queue(&self) -> &str {
        &self.inner.queue
    }

    /// Returns the current lifecycle state.
    pub async fn status(&self) -> ConsumerStatus {
        *self.inner.status.read().await
    }

    /// Creates the queue and starts polling. No-op when already started.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }

        *self.inner.status.write().await = ConsumerStatus::Starting;
        if let Err(source) = self.inner.client.create(&self.inner.queue).await {
            *self.inner.status.write().await = ConsumerStatus::Stopped;
            return Err(ConsumerError::Create {
                queue: self.inner.queue.clone(),
                source,
            });
        }

        let (shutdown, signal) = watch::channel(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.poll(signal).await });
        *worker = Some(Worker { shutdown, handle });

        *self.inner.status.write().await = ConsumerStatus::Started;
        tracing::info!(queue = %self.inner.queue, prefetch = self.inner.config.prefetch, "consumer started");
        Ok(())
    }

    /// Stops polling and waits for in-flight messages. No-op when stopped.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(Worker { shutdown, handle }) = worker.take() else {
            return;
        };

        *self.inner.status.write().await = ConsumerStatus::Stopping;
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            tracing::error!(queue = %self.inner.queue, error = %e, "consumer worker ended abnormally");
        }

        *self.inner.status.write().await = ConsumerStatus::Stopped;
        tracing::info!(queue = %self.inner.queue, "consumer stopped");
    }

    /// Runs one message through the delivery pipeline.
    ///
    /// The poller calls this for every received message; push-based
    /// transports may call it directly.
    pub async fn deliver(&self, message: Message) -> DeliveryOutcome {
        self.inner.deliver(message).await
    }

    /// Sends a message to this consumer's queue.
    ///
    /// When `ctx` is given, the message carries its trace (`traceparent`)
    /// and principal (identity header). Entries in `headers` override both.
    ///
    /// # Errors
    ///
    /// [`SendError::NotStarted`] unless the consumer is started.
    pub async fn send(
        &self,
        ctx: Option<&ExecutionContext>,
        body: impl Into<String>,
        headers: HashMap<String, String>,
        delay: Duration,
    ) -> Result<MessageId, SendError> {
        let status = self.inner.status.read().await;
        if *status != ConsumerStatus::Started {
            return Err(SendError::NotStarted(self.inner.queue.clone()));
        }

        let mut stamped = HashMap::new();
        if let Some(ctx) = ctx {
            stamped.insert(TRACEPARENT.to_string(), trace::encode(ctx.span()));
            stamped.insert(
                self.inner.identity.header_name().to_string(),
                self.inner.identity.encode(ctx.principal())?,
            );
        }
        stamped.extend(headers);

        let id = self
            .inner
            .client
            .send(&self.inner.queue, body.into(), stamped, delay)
            .await?;
        drop(status);
        Ok(id)
    }
}

impl Inner {
    async fn poll(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.config.prefetch));

        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let max = 1 + permits.available_permits();
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.client.receive(&self.queue, max, self.config.poll_interval) => received,
            };

            match received {
                Ok(messages) => {
                    let mut first = Some(first);
                    for message in messages {
                        let permit = match first.take() {
                            Some(permit) => permit,
                            None => match acquire(&permits).await {
                                Some(permit) => permit,
                                None => break,
                            },
                        };
                        let inner = self.clone();
                        tokio::spawn(async move {
                            inner.deliver(message).await;
                            drop(permit);
                        });
                    }
                }
                Err(error) => {
                    drop(first);
                    tracing::warn!(queue = %self.queue, error = %error, "receive failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        // Draining: every permit back means no delivery is still running.
        let all = u32::try_from(self.config.prefetch).unwrap_or(u32::MAX);
        let _ = permits.acquire_many(all).await;
    }

    async fn deliver(&self, message: Message) -> DeliveryOutcome {
        let parent = message.header(TRACEPARENT).and_then(trace::decode);
        let span = self
            .tracer
            .start_span(format!("{} process", self.queue), parent.as_ref());
        let _guard = span.guard();
        span.set_tag("messaging.system", "queue");
        span.set_tag("messaging.destination", self.queue.as_str());
        span.set_tag("messaging.message_id", message.id.as_str());
        span.set_tag("messaging.redelivery_count", message.redelivery_count);
        span.set_tag("service.name", self.dispatch.service_name.as_str());
        let request_id = span.span_id().to_string();

        let principal = match self.resolve_principal(&message) {
            Ok(principal) => principal,
            Err(spec) => {
                tracing::debug!(request_id = %request_id, queue = %self.queue, message_id = %message.id, "rejecting message: {}", spec.message);
                span.set_tag("error.kind", spec.kind.as_str());
                self.run_hook("on_fail_to_read", self.hooks.on_fail_to_read(&message, &spec))
                    .await;
                let outcome = self.nack(&message).await;
                span.end_error(spec.message);
                return outcome;
            }
        };
        span.set_tag("user.id", principal.id.as_str());
        span.set_tag("user.name", principal.username.as_str());

        if message.redelivery_count > self.dispatch.redelivery_warn_threshold {
            tracing::warn!(
                request_id = %request_id,
                queue = %self.queue,
                message_id = %message.id,
                redelivery_count = message.redelivery_count,
                threshold = self.dispatch.redelivery_warn_threshold,
                "message redelivered too many times"
            );
        }

        let ctx = ExecutionContext::from_event(
            principal,
            EventPayload::new(self.queue.as_str(), message.clone()),
            TracingHandle::new(self.tracer.clone(), span.clone()),
        );
        let delivery_span = tracing::info_span!(
            "delivery",
            request_id = %request_id,
            queue = %self.queue,
            message_id = %message.id
        );
        let result = AssertUnwindSafe(self.handler.handle(ctx, message.clone()))
            .catch_unwind()
            .instrument(delivery_span)
            .await
            .unwrap_or_else(|payload| Err(DispatchError::from_panic(payload)));

        match result {
            Ok(()) => self.ack(&message, &span).await,
            Err(err) => {
                let spec = classify(&err);
                if spec.is_server_error() {
                    tracing::error!(
                        request_id = %request_id,
                        queue = %self.queue,
                        message_id = %message.id,
                        error.kind = %spec.kind,
                        cause = %crate::web::cause_chain(&err),
                        "message processing failed"
                    );
                } else {
                    tracing::debug!(
                        request_id = %request_id,
                        queue = %self.queue,
                        message_id = %message.id,
                        error.kind = %spec.kind,
                        "message rejected: {}",
                        spec.message
                    );
                }
                span.set_tag("error.kind", spec.kind.as_str());
                self.run_hook(
                    "on_fail_to_process",
                    self.hooks.on_fail_to_process(&message, &spec),
                )
                .await;
                let outcome = self.nack(&message).await;
                span.end_error(spec.message);
                outcome
            }
        }
    }

    // Strictly the identity header, else this consumer's default.
    fn resolve_principal(&self, message: &Message) -> Result<Principal, ErrorSpec> {
        match message.header(self.identity.header_name()) {
            Some(value) => self.identity.decode(value),
            None => self
                .config
                .default_principal
                .clone()
                .ok_or_else(|| ErrorSpec::unauthorized("Message carries no identity")),
        }
    }

    async fn ack(&self, message: &Message, span: &Span) -> DeliveryOutcome {
        match self.client.ack(&self.queue, &message.id).await {
            Ok(()) => {
                span.end_ok();
                DeliveryOutcome::Acked
            }
            Err(error) => {
                span.end_error(error.to_string());
                self.run_hook("on_fail_to_ack", self.hooks.on_fail_to_ack(message, &error))
                    .await;
                DeliveryOutcome::AckFailed
            }
        }
    }

    async fn nack(&self, message: &Message) -> DeliveryOutcome {
        let delay = self.config.retry_delay.delay_for(message.redelivery_count);
        match self.client.nack(&self.queue, &message.id, delay).await {
            Ok(()) => DeliveryOutcome::Nacked,
            Err(error) => {
                self.run_hook("on_fail_to_nack", self.hooks.on_fail_to_nack(message, &error))
                    .await;
                DeliveryOutcome::NackFailed
            }
        }
    }

    async fn run_hook<F>(&self, hook: &'static str, call: F)
    where
        F: Future<Output = Result<(), HookError>> + Send,
    {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::error!(queue = %self.queue, hook, error = %error, "failure hook returned an error");
            }
            Err(payload) => {
                let panic = DispatchError::from_panic(payload);
                tracing::error!(queue = %self.queue, hook, error = %panic, "failure hook panicked");
            }
        }
    }
}

async fn acquire(permits: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    match permits.clone().try_acquire_owned() {
        Ok(permit) => Some(permit),
        Err(_) => permits.clone().acquire_owned().await.ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;

    async fn ok(_ctx: ExecutionContext, _message: Message) -> Result<(), DispatchError> {
        Ok(())
    }

    fn consumer(queue: &InMemoryQueue) -> Consumer {
        Consumer::builder("q", Arc::new(queue.clone()), ok)
            .config(ConsumerConfig::default().with_default_principal(Principal::new("svc", "worker")))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn send_before_start_fails() {
        let consumer = consumer(&InMemoryQueue::new());
        let err = consumer
            .send(None, "{}", HashMap::new(), Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::NotStarted(_)));
        assert!(err.to_string().contains("not started"));
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let consumer = consumer(&InMemoryQueue::new());

        consumer.start().await.unwrap();
        consumer.start().await.unwrap();
        assert_eq!(consumer.status().await, ConsumerStatus::Started);

        consumer.stop().await;
        consumer.stop().await;
        assert_eq!(consumer.status().await, ConsumerStatus::Stopped);
    }

    #[test]
    fn zero_prefetch_fails_to_build() {
        let err = Consumer::builder("q", Arc::new(InMemoryQueue::new()), ok)
            .config(ConsumerConfig::default().with_prefetch(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Config(ConfigError::Zero { .. })));

        let err = Consumer::builder("q", Arc::new(InMemoryQueue::new()), ok)
            .config(ConsumerConfig::default().with_prefetch(usize::MAX))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Config(ConfigError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn deliver_acks_on_success() {
        let queue = InMemoryQueue::new();
        let consumer = consumer(&queue);
        consumer.start().await.unwrap();
        consumer.stop().await;

        queue
            .send("q", "{}".into(), HashMap::new(), Duration::ZERO)
            .await
            .unwrap();
        let message = queue.receive("q", 1, Duration::ZERO).await.unwrap().remove(0);

        assert_eq!(consumer.deliver(message.clone()).await, DeliveryOutcome::Acked);
        assert_eq!(queue.acked("q").await, vec![message.id]);
    }
}
