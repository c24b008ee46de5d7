//! The client façade: owns the runtime and the bound link chain, hands out
//! operation ids and bridges the observable pipeline to futures and
//! callbacks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use wirelink_core::{
    bind_links, create_chain, promisify_observable, share, BoundLinks, CancellationToken,
    ClientError, Envelope, FnObserver, Link, Operation, OperationContext, OperationIdAllocator,
    OperationKind, OperationObservable, OperationResult, RequestParams, ResultMessage, Runtime,
    Subscription,
};
use wirelink_transport::with_signal;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name attached to log records of this client
    pub name: String,
    /// Default cap on operations per batch request
    pub max_batch_size: usize,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// How long batching links wait for more operations; 0 dispatches on the next tick
    pub batch_window_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "wirelink".to_string(),
            max_batch_size: 100,
            timeout_ms: 30000,
            batch_window_ms: 0,
        }
    }
}

impl ClientConfig {
    pub fn runtime(&self) -> Runtime {
        Runtime::new(self.name.clone())
            .timeout(Duration::from_millis(self.timeout_ms))
            .max_batch_size(Some(self.max_batch_size))
            .batch_window(Duration::from_millis(self.batch_window_ms))
    }
}

/// Per-call options for [`Client::query`] and [`Client::mutation`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub context: OperationContext,
    /// Cancelling it aborts the call with `ClientError::Aborted`.
    pub signal: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;
type Notify = Arc<dyn Fn() + Send + Sync>;

/// Handlers for [`Client::subscription`]. Unset handlers ignore their event.
#[derive(Clone, Default)]
pub struct SubscriptionCallbacks {
    on_started: Option<Notify>,
    on_data: Option<Callback<Envelope>>,
    on_error: Option<Callback<ClientError>>,
    on_stopped: Option<Notify>,
    on_complete: Option<Notify>,
}

impl SubscriptionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_started(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_started = Some(Arc::new(f));
        self
    }

    pub fn on_data(mut self, f: impl Fn(Envelope) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_stopped(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stopped = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SubscriptionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCallbacks")
            .field("on_started", &self.on_started.is_some())
            .field("on_data", &self.on_data.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_stopped", &self.on_stopped.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    links: Vec<Arc<dyn Link>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_batch_size(mut self, max: usize) -> Self {
        self.config.max_batch_size = max;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    pub fn batch_window_ms(mut self, window_ms: u64) -> Self {
        self.config.batch_window_ms = window_ms;
        self
    }

    /// Appends a link; the last one must terminate the chain.
    pub fn link(mut self, link: impl Link + 'static) -> Self {
        self.links.push(Arc::new(link));
        self
    }

    pub fn links(mut self, links: Vec<Arc<dyn Link>>) -> Self {
        self.links.extend(links);
        self
    }

    pub fn build(self) -> Result<Client, ClientError> {
        if self.links.is_empty() {
            return Err(ClientError::config(
                "a client needs at least one link, ending with a terminating link",
            ));
        }
        let runtime = self.config.runtime();
        let links = bind_links(&self.links, &runtime)?;
        info!(client = %runtime.client_name, links = links.len(), "client created");

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                runtime,
                links,
                ids: OperationIdAllocator::new(),
            }),
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("links", &self.links.len())
            .finish()
    }
}

struct ClientInner {
    config: ClientConfig,
    runtime: Runtime,
    links: BoundLinks,
    ids: OperationIdAllocator,
}

/// Cheap to clone; clones share the chain and the id sequence.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn new(config: ClientConfig, links: Vec<Arc<dyn Link>>) -> Result<Self, ClientError> {
        ClientBuilder::new().config(config).links(links).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    fn operation(
        &self,
        kind: OperationKind,
        mut params: RequestParams,
        options: CallOptions,
    ) -> Operation {
        if let Some(signal) = options.signal {
            params.fetch.signal = Some(signal);
        }
        let id = self.inner.ids.allocate();
        debug!(operation_id = %id, kind = %kind, path = %params.path, "operation created");
        Operation::new(id, kind, params).with_context(options.context)
    }

    /// Runs `op` through the chain. The physical work is shared by every subscriber.
    pub fn execute(&self, op: Operation) -> OperationObservable {
        create_chain(Arc::clone(&self.inner.links), op).pipe(share())
    }

    async fn call(
        &self,
        kind: OperationKind,
        params: RequestParams,
        options: CallOptions,
    ) -> Result<OperationResult, ClientError> {
        let op = self.operation(kind, params, options);
        let signal = op.params.fetch.signal.clone();
        let promise = promisify_observable(&self.execute(op));
        with_signal(signal.as_ref(), promise).await
    }

    /// Resolves to the first result of the operation. Dropping the future aborts it.
    pub async fn query(
        &self,
        params: RequestParams,
        options: CallOptions,
    ) -> Result<OperationResult, ClientError> {
        self.call(OperationKind::Query, params, options).await
    }

    pub async fn mutation(
        &self,
        params: RequestParams,
        options: CallOptions,
    ) -> Result<OperationResult, ClientError> {
        self.call(OperationKind::Mutation, params, options).await
    }

    /// Opens a subscription; unsubscribing tears down the underlying request.
    pub fn subscription(
        &self,
        params: RequestParams,
        callbacks: SubscriptionCallbacks,
    ) -> Subscription {
        let op = self.operation(OperationKind::Subscription, params, CallOptions::default());
        let SubscriptionCallbacks {
            on_started,
            on_data,
            on_error,
            on_stopped,
            on_complete,
        } = callbacks;

        self.execute(op).subscribe(
            FnObserver::new()
                .on_next(move |result: OperationResult| match result.result {
                    ResultMessage::Started => {
                        if let Some(f) = &on_started {
                            f();
                        }
                    }
                    ResultMessage::Data(envelope) => {
                        if let Some(f) = &on_data {
                            f(envelope);
                        }
                    }
                    ResultMessage::Stopped => {
                        if let Some(f) = &on_stopped {
                            f();
                        }
                    }
                })
                .on_error(move |err: ClientError| {
                    if let Some(f) = &on_error {
                        f(err);
                    }
                })
                .on_complete(move || {
                    if let Some(f) = &on_complete {
                        f();
                    }
                }),
        )
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("links", &self.inner.links.len())
            .field("next_id", &self.inner.ids.peek_next())
            .finish()
    }
}
