//! Terminating link that merges concurrent operations into batch requests.
//!
//! Each operation kind has its own lane (data loader), so queries,
//! mutations and subscriptions never share a physical request. A
//! per-operation cancellation signal only withdraws that operation; the
//! shared request is cancelled once every operation in it has withdrawn.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use wirelink_core::{
    ClientError, Link, NextLink, Observable, Operation, OperationKind, OperationLink,
    OperationObservable, OperationResult, Runtime, Subscriber, Teardown,
};
use wirelink_transport::{with_signal, DataLoader, HttpBatchLoader};

use super::{spawn_operation, TransportOptions};

#[derive(Debug, Clone)]
pub struct HttpBatchLinkConfig {
    /// The batch endpoint.
    pub url: String,
    /// `None` means unlimited.
    pub max_url_length: Option<usize>,
    /// Falls back to the runtime's `max_batch_size`.
    pub max_items: Option<usize>,
    /// Falls back to the runtime's `batch_window`.
    pub batch_window: Option<Duration>,
    pub transport: TransportOptions,
}

impl HttpBatchLinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        HttpBatchLinkConfig {
            url: url.into(),
            max_url_length: None,
            max_items: None,
            batch_window: None,
            transport: TransportOptions::default(),
        }
    }

    pub fn max_url_length(mut self, max: usize) -> Self {
        self.max_url_length = Some(max);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn batch_window(mut self, window: Duration) -> Self {
        self.batch_window = Some(window);
        self
    }
}

pub fn http_batch_link(config: HttpBatchLinkConfig) -> HttpBatchLink {
    HttpBatchLink { config }
}

#[derive(Debug, Clone)]
pub struct HttpBatchLink {
    config: HttpBatchLinkConfig,
}

impl Link for HttpBatchLink {
    fn bind(&self, runtime: &Runtime) -> Result<Arc<dyn OperationLink>, ClientError> {
        let config = &self.config;
        let requester = config.transport.requester(&config.url, runtime)?;
        let max_items = config.max_items.or(runtime.max_batch_size);
        if max_items == Some(0) {
            return Err(ClientError::config("max_items must be at least 1"));
        }
        let loader = HttpBatchLoader::new(requester)
            .max_url_length(config.max_url_length)
            .max_items(max_items);
        let window = config.batch_window.unwrap_or(runtime.batch_window);

        debug!(
            client = %runtime.client_name,
            url = %config.url,
            max_items = ?max_items,
            max_url_length = ?config.max_url_length,
            "http batch link bound"
        );
        Ok(Arc::new(BoundHttpBatchLink {
            query: DataLoader::with_window(loader.clone(), window),
            mutation: DataLoader::with_window(loader.clone(), window),
            subscription: DataLoader::with_window(loader, window),
        }))
    }
}

#[derive(Debug)]
struct BoundHttpBatchLink {
    query: DataLoader<HttpBatchLoader>,
    mutation: DataLoader<HttpBatchLoader>,
    subscription: DataLoader<HttpBatchLoader>,
}

impl BoundHttpBatchLink {
    fn lane(&self, kind: OperationKind) -> &DataLoader<HttpBatchLoader> {
        match kind {
            OperationKind::Query => &self.query,
            OperationKind::Mutation => &self.mutation,
            OperationKind::Subscription => &self.subscription,
        }
    }
}

impl OperationLink for BoundHttpBatchLink {
    fn call(&self, op: Operation, _next: NextLink) -> OperationObservable {
        let loader = self.lane(op.kind).clone();
        Observable::new(move |subscriber: Subscriber<OperationResult, ClientError>| {
            let mut canceller = None;
            let task = spawn_operation(&subscriber, || {
                trace!(
                    operation_id = %op.id,
                    kind = %op.kind,
                    path = %op.params.path,
                    "queued for batch"
                );
                let handle = loader.load(op.params.clone());
                canceller = Some(handle.canceller());

                let subscriber = subscriber.clone();
                let signal = op.params.fetch.signal.clone();
                let context = op.context.clone();
                let id = op.id;
                async move {
                    let outcome =
                        with_signal(signal.as_ref(), async move { handle.await.and_then(|r| r) })
                            .await;
                    match outcome {
                        Ok(envelope) => {
                            subscriber.next(OperationResult::data(envelope).with_context(context));
                            subscriber.complete();
                        }
                        Err(err) => {
                            debug!(operation_id = %id, error = %err, "batched operation failed");
                            subscriber.error(err);
                        }
                    }
                }
            });

            match task {
                Some(task) => Teardown::new(move || {
                    if let Some(canceller) = canceller {
                        canceller.cancel();
                    }
                    task.abort();
                }),
                None => Teardown::default(),
            }
        })
    }
}
