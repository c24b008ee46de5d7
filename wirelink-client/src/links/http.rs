//! Terminating link: one HTTP request per operation.
//!
//! Queries and mutations resolve a single envelope and complete.
//! Subscriptions read a newline-delimited JSON body: `Started`, one `Data`
//! per line, then `Stopped` once the server closes the stream.

use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;
use wirelink_core::{
    ClientError, Envelope, Link, NextLink, Observable, Operation, OperationKind, OperationLink,
    OperationObservable, OperationResult, Runtime, Subscriber, Teardown,
};
use wirelink_transport::{with_signal, Requester, StreamResponse};

use super::{spawn_operation, TransportOptions};

#[derive(Debug, Clone)]
pub struct HttpLinkConfig {
    pub url: String,
    pub transport: TransportOptions,
}

impl HttpLinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        HttpLinkConfig {
            url: url.into(),
            transport: TransportOptions::default(),
        }
    }
}

pub fn http_link(config: HttpLinkConfig) -> HttpLink {
    HttpLink { config }
}

#[derive(Debug, Clone)]
pub struct HttpLink {
    config: HttpLinkConfig,
}

impl Link for HttpLink {
    fn bind(&self, runtime: &Runtime) -> Result<Arc<dyn OperationLink>, ClientError> {
        let requester = self.config.transport.requester(&self.config.url, runtime)?;
        debug!(client = %runtime.client_name, url = %self.config.url, "http link bound");
        Ok(Arc::new(BoundHttpLink {
            requester: Arc::new(requester),
        }))
    }
}

struct BoundHttpLink {
    requester: Arc<Requester>,
}

impl OperationLink for BoundHttpLink {
    fn call(&self, op: Operation, _next: NextLink) -> OperationObservable {
        let requester = Arc::clone(&self.requester);
        Observable::new(move |subscriber: Subscriber<OperationResult, ClientError>| {
            let requester = Arc::clone(&requester);
            let op = op.clone();
            let task = spawn_operation(&subscriber, || {
                let subscriber = subscriber.clone();
                async move {
                    match op.kind {
                        OperationKind::Subscription => stream(&requester, op, subscriber).await,
                        _ => request(&requester, op, subscriber).await,
                    }
                }
            });
            match task {
                Some(task) => Teardown::new(move || task.abort()),
                None => Teardown::default(),
            }
        })
    }
}

async fn request(
    requester: &Requester,
    op: Operation,
    subscriber: Subscriber<OperationResult, ClientError>,
) {
    match requester.request(&op.params).await {
        Ok(envelope) => {
            subscriber.next(OperationResult::data(envelope).with_context(op.context));
            subscriber.complete();
        }
        Err(err) => {
            debug!(operation_id = %op.id, error = %err, "request failed");
            subscriber.error(err);
        }
    }
}

async fn stream(
    requester: &Requester,
    op: Operation,
    subscriber: Subscriber<OperationResult, ClientError>,
) {
    let transformer = requester.transformer_for(&op.params);
    let outcome = with_signal(op.params.fetch.signal.as_ref(), async {
        match requester.stream(&op.params).await? {
            StreamResponse::Refused(envelope) => {
                subscriber.next(OperationResult::data(envelope).with_context(op.context.clone()));
            }
            StreamResponse::Lines {
                status,
                status_text,
                mut lines,
            } => {
                subscriber.next(OperationResult::started());
                while let Some(line) = lines.next().await {
                    if subscriber.closed() {
                        return Ok(());
                    }
                    let data = transformer.deserialize(line?)?;
                    subscriber.next(
                        OperationResult::data(Envelope::success(status, status_text.clone(), data))
                            .with_context(op.context.clone()),
                    );
                }
                subscriber.next(OperationResult::stopped());
            }
        }
        Ok::<(), ClientError>(())
    })
    .await;

    match outcome {
        Ok(()) => subscriber.complete(),
        Err(err) => {
            debug!(operation_id = %op.id, error = %err, "stream failed");
            subscriber.error(err);
        }
    }
}
