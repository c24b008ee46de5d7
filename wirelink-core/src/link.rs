//! Middleware stages and their composition into a chain.
//!
//! A [`Link`] is bound once per client against the shared [`Runtime`],
//! producing an [`OperationLink`]. For every operation the chain calls the
//! first operation link with a [`NextLink`] that forwards to the rest.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::envelope::OperationResult;
use crate::error::ClientError;
use crate::observable::{Observable, Subscriber};
use crate::operation::Operation;

pub type OperationObservable = Observable<OperationResult, ClientError>;

/// Per-client settings shared by all links, owned by the client.
///
/// Links fall back to these when their own configuration leaves a value unset.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub client_name: String,
    /// Timeout for the default HTTP fetcher.
    pub timeout: Duration,
    pub max_batch_size: Option<usize>,
    /// How long a batching link waits for more operations; zero means the next tick.
    pub batch_window: Duration,
}

impl Runtime {
    pub fn new(client_name: impl Into<String>) -> Self {
        Runtime {
            client_name: client_name.into(),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_batch_size(mut self, max: Option<usize>) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime {
            client_name: "wirelink".to_string(),
            timeout: Duration::from_millis(30_000),
            max_batch_size: Some(100),
            batch_window: Duration::ZERO,
        }
    }
}

pub trait OperationLink: Send + Sync {
    fn call(&self, op: Operation, next: NextLink) -> OperationObservable;
}

impl<F> OperationLink for F
where
    F: Fn(Operation, NextLink) -> OperationObservable + Send + Sync,
{
    fn call(&self, op: Operation, next: NextLink) -> OperationObservable {
        self(op, next)
    }
}

/// Link factory, bound once per client.
pub trait Link: Send + Sync {
    fn bind(&self, runtime: &Runtime) -> Result<Arc<dyn OperationLink>, ClientError>;
}

impl<F> Link for F
where
    F: Fn(&Runtime) -> Result<Arc<dyn OperationLink>, ClientError> + Send + Sync,
{
    fn bind(&self, runtime: &Runtime) -> Result<Arc<dyn OperationLink>, ClientError> {
        self(runtime)
    }
}

pub type BoundLinks = Arc<[Arc<dyn OperationLink>]>;

pub fn bind_links(links: &[Arc<dyn Link>], runtime: &Runtime) -> Result<BoundLinks, ClientError> {
    links.iter().map(|link| link.bind(runtime)).collect()
}

/// Continuation handed to a link: calling it runs the remainder of the chain.
#[derive(Clone)]
pub struct NextLink {
    links: BoundLinks,
    index: usize,
}

impl NextLink {
    pub fn new(links: BoundLinks) -> Self {
        NextLink { links, index: 0 }
    }

    /// May be called zero, one or several times.
    pub fn call(&self, op: Operation) -> OperationObservable {
        match self.links.get(self.index) {
            Some(link) => link.call(
                op,
                NextLink {
                    links: Arc::clone(&self.links),
                    index: self.index + 1,
                },
            ),
            None => {
                tracing::error!(
                    operation_id = %op.id,
                    "link chain exhausted without a terminating link"
                );
                Observable::config_error(
                    "No more links to execute - did you forget to add a terminating link?",
                )
            }
        }
    }

    pub fn remaining(&self) -> usize {
        self.links.len().saturating_sub(self.index)
    }
}

impl fmt::Debug for NextLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextLink")
            .field("index", &self.index)
            .field("len", &self.links.len())
            .finish()
    }
}

/// Builds the observable that runs `operation` through `links` on every subscribe.
pub fn create_chain(links: BoundLinks, operation: Operation) -> OperationObservable {
    Observable::new(move |subscriber: Subscriber<OperationResult, ClientError>| {
        NextLink::new(Arc::clone(&links))
            .call(operation.clone())
            .subscribe(subscriber)
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKey;
    use crate::envelope::{Envelope, ResultMessage};
    use crate::ids::OperationId;
    use crate::observable::FnObserver;
    use crate::operation::{OperationKind, RequestParams};
    use crate::operators::map;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Visited;
    impl ContextKey for Visited {
        type Value = Vec<&'static str>;
        const NAME: &'static str = "visited";
    }

    fn op() -> Operation {
        Operation::new(
            OperationId::new(1),
            OperationKind::Query,
            RequestParams::get("/ping"),
        )
    }

    fn terminal(calls: Arc<AtomicUsize>) -> Arc<dyn OperationLink> {
        Arc::new(move |op: Operation, _next: NextLink| -> OperationObservable {
            calls.fetch_add(1, Ordering::SeqCst);
            let visited = op.context.get::<Visited>().cloned().unwrap_or_default();
            Observable::of(OperationResult::data(Envelope::success(
                200,
                "OK",
                json!(visited),
            )))
        })
    }

    fn stamping(name: &'static str) -> Arc<dyn OperationLink> {
        Arc::new(move |mut op: Operation, next: NextLink| -> OperationObservable {
            let mut visited = op.context.get::<Visited>().cloned().unwrap_or_default();
            visited.push(name);
            op.context.insert::<Visited>(visited);
            next.call(op)
        })
    }

    fn collect(obs: &OperationObservable) -> (Vec<OperationResult>, Vec<ClientError>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (v, e) = (values.clone(), errors.clone());
        obs.subscribe(
            FnObserver::new()
                .on_next(move |r| v.lock().push(r))
                .on_error(move |err| e.lock().push(err)),
        );
        let values = values.lock().clone();
        let errors = errors.lock().clone();
        (values, errors)
    }

    #[test]
    fn test_links_run_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let links: BoundLinks = vec![stamping("a"), stamping("b"), terminal(calls.clone())].into();

        let (values, errors) = collect(&create_chain(links, op()));
        assert!(errors.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let data = values[0].envelope().unwrap().data.clone();
        assert_eq!(data, Some(json!(["a", "b"])));
    }

    #[test]
    fn test_short_circuit_skips_rest_of_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: Arc<dyn OperationLink> =
            Arc::new(|_op: Operation, _next: NextLink| -> OperationObservable {
                Observable::of(OperationResult::data(Envelope::success(
                    200,
                    "OK",
                    json!("cached"),
                )))
            });
        let links: BoundLinks = vec![cache, terminal(calls.clone())].into();

        let (values, _) = collect(&create_chain(links, op()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(values[0].envelope().unwrap().data, Some(json!("cached")));
    }

    #[test]
    fn test_link_may_call_next_several_times() {
        let calls = Arc::new(AtomicUsize::new(0));
        let twice: Arc<dyn OperationLink> =
            Arc::new(|op: Operation, next: NextLink| -> OperationObservable {
                let first = next.call(op.clone());
                let second = next.call(op);
                Observable::new(move |sub: Subscriber<OperationResult, ClientError>| {
                    first.subscribe(FnObserver::new().on_next({
                        let sub = sub.clone();
                        move |r| sub.next(r)
                    }));
                    second.subscribe(sub).into()
                })
            });
        let links: BoundLinks = vec![twice, terminal(calls.clone())].into();

        let (values, _) = collect(&create_chain(links, op()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_running_off_the_end_is_a_config_error() {
        let links: BoundLinks = vec![stamping("only")].into();
        let (values, errors) = collect(&create_chain(links, op()));
        assert!(values.is_empty());
        assert!(matches!(errors[0], ClientError::Config(_)));
    }

    #[test]
    fn test_links_can_transform_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stopper: Arc<dyn OperationLink> =
            Arc::new(|op: Operation, next: NextLink| -> OperationObservable {
                next.call(op).pipe(map(|_r: OperationResult| OperationResult::stopped()))
            });
        let links: BoundLinks = vec![stopper, terminal(calls)].into();
        let (values, _) = collect(&create_chain(links, op()));
        assert_eq!(values[0].result, ResultMessage::Stopped);
    }

    #[test]
    fn test_bind_links_passes_runtime() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let link: Arc<dyn Link> = Arc::new(
            move |runtime: &Runtime| -> Result<Arc<dyn OperationLink>, ClientError> {
                *sink.lock() = runtime.client_name.clone();
                Ok(Arc::new(|op: Operation, next: NextLink| -> OperationObservable {
                    next.call(op)
                }))
            },
        );

        let bound = bind_links(&[link], &Runtime::new("test-client")).unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(*seen.lock(), "test-client");
        assert_eq!(NextLink::new(bound).remaining(), 1);
    }

    #[test]
    fn test_bind_failure_propagates() {
        let broken: Arc<dyn Link> =
            Arc::new(|_: &Runtime| -> Result<Arc<dyn OperationLink>, ClientError> {
                Err(ClientError::config("missing url"))
            });
        assert!(matches!(
            bind_links(&[broken], &Runtime::default()),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_runtime_defaults() {
        let runtime = Runtime::new("app").batch_window(std::time::Duration::from_millis(5));
        assert_eq!(runtime.client_name, "app");
        assert_eq!(runtime.max_batch_size, Some(100));
        assert_eq!(runtime.timeout, std::time::Duration::from_secs(30));
        assert_eq!(runtime.batch_window, std::time::Duration::from_millis(5));
    }
}
