//! Links shipped with the client: two terminating HTTP links and two
//! routing/observability links.

pub mod http;
pub mod http_batch;
pub mod logger;
pub mod split;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use wirelink_core::http::{HeaderMap, HeaderName, HeaderValue};
use wirelink_core::{ClientError, OperationResult, Runtime, Subscriber, Transformer};
use wirelink_transport::{FetchPipeline, Fetcher, Interceptor, ReqwestFetcher, Requester};

pub use http::{http_link, HttpLink, HttpLinkConfig};
pub use http_batch::{http_batch_link, HttpBatchLink, HttpBatchLinkConfig};
pub use logger::{logger_link, LoggerLink};
pub use split::{split_link, SplitLink};

/// Settings shared by the HTTP links.
#[derive(Clone, Default)]
pub struct TransportOptions {
    pub headers: HeaderMap,
    pub transformer: Option<Arc<dyn Transformer>>,
    /// Replaces the default reqwest-backed fetcher.
    pub fetcher: Option<Arc<dyn Fetcher>>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
    /// Timeout of the default fetcher; falls back to the runtime's.
    pub timeout: Option<Duration>,
}

impl TransportOptions {
    pub(crate) fn requester(&self, url: &str, runtime: &Runtime) -> Result<Requester, ClientError> {
        if url.is_empty() {
            return Err(ClientError::config("link url must not be empty"));
        }
        let pipeline = match &self.fetcher {
            Some(fetcher) => FetchPipeline::new(Arc::clone(fetcher)),
            None => FetchPipeline::reqwest(ReqwestFetcher::new(
                self.timeout.unwrap_or(runtime.timeout),
            )?),
        };

        let mut requester = Requester::new(url)
            .with_pipeline(pipeline.with_interceptors(self.interceptors.clone()))
            .with_headers(self.headers.clone());
        if let Some(transformer) = &self.transformer {
            requester = requester.with_transformer(Arc::clone(transformer));
        }
        Ok(requester)
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("headers", &self.headers)
            .field("transformer", &self.transformer)
            .field("fetcher", &self.fetcher)
            .field("interceptors", &self.interceptors.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder methods for configs embedding a `transport: TransportOptions` field.
macro_rules! transport_builders {
    ($config:ty) => {
        impl $config {
            pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
                self.transport.headers.insert(name, value);
                self
            }

            pub fn headers(mut self, headers: HeaderMap) -> Self {
                self.transport.headers = headers;
                self
            }

            pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
                self.transport.transformer = Some(transformer);
                self
            }

            pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
                self.transport.fetcher = Some(fetcher);
                self
            }

            pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
                self.transport.interceptors.push(interceptor);
                self
            }

            pub fn timeout(mut self, timeout: Duration) -> Self {
                self.transport.timeout = Some(timeout);
                self
            }
        }
    };
}

transport_builders!(HttpLinkConfig);
transport_builders!(HttpBatchLinkConfig);

/// Spawns the work of one subscription, or fails it when no runtime is available.
pub(crate) fn spawn_operation<F>(
    subscriber: &Subscriber<OperationResult, ClientError>,
    work: impl FnOnce() -> F,
) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(work())),
        Err(_) => {
            subscriber.error(ClientError::config(
                "HTTP links must be subscribed from within a tokio runtime",
            ));
            None
        }
    }
}
