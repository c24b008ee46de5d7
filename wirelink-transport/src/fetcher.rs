//! Pluggable HTTP execution.
//!
//! Requests are plain `reqwest::Request` values so callers may swap the
//! [`Fetcher`] (counting, recording, in-process) without re-encoding.

use async_trait::async_trait;
use reqwest::{Request, Response};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use wirelink_core::ClientError;

/// Maps a reqwest failure onto the pipeline's error type.
pub fn network_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::network(format!("request timed out: {}", err))
    } else if err.is_decode() {
        ClientError::codec(format!("failed to read response body: {}", err))
    } else if err.is_builder() {
        ClientError::config(format!("invalid request: {}", err))
    } else {
        ClientError::network(err.to_string())
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    async fn fetch(&self, request: Request) -> Result<Response, ClientError>;
}

/// Default fetcher backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(network_error)?;
        Ok(ReqwestFetcher { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        ReqwestFetcher { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, ClientError> {
        self.client.execute(request).await.map_err(network_error)
    }
}

/// Hook around every physical request.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_request(&self, request: Request) -> Result<Request, ClientError> {
        Ok(request)
    }

    async fn on_response(&self, response: Response) -> Result<Response, ClientError> {
        Ok(response)
    }
}

/// Logs each request and response at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor {
    log_headers: bool,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn on_request(&self, request: Request) -> Result<Request, ClientError> {
        tracing::debug!(method = %request.method(), url = %request.url(), "sending request");
        if self.log_headers {
            for (name, value) in request.headers() {
                tracing::trace!(header = %name, value = ?value, "request header");
            }
        }
        Ok(request)
    }

    async fn on_response(&self, response: Response) -> Result<Response, ClientError> {
        tracing::debug!(status = %response.status(), url = %response.url(), "received response");
        if self.log_headers {
            for (name, value) in response.headers() {
                tracing::trace!(header = %name, value = ?value, "response header");
            }
        }
        Ok(response)
    }
}

/// A fetcher plus the interceptors wrapped around it.
///
/// The embedded `reqwest::Client` only builds requests (multipart bodies
/// need a builder); execution always goes through the fetcher.
#[derive(Clone)]
pub struct FetchPipeline {
    client: reqwest::Client,
    fetcher: Arc<dyn Fetcher>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl FetchPipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        FetchPipeline {
            client: reqwest::Client::new(),
            fetcher,
            interceptors: Vec::new(),
        }
    }

    pub fn reqwest(fetcher: ReqwestFetcher) -> Self {
        FetchPipeline {
            client: fetcher.client().clone(),
            fetcher: Arc::new(fetcher),
            interceptors: Vec::new(),
        }
    }

    pub fn request(&self, method: reqwest::Method, url: reqwest::Url) -> reqwest::RequestBuilder {
        self.client.request(method, url)
    }

    pub fn with_interceptors(mut self, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Runs request interceptors in order, the fetcher, then response interceptors in order.
    pub async fn execute(&self, mut request: Request) -> Result<Response, ClientError> {
        for interceptor in &self.interceptors {
            request = interceptor.on_request(request).await?;
        }
        let mut response = self.fetcher.fetch(request).await?;
        for interceptor in &self.interceptors {
            response = interceptor.on_response(response).await?;
        }
        Ok(response)
    }
}

impl Default for FetchPipeline {
    fn default() -> Self {
        FetchPipeline::reqwest(ReqwestFetcher::default())
    }
}

impl fmt::Debug for FetchPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchPipeline")
            .field("fetcher", &self.fetcher)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
