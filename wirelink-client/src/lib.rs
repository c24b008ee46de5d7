//! Client façade of the wirelink request pipeline.
//!
//! ```no_run
//! use wirelink_client::links::{http_batch_link, logger_link, HttpBatchLinkConfig};
//! use wirelink_client::{CallOptions, Client, RequestParams};
//!
//! # async fn demo() -> Result<(), wirelink_client::ClientError> {
//! let client = Client::builder()
//!     .link(logger_link())
//!     .link(http_batch_link(HttpBatchLinkConfig::new("http://localhost:3000/api/batch")))
//!     .build()?;
//!
//! let user = client.query(RequestParams::get("/users/1"), CallOptions::new()).await?;
//! println!("{:?}", user.envelope());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod links;
pub mod logging;

pub use client::{CallOptions, Client, ClientBuilder, ClientConfig, SubscriptionCallbacks};
pub use links::{
    http_batch_link, http_link, logger_link, split_link, HttpBatchLinkConfig, HttpLinkConfig,
    TransportOptions,
};
pub use logging::{init_logging, init_test_logging};

pub use wirelink_core::{
    CancellationToken, ClientError, ContextKey, Envelope, FetchError, FormData, Link, Operation,
    OperationContext, OperationKind, OperationResult, RequestParams, ResultMessage, Runtime,
    Subscription,
};
pub use wirelink_transport::{Fetcher, Interceptor, LoggingInterceptor, ReqwestFetcher};
