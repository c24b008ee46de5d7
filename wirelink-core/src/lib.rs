//! Core building blocks of the wirelink request pipeline: a push-based
//! observable, the operation records that flow through a chain of links,
//! and the chain itself.

pub mod context;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod link;
pub mod macros;
pub mod observable;
pub mod operation;
pub mod operators;
pub mod promise;
pub mod transformer;

pub use context::{ContextKey, OperationContext};
pub use envelope::{Envelope, OperationResult, RawResponse, ResultMessage};
pub use error::{BatchError, ClientError, FetchError};
pub use ids::{OperationId, OperationIdAllocator};
pub use link::{
    bind_links, create_chain, BoundLinks, Link, NextLink, OperationLink, OperationObservable,
    Runtime,
};
pub use observable::{FnObserver, Observable, Observer, Subscriber, Subscription, Teardown};
pub use operation::{
    method_has_body, FetchOptions, FormData, FormValue, Operation, OperationKind, RequestBody,
    RequestParams,
};
pub use operators::{map, share, tap, Tap};
pub use promise::{promisify_observable, AbortHandle, ObservableAbortError, ObservablePromise};
pub use transformer::{IdentityTransformer, Transformer, WrappingTransformer};

// Re-exported so downstream crates agree on the cancellation and header types.
pub use http;
pub use tokio_util::sync::CancellationToken;
