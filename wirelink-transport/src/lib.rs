//! Transport layer for wirelink: the batched data loader, the pluggable
//! fetcher, the universal single-request executor and the HTTP batch wire
//! format.

pub mod dataloader;
pub mod fetcher;
pub mod http_batch;
pub mod requester;
pub mod stream;

pub use dataloader::{
    BatchFetch, BatchLoader, DataLoader, LoadCanceller, LoadHandle, UnitResolver,
};
pub use fetcher::{
    network_error, FetchPipeline, Fetcher, Interceptor, LoggingInterceptor, ReqwestFetcher,
};
pub use http_batch::{
    batch_url, build_batch_request, decode_batch, demux_headers, encode_get_query,
    encode_post_form, execute_batch, BatchItemResult, HttpBatchLoader, WireEnvelope,
};
pub use requester::{resolve_url, with_signal, Requester, StreamResponse};
pub use stream::{CodecError, JsonLinesCodec, JsonLinesStream};
