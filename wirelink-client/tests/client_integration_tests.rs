// End-to-end client tests against mock HTTP endpoints

use async_trait::async_trait;
use mockito::{Matcher, Server};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use wirelink_client::links::{http_batch_link, http_link, logger_link, split_link};
use wirelink_client::{
    init_test_logging, CallOptions, CancellationToken, Client, ClientError, Fetcher,
    HttpBatchLinkConfig, HttpLinkConfig, Interceptor, Link, OperationKind, RequestParams,
    ReqwestFetcher, SubscriptionCallbacks,
};
use wirelink_core::WrappingTransformer;

fn batch_body(items: &[serde_json::Value]) -> String {
    json!(items
        .iter()
        .map(|data| json!({"data": data, "status": 200, "statusText": "OK"}))
        .collect::<Vec<_>>())
    .to_string()
}

fn batch_client(url: String) -> Client {
    Client::builder()
        .link(logger_link())
        .link(http_batch_link(HttpBatchLinkConfig::new(url)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_queries_share_one_request() {
    init_test_logging();
    let mut server = Server::new_async().await;
    let batch = server
        .mock("GET", "/api/batch")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("batch".into(), "1".into()),
            Matcher::UrlEncoded("0.path".into(), "/users/1".into()),
            Matcher::UrlEncoded("1.path".into(), "/users/2".into()),
            Matcher::UrlEncoded("2.path".into(), "/users/3".into()),
        ]))
        .with_status(200)
        .with_body(batch_body(&[json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]))
        .expect(1)
        .create_async()
        .await;

    let client = batch_client(format!("{}/api/batch", server.url()));
    let (a, b, c) = tokio::join!(
        client.query(RequestParams::get("/users/1"), CallOptions::new()),
        client.query(RequestParams::get("/users/2"), CallOptions::new()),
        client.query(RequestParams::get("/users/3"), CallOptions::new()),
    );

    assert_eq!(a.unwrap().envelope().unwrap().data, Some(json!({"id": 1})));
    assert_eq!(b.unwrap().envelope().unwrap().data, Some(json!({"id": 2})));
    assert_eq!(c.unwrap().envelope().unwrap().data, Some(json!({"id": 3})));
    batch.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_share_one_request_across_workers() {
    let mut server = Server::new_async().await;
    let paths: Vec<String> = (0..20).map(|i| format!("/items/{}", i)).collect();
    let mut matchers = vec![Matcher::UrlEncoded("batch".into(), "1".into())];
    matchers.extend(
        paths
            .iter()
            .enumerate()
            .map(|(i, path)| Matcher::UrlEncoded(format!("{}.path", i), path.clone())),
    );
    let values: Vec<serde_json::Value> = (0..20).map(|i| json!(i)).collect();
    let batch = server
        .mock("GET", "/api/batch")
        .match_query(Matcher::AllOf(matchers))
        .with_status(200)
        .with_body(batch_body(&values))
        .expect(1)
        .create_async()
        .await;

    let client = batch_client(format!("{}/api/batch", server.url()));
    let results = futures::future::join_all(
        paths
            .iter()
            .map(|path| client.query(RequestParams::get(path.clone()), CallOptions::new())),
    )
    .await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().envelope().unwrap().data, Some(json!(i)));
    }
    batch.assert_async().await;
}

#[tokio::test]
async fn test_cancelled_operation_leaves_the_batch() {
    let mut server = Server::new_async().await;
    let batch = server
        .mock("GET", "/api/batch")
        // The aborted call was issued first; only the kept one may occupy slot 0.
        .match_query(Matcher::UrlEncoded("0.path".into(), "/kept".into()))
        .with_status(200)
        .with_body(batch_body(&[json!("kept")]))
        .expect(1)
        .create_async()
        .await;

    let client = batch_client(format!("{}/api/batch", server.url()));
    let signal = CancellationToken::new();
    signal.cancel();

    let (dropped, kept) = tokio::join!(
        client.query(RequestParams::get("/dropped"), CallOptions::new().signal(signal)),
        client.query(RequestParams::get("/kept"), CallOptions::new()),
    );

    assert!(dropped.unwrap_err().is_aborted());
    assert_eq!(kept.unwrap().envelope().unwrap().data, Some(json!("kept")));
    batch.assert_async().await;
}

#[tokio::test]
async fn test_queries_and_mutations_use_separate_lanes() {
    let mut server = Server::new_async().await;
    let reads = server
        .mock("GET", "/api/batch")
        .match_query(Matcher::UrlEncoded("0.path".into(), "/posts".into()))
        .with_status(200)
        .with_body(batch_body(&[json!({"json": []})]))
        .expect(1)
        .create_async()
        .await;
    let writes = server
        .mock("POST", "/api/batch")
        .match_query(Matcher::UrlEncoded("batch".into(), "1".into()))
        .match_body(Matcher::Regex(r#"\{"json":\{"title":"hi"\}\}"#.into()))
        .with_status(200)
        .with_body(
            json!([{"data": {"json": {"id": 5}}, "status": 201, "statusText": "Created"}])
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = Client::builder()
        .link(http_batch_link(
            HttpBatchLinkConfig::new(format!("{}/api/batch", server.url()))
                .transformer(Arc::new(WrappingTransformer::new("json"))),
        ))
        .build()
        .unwrap();

    let (list, create) = tokio::join!(
        client.query(RequestParams::get("/posts"), CallOptions::new()),
        client.mutation(
            RequestParams::post("/posts").json(json!({"title": "hi"})),
            CallOptions::new()
        ),
    );

    assert_eq!(list.unwrap().envelope().unwrap().data, Some(json!([])));
    let created = create.unwrap().into_envelope().unwrap();
    assert_eq!(created.status, 201);
    assert_eq!(created.data, Some(json!({"id": 5})));
    reads.assert_async().await;
    writes.assert_async().await;
}

#[tokio::test]
async fn test_http_link_error_status_resolves() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/api/posts/9")
        .with_status(403)
        .with_body(r#"{"message":"forbidden"}"#)
        .create_async()
        .await;

    let client = Client::builder()
        .link(http_link(HttpLinkConfig::new(format!("{}/api", server.url()))))
        .build()
        .unwrap();

    let result = client
        .mutation(RequestParams::delete("/posts/9"), CallOptions::new())
        .await
        .unwrap();
    let envelope = result.into_envelope().unwrap();
    assert_eq!(envelope.status, 403);
    let err = envelope.into_data().unwrap_err();
    assert_eq!(err.status_code(), Some(403));
}

#[derive(Debug, PartialEq)]
enum Event {
    Started,
    Data(serde_json::Value),
    Stopped,
    Error(String),
    Complete,
}

#[tokio::test]
async fn test_split_routes_subscriptions_to_the_stream_link() {
    let mut server = Server::new_async().await;
    let stream = server
        .mock("GET", "/api/ticks")
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body("{\"tick\":1}\n{\"tick\":2}\n")
        .expect(1)
        .create_async()
        .await;

    let api = format!("{}/api", server.url());
    let streaming: Vec<Arc<dyn Link>> = vec![Arc::new(http_link(HttpLinkConfig::new(api.clone())))];
    let batching: Vec<Arc<dyn Link>> =
        vec![Arc::new(http_batch_link(HttpBatchLinkConfig::new(format!("{}/batch", api))))];
    let client = Client::builder()
        .link(split_link(
            |op| op.kind == OperationKind::Subscription,
            streaming,
            batching,
        ))
        .build()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (t1, t2, t3, t4, t5) = (tx.clone(), tx.clone(), tx.clone(), tx.clone(), tx);
    let _subscription = client.subscription(
        RequestParams::get("/ticks"),
        SubscriptionCallbacks::new()
            .on_started(move || {
                let _ = t1.send(Event::Started);
            })
            .on_data(move |envelope| {
                let _ = t2.send(Event::Data(envelope.data.unwrap_or_default()));
            })
            .on_stopped(move || {
                let _ = t3.send(Event::Stopped);
            })
            .on_error(move |err| {
                let _ = t4.send(Event::Error(err.to_string()));
            })
            .on_complete(move || {
                let _ = t5.send(Event::Complete);
            }),
    );

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = matches!(event, Event::Complete | Event::Error(_));
        events.push(event);
        if done {
            break;
        }
    }

    assert_eq!(
        events,
        vec![
            Event::Started,
            Event::Data(json!({"tick": 1})),
            Event::Data(json!({"tick": 2})),
            Event::Stopped,
            Event::Complete,
        ]
    );
    stream.assert_async().await;
}

#[derive(Debug, Default)]
struct CountingFetcher {
    inner: ReqwestFetcher,
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, request: reqwest::Request) -> Result<reqwest::Response, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(request).await
    }
}

struct TraceHeader(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl Interceptor for TraceHeader {
    async fn on_request(
        &self,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Request, ClientError> {
        self.0.lock().push(request.url().path().to_string());
        request
            .headers_mut()
            .insert("x-trace", reqwest::header::HeaderValue::from_static("on"));
        Ok(request)
    }
}

#[tokio::test]
async fn test_custom_fetcher_and_interceptors() {
    let mut server = Server::new_async().await;
    let batch = server
        .mock("GET", "/batch")
        .match_query(Matcher::Any)
        .match_header("x-trace", "on")
        .match_header("x-app", "tests")
        .with_status(200)
        .with_body(batch_body(&[json!(1), json!(2)]))
        .expect(1)
        .create_async()
        .await;

    let fetcher = Arc::new(CountingFetcher::default());
    let paths = Arc::new(Mutex::new(Vec::new()));
    let client = Client::builder()
        .link(http_batch_link(
            HttpBatchLinkConfig::new(format!("{}/batch", server.url()))
                .fetcher(fetcher.clone())
                .interceptor(Arc::new(TraceHeader(paths.clone())))
                .header(
                    reqwest::header::HeaderName::from_static("x-app"),
                    reqwest::header::HeaderValue::from_static("tests"),
                ),
        ))
        .build()
        .unwrap();

    let (a, b) = tokio::join!(
        client.query(RequestParams::get("/one"), CallOptions::new()),
        client.query(RequestParams::get("/two"), CallOptions::new()),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*paths.lock(), vec!["/batch".to_string()]);
    batch.assert_async().await;
}

#[tokio::test]
async fn test_chain_without_terminating_link_fails_the_call() {
    let client = Client::builder().link(logger_link()).build().unwrap();
    let err = client
        .query(RequestParams::get("/anything"), CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
}

#[tokio::test]
async fn test_max_batch_size_comes_from_client_config() {
    let mut server = Server::new_async().await;
    let batch = server
        .mock("GET", "/batch")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(batch_body(&[json!("x"), json!("y")]))
        .expect(2)
        .create_async()
        .await;

    let client = Client::builder()
        .max_batch_size(2)
        .link(http_batch_link(HttpBatchLinkConfig::new(format!("{}/batch", server.url()))))
        .build()
        .unwrap();

    let results = futures::future::join_all((0..3).map(|i| {
        client.query(RequestParams::get(format!("/items/{}", i)), CallOptions::new())
    }))
    .await;
    assert!(results.iter().all(Result::is_ok));
    batch.assert_async().await;
}
