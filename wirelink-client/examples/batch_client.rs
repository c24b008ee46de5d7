// Batched queries, a mutation and a streamed subscription against one API
//
// Expects a server exposing a batch endpoint at $API_URL/batch and a
// newline-delimited JSON stream at $API_URL/events.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use wirelink_client::links::{http_batch_link, http_link, logger_link, split_link};
use wirelink_client::{
    init_logging, CallOptions, Client, ClientConfig, HttpBatchLinkConfig, HttpLinkConfig, Link,
    OperationKind, RequestParams, SubscriptionCallbacks,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging("logs", "batch_client")?;

    let api = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000/api".to_string());

    let streaming: Vec<Arc<dyn Link>> = vec![Arc::new(http_link(HttpLinkConfig::new(api.clone())))];
    let batching: Vec<Arc<dyn Link>> = vec![Arc::new(http_batch_link(
        HttpBatchLinkConfig::new(format!("{}/batch", api)).max_url_length(2048),
    ))];

    let client = Client::builder()
        .config(ClientConfig {
            name: "batch-example".to_string(),
            timeout_ms: 10000,
            ..Default::default()
        })
        .link(logger_link())
        .link(split_link(
            |op| op.kind == OperationKind::Subscription,
            streaming,
            batching,
        ))
        .build()?;

    // Issued together, so both travel in one batch request.
    let (user, posts) = tokio::join!(
        client.query(RequestParams::get("/users/1"), CallOptions::new()),
        client.query(RequestParams::get("/posts").query("author", "1"), CallOptions::new()),
    );
    info!(user = ?user?.envelope(), "user");
    info!(posts = ?posts?.envelope(), "posts");

    let created = client
        .mutation(
            RequestParams::post("/posts").json(serde_json::json!({"title": "hello"})),
            CallOptions::new(),
        )
        .await?;
    info!(status = created.envelope().map(|e| e.status), "post created");

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let done_tx = Arc::new(parking_lot::Mutex::new(Some(done_tx)));
    let subscription = client.subscription(
        RequestParams::get("/events"),
        SubscriptionCallbacks::new()
            .on_started(|| info!("stream started"))
            .on_data(|envelope| info!(data = ?envelope.data, "event"))
            .on_error(|err| info!(error = %err, "stream failed"))
            .on_complete(move || {
                if let Some(tx) = done_tx.lock().take() {
                    let _ = tx.send(());
                }
            }),
    );

    tokio::select! {
        _ = done_rx => info!("stream finished"),
        _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
            info!("stopping stream after 10s");
            subscription.unsubscribe();
        }
    }

    Ok(())
}
