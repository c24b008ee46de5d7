// Cancelling a single operation without disturbing the rest of its batch

use anyhow::Result;
use std::time::Duration;
use tracing::info;
use wirelink_client::links::http_batch_link;
use wirelink_client::{
    init_test_logging, CallOptions, CancellationToken, Client, ClientError, HttpBatchLinkConfig,
    RequestParams,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_test_logging();

    let url = std::env::var("BATCH_URL")
        .unwrap_or_else(|_| "http://localhost:3000/api/batch".to_string());
    let client = Client::builder()
        .link(http_batch_link(HttpBatchLinkConfig::new(url)))
        .build()?;

    let signal = CancellationToken::new();
    let cancel_soon = {
        let signal = signal.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            signal.cancel();
        }
    };

    let (slow, fast, ()) = tokio::join!(
        client.query(RequestParams::get("/reports/yearly"), CallOptions::new().signal(signal)),
        client.query(RequestParams::get("/users/1"), CallOptions::new()),
        cancel_soon,
    );

    match slow {
        Err(ClientError::Aborted) => info!("slow query aborted"),
        other => info!(result = ?other.map(|r| r.into_envelope()), "slow query settled first"),
    }
    info!(result = ?fast.map(|r| r.into_envelope()), "fast query");
    Ok(())
}
