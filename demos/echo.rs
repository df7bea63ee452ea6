//! Echo demo: connects to a WebSocket echo server, sends a message every few seconds and logs
//! every lifecycle callback.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,sockrates=debug cargo run --example echo --features tracing -- wss://echo.websocket.org
//! ```
//!
//! Optionally log to a file:
//! ```sh
//! LOG_FILE=echo.log RUST_LOG=info,sockrates=debug cargo run --example echo --features tracing
//! ```

use std::fs::File;
use std::time::Duration;

use sockrates::{Client, ConnectionConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_ADDRESS: &str = "wss://echo.websocket.org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());

    let config = ConnectionConfig::builder()
        .max_attempts(5)
        .heartbeat_interval(Duration::from_secs(10))
        .reconnect_window(Duration::from_secs(45))
        .build();
    let client = Client::new(&address, config)?;

    client.on_open(|| info!(event = "open"));
    client.on_reconnect(|| info!(event = "reconnect"));
    client.on_close(|code, reason| info!(event = "close", %code, ?reason));
    client.on_error(|message| warn!(event = "error", %message));
    client.on_max_attempts_reached(|| warn!(event = "max_attempts_reached"));
    client.on_message(|payload| match payload.as_text() {
        Some(text) => info!(event = "message", %text),
        None => info!(event = "message", ?payload),
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    for n in 0..24_u32 {
        ticker.tick().await;
        client.json(&serde_json::json!({ "n": n }), true)?;
        info!(status = ?client.status());
    }

    client.close()?;
    Ok(())
}
