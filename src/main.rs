//! Activity server
//!
//! HTTP ingest and query service over the activity pipeline.
//!
//! # Usage
//!
//! ```bash
//! # NATS JetStream at nats://127.0.0.1:4222
//! cargo run --bin activity-server
//!
//! # In-process log, no broker needed
//! ACTIVITY_LOG_PROVIDER=memory ACTIVITY_API_PORT=8081 cargo run --bin activity-server
//! ```
//!
//! # Environment Variables
//!
//! - `ACTIVITY_LOG_PROVIDER`: memory | nats | kafka (default: nats)
//! - `ACTIVITY_BOOTSTRAP_SERVERS`: comma-separated server URLs
//! - `ACTIVITY_TOPIC`: topic name (default: user-activity-events)
//! - `ACTIVITY_GROUP_ID`: consumer group (default: event-processor-group)
//! - `ACTIVITY_STREAM_NAME`: JetStream stream (default: USER_ACTIVITY)
//! - `ACTIVITY_PUBLISH_TIMEOUT_MS`, `ACTIVITY_MAX_IN_FLIGHT`
//! - `ACTIVITY_PRODUCER_ACKS` (leader | all), `ACTIVITY_PRODUCER_IDEMPOTENT`
//! - `ACTIVITY_POLL_TIMEOUT_MS`, `ACTIVITY_POLL_INTERVAL_MS`
//! - `ACTIVITY_API_HOST`, `ACTIVITY_API_PORT` (default: 0.0.0.0:8080)

use a3s_activity::{Config, Pipeline};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("a3s_activity=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = ?config.log.provider,
        topic = %config.log.topic,
        api = %config.api.bind_addr(),
        "Activity server"
    );

    let pipeline = Pipeline::start(config).await?;
    let listener = tokio::net::TcpListener::bind(pipeline.config().api.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            stop.cancel();
        }
    });

    axum::serve(listener, pipeline.router())
        .with_graceful_shutdown(stop.cancelled_owned())
        .await?;

    pipeline.shutdown().await?;
    Ok(())
}
