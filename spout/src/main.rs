//! Retry spout demo binary
//!
//! Runs one spout over an in-memory source fed with demo messages. A
//! processor task acks most records and fails the `poison-*` ones, so the
//! logs show requeueing, backoff, and terminal drops.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! cargo run
//!
//! # Debug output, two retries per message, JSON logs
//! SPOUT_LOG_LEVEL=debug SPOUT_MAX_FAILED_RETRIES=2 SPOUT_LOG_FORMAT=json cargo run
//! ```
//!
//! ## Environment Variables
//!
//! - `SPOUT_TOPIC` / `SPOUT_SUBSCRIPTION`: what to consume (default: "events" / "retry-spout")
//! - `SPOUT_FAILED_RETRIES_TIMEOUT_MS`: retry window, negative disables (default: 60000)
//! - `SPOUT_MAX_FAILED_RETRIES`: retry count limit, negative disables (default: -1)
//! - `SPOUT_BACKOFF_BASE_MS` / `SPOUT_BACKOFF_MAX_MS`: backoff bounds (default: 100 / 60000)
//! - `SPOUT_METRICS_ADDR`: metrics server address (default: "0.0.0.0:9090")
//! - `SPOUT_LOG_LEVEL`: log level (default: "info")

use bytes::Bytes;
use retry_spout::config::LogFormat;
use retry_spout::metrics::Metrics;
use retry_spout::metrics_server::{Health, MetricsServer};
use retry_spout::{
    ChannelCollector, Emitted, MemoryConnector, MemorySource, Message, PayloadMapper,
    ShutdownHandle, Spout, SpoutConfig, SpoutRunner,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_BATCH: usize = 10;
const FEED_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SpoutConfig::from_env()?;
    init_tracing(&config);

    info!(
        topic = %config.topic,
        subscription = %config.subscription,
        spout = %config.spout_id(),
        metrics_addr = %config.metrics_addr,
        "Starting retry spout"
    );

    Metrics::init()?;
    let health = Health::new();
    let metrics_handle = MetricsServer::start(config.metrics_addr, health.clone());

    let source = Arc::new(MemorySource::new(config.topic.clone()));
    let connector = MemoryConnector::new(Arc::clone(&source));
    let (collector, records) = ChannelCollector::new();

    let spout =
        Arc::new(Spout::open(config, &connector, PayloadMapper, Arc::new(collector)).await?);
    let (handle, runner) = SpoutRunner::new(Arc::clone(&spout));

    let processor = tokio::spawn(process(Arc::clone(&spout), records));
    let feeder = tokio::spawn(feed(Arc::clone(&source), handle.clone()));
    tokio::spawn(shutdown_signal(handle, health));

    let stats = runner.run().await;

    feeder.abort();
    processor.abort();
    metrics_handle.abort();

    info!(
        emitted = stats.emitted,
        redelivered = stats.redelivered,
        "Retry spout shutdown complete"
    );
    Ok(())
}

fn init_tracing(config: &SpoutConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Publish a demo batch, then one message per tick until shutdown
async fn feed(source: Arc<MemorySource>, handle: ShutdownHandle) {
    for i in 0..DEMO_BATCH {
        source.publish(demo_message(&source, i));
    }

    let mut ticker = tokio::time::interval(FEED_INTERVAL);
    ticker.tick().await;
    let mut i = DEMO_BATCH;
    while !handle.is_shutdown() {
        ticker.tick().await;
        source.publish(demo_message(&source, i));
        i += 1;
    }
}

fn demo_message(source: &MemorySource, i: usize) -> Message {
    let payload = match i % 5 {
        // mapper drops empty payloads
        4 => Bytes::new(),
        3 => Bytes::from(format!("poison-{i}")),
        _ => Bytes::from(format!("event-{i}")),
    };
    Message::new(source.topic(), payload).with_property("seq", i.to_string())
}

/// Stand-in for downstream processing: poison records always fail
async fn process(
    spout: Arc<Spout<PayloadMapper>>,
    mut records: mpsc::UnboundedReceiver<Emitted<String>>,
) {
    while let Some(Emitted { record, token }) = records.recv().await {
        if record.starts_with("poison") {
            let outcome = spout.fail(token).await;
            warn!(%record, ?outcome, "Processing failed");
        } else {
            info!(%record, "Processed");
            spout.ack(token).await;
        }
    }
}

async fn shutdown_signal(handle: ShutdownHandle, health: Health) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    health.set_stopping();
    handle.shutdown();
}
