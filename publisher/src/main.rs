//! meterpub - publish metering samples read from stdin
//!
//! Each stdin line is a JSON array of samples and becomes one `publish` call.
//!
//! ## Usage
//!
//! ```bash
//! echo '[{"name":"cpu","type":"gauge","unit":"%","volume":3.5,"resource_id":"vm-1"}]' \
//!     | METERPUB_PUBLISHER_URL='rpc://?per_meter_topic=1&policy=queue' cargo run
//! ```
//!
//! ## Environment Variables
//!
//! - `METERPUB_PUBLISHER_URL`: publisher URL (default: "rpc://")
//! - `METERPUB_TRANSPORT`: "stdout" or an http(s) base URL (default: "stdout")
//! - `METERPUB_HOST`: host name used in notifications (default: $HOSTNAME or "localhost")
//! - `METERPUB_FLUSH_INTERVAL_MS`: background flush interval (default: 1000)
//! - `METERPUB_LOG_LEVEL`: log level (default: "info")
//! - `METERPUB_LOG_FORMAT`: "json" or "pretty" (default: "pretty")

use meterpub::config::{Config, LogFormat, TransportKind};
use meterpub::metrics::Metrics;
use meterpub::{
    BackoffConfig, Context, PublishError, PublisherConfig, ResilientPublisher, Sample,
    StdoutTransport, Transport, WebhookTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    Metrics::init()?;

    let publisher_config = PublisherConfig::from_url(&config.publisher_url)?;
    for warning in publisher_config.warnings() {
        warn!(warning = %warning, "publisher configuration");
    }

    let transport: Arc<dyn Transport> = match &config.transport {
        TransportKind::Stdout => Arc::new(StdoutTransport::new()),
        TransportKind::Webhook(url) => Arc::new(WebhookTransport::new(url.clone())?),
    };

    info!(
        publisher_url = %config.publisher_url,
        transport = transport.name(),
        host = %config.host,
        flush_interval_ms = config.flush_interval_ms,
        "starting meterpub"
    );

    let sender = meterpub::build_sender(
        &publisher_config,
        transport,
        &config.host,
        BackoffConfig::default(),
    );
    let publisher = Arc::new(ResilientPublisher::new(&publisher_config, sender));
    let context = Context::new().with("host", config.host.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.flush_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => publish_line(&publisher, &context, &line).await,
                    None => {
                        info!("stdin closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if publisher.queue_len() > 0 {
                    report(publisher.flush().await);
                }
            }
            _ = shutdown_signal() => break,
        }
    }

    publisher.shutdown().await?;
    let stats = publisher.stats();
    info!(
        samples_published = stats.samples_published,
        batches_sent = stats.batches_sent,
        batches_dropped = stats.batches_dropped,
        batches_evicted = stats.batches_evicted,
        "meterpub shutdown complete"
    );
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout stays clean for the stdout transport
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn publish_line(publisher: &ResilientPublisher, context: &Context, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<Vec<Sample>>(line) {
        Ok(samples) => report(publisher.publish(context, &samples).await),
        Err(e) => warn!(error = %e, "skipping malformed sample line"),
    }
}

fn report(result: meterpub::Result<()>) {
    match result {
        Ok(()) => {}
        Err(PublishError::Delivery {
            destination,
            source,
        }) => {
            warn!(destination = %destination, error = %source, "delivery failed, batches stay queued")
        }
        Err(e) => error!(error = %e, "publish failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = ?e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
