//! certflow notifier
//!
//! Relays certificate toggle events from the queue to `{ENDPOINT}/cert-active-status-toggled`.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use certflow_core::config::load_config;
use certflow_core::db::PoolSettings;
use certflow_core::queue::{QueueDatabase, TopicReader};
use certflow_core::tracing_init::init_tracing;
use certflow_core::DeliveryPolicy;

use certflow_notifier::{EventConsumer, ForwardPool, HttpForwarder};

#[derive(Parser, Debug)]
#[command(name = "cert-notifier")]
#[command(version, about = "certflow notifier - relays certificate toggle events over HTTP")]
struct Args {
    /// JSON config file; CLI flags override its values.
    #[arg(long, env = "CERTFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL events are POSTed to.
    #[arg(long, env = "ENDPOINT")]
    endpoint: Option<String>,

    /// Path to the queue `SQLite` file shared with the certificate service.
    #[arg(long, env = "CERTFLOW_QUEUE_PATH")]
    queue_path: Option<PathBuf>,

    /// Topic to consume.
    #[arg(long, env = "CERTFLOW_TOPIC")]
    topic: Option<String>,

    /// Consumer group whose committed offset is resumed.
    #[arg(long, env = "CERTFLOW_GROUP_ID")]
    group_id: Option<String>,

    /// Maximum forwards in flight.
    #[arg(long, env = "CERTFLOW_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,

    /// Per-request forward timeout in milliseconds.
    #[arg(long, env = "CERTFLOW_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// Shutdown grace period for in-flight forwards in milliseconds.
    #[arg(long, env = "CERTFLOW_DRAIN_TIMEOUT_MS")]
    drain_timeout_ms: Option<u64>,

    /// Minimum time between deletions of fully committed queue messages, in milliseconds.
    #[arg(long, env = "CERTFLOW_PRUNE_INTERVAL_MS")]
    prune_interval_ms: Option<u64>,

    /// Forward attempts per message (1 = no retry).
    #[arg(long, env = "CERTFLOW_FORWARD_ATTEMPTS")]
    forward_attempts: Option<u32>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("certflow_notifier=info,certflow_core=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint {
        config.notifier.endpoint = endpoint;
    }
    if let Some(path) = args.queue_path {
        config.queue.path = Some(path);
    }
    if let Some(topic) = args.topic {
        config.queue.topic = topic;
    }
    if let Some(group_id) = args.group_id {
        config.queue.group_id = group_id;
    }
    if let Some(max) = args.max_in_flight {
        config.notifier.max_in_flight = max;
    }
    if let Some(ms) = args.request_timeout_ms {
        config.notifier.request_timeout_ms = Some(ms);
    }
    if let Some(ms) = args.drain_timeout_ms {
        config.notifier.drain_timeout_ms = ms;
    }
    if let Some(ms) = args.prune_interval_ms {
        config.notifier.prune_interval_ms = ms;
    }
    if let Some(attempts) = args.forward_attempts {
        config.notifier.forward = DeliveryPolicy {
            max_attempts: attempts,
            ..config.notifier.forward
        };
    }

    if config.notifier.endpoint.is_empty() {
        anyhow::bail!("ENDPOINT not set");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.notifier.endpoint,
        topic = %config.queue.topic,
        group_id = %config.queue.group_id,
        "Starting cert-notifier"
    );

    let queue_path = match config.queue.path.clone() {
        Some(path) => path,
        None => default_queue_path()?,
    };
    info!(path = %queue_path.display(), "Opening queue");
    let queue = QueueDatabase::open(&queue_path, PoolSettings::default()).await?;

    let reader = TopicReader::open(
        queue,
        config.queue.group_id.clone(),
        config.queue.topic.clone(),
        config.queue.partition,
        config.queue.poll_interval(),
    )
    .await?;

    let forwarder =
        HttpForwarder::new(&config.notifier.endpoint, config.notifier.request_timeout())?;
    info!(url = %forwarder.url(), "Forwarding events");
    let consumer = EventConsumer::new(
        reader,
        forwarder,
        ForwardPool::new(config.notifier.max_in_flight),
        config.notifier.forward.clone(),
        config.notifier.drain_timeout(),
    )
    .with_prune_interval(config.notifier.prune_interval());

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let stats = consumer.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = signals.await {
        warn!(error = %e, "Signal task failed");
    }

    info!(
        received = stats.received,
        delivered = stats.delivered,
        "cert-notifier stopped"
    );
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
        () = sigterm => info!("Received SIGTERM shutdown signal"),
        () = cancel.cancelled() => {}
    }
    cancel.cancel();
}

/// Default queue path: ~/.certflow/queue.db
fn default_queue_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".certflow").join("queue.db"))
}
