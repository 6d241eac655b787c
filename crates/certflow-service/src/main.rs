//! certflow certificate service
//!
//! HTTP API over the certificate store; publishes toggle events to the queue.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use certflow_core::config::{ensure_distinct_paths, load_config};
use certflow_core::db::PoolSettings;
use certflow_core::queue::{QueueDatabase, TopicProducer};
use certflow_core::tracing_init::init_tracing;
use certflow_core::{DeliveryPolicy, ToggleNoopPolicy};

use certflow_service::http::build_router;
use certflow_service::storage::CertDatabase;
use certflow_service::{StateManager, ToggleEmitter};

#[derive(Parser, Debug)]
#[command(name = "certificate-service")]
#[command(version, about = "certflow certificate service - users, certificates, toggle events")]
struct Args {
    /// JSON config file; CLI flags override its values.
    #[arg(long, env = "CERTFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "LISTEN_ADDR")]
    addr: Option<String>,

    /// Path to the certificate store `SQLite` file.
    #[arg(long, env = "CERTFLOW_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Path to the queue `SQLite` file shared with the notifier.
    #[arg(long, env = "CERTFLOW_QUEUE_PATH")]
    queue_path: Option<PathBuf>,

    /// Topic toggle events are published to.
    #[arg(long, env = "CERTFLOW_TOPIC")]
    topic: Option<String>,

    /// Same-value toggle handling: `reject` or `accept`.
    #[arg(long, env = "CERTFLOW_TOGGLE_NOOP")]
    toggle_noop: Option<ToggleNoopPolicy>,

    /// Publish attempts per toggle event (1 = no retry).
    #[arg(long, env = "CERTFLOW_PUBLISH_ATTEMPTS")]
    publish_attempts: Option<u32>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("certflow_service=info,certflow_core=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.service.listen_addr = addr;
    }
    if let Some(path) = args.db_path {
        config.service.database_path = Some(path);
    }
    if let Some(path) = args.queue_path {
        config.queue.path = Some(path);
    }
    if let Some(topic) = args.topic {
        config.queue.topic = topic;
    }
    if let Some(policy) = args.toggle_noop {
        config.service.toggle_noop = policy;
    }
    if let Some(attempts) = args.publish_attempts {
        config.service.publish = DeliveryPolicy {
            max_attempts: attempts,
            ..config.service.publish
        };
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.service.listen_addr,
        topic = %config.queue.topic,
        toggle_noop = ?config.service.toggle_noop,
        "Starting certificate-service"
    );

    let settings = PoolSettings {
        max_connections: config.service.max_connections,
        ..PoolSettings::default()
    };

    let db_path = match config.service.database_path.clone() {
        Some(path) => path,
        None => default_data_path("certs.db")?,
    };
    let queue_path = match config.queue.path.clone() {
        Some(path) => path,
        None => default_data_path("queue.db")?,
    };
    ensure_distinct_paths(&db_path, &queue_path)?;

    info!(path = %db_path.display(), "Opening certificate store");
    let db = CertDatabase::open(&db_path, settings).await?;
    info!(path = %queue_path.display(), "Opening queue");
    let queue = QueueDatabase::open(&queue_path, PoolSettings::default()).await?;

    let producer = TopicProducer::new(queue, config.queue.topic.clone(), config.queue.partition);
    let emitter = ToggleEmitter::new(producer.clone(), config.service.publish.clone());
    let manager = Arc::new(StateManager::new(
        db.clone(),
        emitter,
        config.service.toggle_noop,
    ));

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let listener = tokio::net::TcpListener::bind(&config.service.listen_addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server ready");

    let served = axum::serve(listener, build_router(manager))
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await;

    cancel.cancel();
    if let Err(e) = signals.await {
        warn!(error = %e, "Signal task failed");
    }

    producer.close().await;
    db.close().await;
    info!("certificate-service stopped");

    served?;
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

/// Default data file path: ~/.certflow/<file>
fn default_data_path(file: &str) -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".certflow").join(file))
}
