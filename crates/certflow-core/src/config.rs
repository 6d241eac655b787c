//! Configuration for the certflow binaries.
//!
//! Values resolve in three layers, lowest priority first:
//! 1. Built-in defaults
//! 2. JSON config file (`--config`)
//! 3. CLI arguments and their environment variables
//!
//! The resolved structs are immutable once built and are passed to the
//! components at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{CERT_TOGGLED_PARTITION, CERT_TOGGLED_TOPIC};

/// Complete certflow configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Certificate service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen_addr: String,
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
    pub toggle_noop: ToggleNoopPolicy,
    pub publish: DeliveryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            database_path: None,
            max_connections: 5,
            toggle_noop: ToggleNoopPolicy::default(),
            publish: DeliveryPolicy::default(),
        }
    }
}

/// Notifier (queue consumer / HTTP relay) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Base URL of the downstream sink; events are POSTed to
    /// `{endpoint}/cert-active-status-toggled`.
    pub endpoint: String,
    /// Upper bound on forwards in flight at once.
    pub max_in_flight: usize,
    /// Per-request timeout for forwards, in milliseconds. `None` disables it.
    pub request_timeout_ms: Option<u64>,
    /// How long shutdown waits for in-flight forwards, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Minimum time between deletions of fully committed queue messages,
    /// in milliseconds.
    pub prune_interval_ms: u64,
    pub forward: DeliveryPolicy,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_in_flight: 32,
            request_timeout_ms: None,
            drain_timeout_ms: 5_000,
            prune_interval_ms: 60_000,
            forward: DeliveryPolicy::default(),
        }
    }
}

impl NotifierConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub const fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

/// Queue transport configuration shared by producer and consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub path: Option<PathBuf>,
    pub topic: String,
    pub partition: i64,
    pub group_id: String,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: None,
            topic: CERT_TOGGLED_TOPIC.to_string(),
            partition: CERT_TOGGLED_PARTITION,
            group_id: "cert-notifier".to_string(),
            poll_interval_ms: 200,
        }
    }
}

impl QueueConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How a toggle to the value a certificate already has is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleNoopPolicy {
    /// Report an integrity error: the conditional update changed no row.
    #[default]
    Reject,
    /// Report success without changing the row or emitting an event.
    Accept,
}

impl std::str::FromStr for ToggleNoopPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject" => Ok(Self::Reject),
            "accept" => Ok(Self::Accept),
            other => Err(Error::Config(format!(
                "invalid toggle no-op policy '{other}', expected 'reject' or 'accept'"
            ))),
        }
    }
}

/// Attempt budget with exponential backoff for best-effort deliveries
/// (queue publish, downstream forward).
///
/// The default makes a single attempt, i.e. no retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl DeliveryPolicy {
    /// Policy making exactly `max_attempts` attempts with default backoff.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before the retry following failed attempt `attempt` (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay_ms as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt may follow `attempts_made` attempts.
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        let max = if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        };
        attempts_made < max
    }
}

/// Load a configuration file, or the defaults when no path is given.
///
/// Sections and fields absent from the file keep their defaults. A path that
/// does not exist is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) if p.exists() => load_config_file(p),
        Some(p) => Err(Error::Config(format!(
            "config file {} does not exist",
            p.display()
        ))),
        None => Ok(Config::default()),
    }
}

/// Reject a store and queue configured onto the same file.
///
/// Each carries its own migration history, so sharing one file would fail
/// on the second open.
pub fn ensure_distinct_paths(store: &Path, queue: &Path) -> Result<()> {
    let same_file = match (std::fs::canonicalize(store), std::fs::canonicalize(queue)) {
        (Ok(a), Ok(b)) => a == b,
        _ => store == queue,
    };
    if same_file {
        return Err(Error::Config(format!(
            "certificate store and queue must use different files, both point to {}",
            store.display()
        )));
    }
    Ok(())
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
