//! Downstream delivery of toggle events.
//!
//! Events are relayed as-is: the request body is the queue message payload,
//! POSTed to `{endpoint}/cert-active-status-toggled`. Any HTTP response counts
//! as delivered and only its status code is logged; transport failures are
//! errors.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// Path appended to the configured endpoint.
pub const FORWARD_PATH: &str = "/cert-active-status-toggled";

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to POST event to {url}: {reason}")]
    Request { url: String, reason: String },
}

/// Destination for relayed events.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one payload, returning the downstream status code.
    fn forward(&self, payload: &[u8]) -> impl Future<Output = Result<u16, ForwardError>> + Send;
}

/// Forwards events over HTTP.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    http: reqwest::Client,
    url: String,
}

impl HttpForwarder {
    /// Build a forwarder for `endpoint`.
    ///
    /// `timeout` bounds each request end to end; `None` leaves requests
    /// unbounded.
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self, ForwardError> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            url: forward_url(endpoint),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventSink for HttpForwarder {
    async fn forward(&self, payload: &[u8]) -> Result<u16, ForwardError> {
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| ForwardError::Request {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            info!(status = status.as_u16(), "Got status code");
        } else {
            warn!(
                status = status.as_u16(),
                reason = status.canonical_reason().unwrap_or("Unknown"),
                "Got non-success status code"
            );
        }
        Ok(status.as_u16())
    }
}

fn forward_url(endpoint: &str) -> String {
    format!("{}{FORWARD_PATH}", endpoint.trim_end_matches('/'))
}
