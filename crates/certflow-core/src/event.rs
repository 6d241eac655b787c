//! Certificate state-toggle event, the only message exchanged between the
//! certificate service and the notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic every toggle event is published to.
pub const CERT_TOGGLED_TOPIC: &str = "cert-active-status-toggled";

/// Partition every toggle event is published to. One partition keeps a
/// total order between producer and consumer.
pub const CERT_TOGGLED_PARTITION: i64 = 0;

/// Emitted when a certificate's active flag changes (or is created active).
///
/// Serialized as `{"uuid": ..., "active": ..., "updated_at": <RFC3339>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertToggleEvent {
    pub uuid: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl CertToggleEvent {
    /// Build an event stamped with the current time.
    pub fn now(uuid: impl Into<String>, active: bool) -> Self {
        Self {
            uuid: uuid.into(),
            active,
            updated_at: crate::db::now_utc(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
