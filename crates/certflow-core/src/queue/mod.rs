//! Durable, ordered message queue shared by the certificate service
//! (producer) and the notifier (consumer).
//!
//! The transport is an append-only log in a `SQLite` file opened in WAL mode,
//! so both processes can use it concurrently:
//! - [`TopicProducer`] appends to a fixed topic/partition and returns only
//!   after the row is committed.
//! - [`TopicReader`] reads one partition in offset order on behalf of a
//!   consumer group and resumes after the group's last committed offset.
//!
//! Delivery is at-least-once: a reader that stops between reading and
//! committing sees the message again on restart. Messages every group has
//! committed past are removed by [`TopicReader::prune_committed`].

mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};

pub use sqlite::{QueueDatabase, TopicProducer, TopicReader};

/// A message read from the queue.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct QueueMessage {
    #[sqlx(rename = "msg_offset")]
    pub offset: i64,
    pub topic: String,
    #[sqlx(rename = "partition_id")]
    pub partition: i64,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

/// Errors from the queue transport.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to open queue: {0}")]
    Open(#[from] crate::db::DatabaseError),

    #[error("Failed to publish message: {0}")]
    Publish(String),

    #[error("Failed to read message: {0}")]
    Read(String),

    #[error("Failed to prune committed messages: {0}")]
    Prune(String),

    #[error("Failed to commit offset {offset}: {reason}")]
    Commit { offset: i64, reason: String },
}

/// Producing side of the queue.
///
/// Implemented by [`TopicProducer`]; tests substitute their own
/// implementations to simulate broker failures.
pub trait Publisher: Send + Sync {
    /// Durably append `payload`, returning the assigned offset.
    fn publish(&self, payload: &[u8]) -> impl Future<Output = Result<i64, QueueError>> + Send;
}
