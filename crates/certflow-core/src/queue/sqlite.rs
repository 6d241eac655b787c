//! `SQLite`-backed queue log.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Publisher, QueueError, QueueMessage};
use crate::db::now_utc;

crate::define_database!(QueueDatabase, "Queue migrations complete");

/// Appends messages to a single topic/partition.
#[derive(Clone)]
pub struct TopicProducer {
    db: QueueDatabase,
    topic: String,
    partition: i64,
}

impl TopicProducer {
    pub fn new(db: QueueDatabase, topic: impl Into<String>, partition: i64) -> Self {
        Self {
            db,
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Release the queue connections held by this producer.
    pub async fn close(&self) {
        self.db.close().await;
        info!(topic = %self.topic, "Queue producer closed");
    }
}

impl Publisher for TopicProducer {
    async fn publish(&self, payload: &[u8]) -> Result<i64, QueueError> {
        let result = sqlx::query(
            "INSERT INTO queue_messages (topic, partition_id, payload, published_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.topic)
        .bind(self.partition)
        .bind(payload)
        .bind(now_utc())
        .execute(self.db.pool())
        .await
        .map_err(|e| QueueError::Publish(e.to_string()))?;

        let offset = result.last_insert_rowid();
        debug!(topic = %self.topic, partition = self.partition, offset, "Message published");
        Ok(offset)
    }
}

/// Reads one partition of a topic in offset order for a consumer group.
pub struct TopicReader {
    db: QueueDatabase,
    group_id: String,
    topic: String,
    partition: i64,
    /// Offset of the last message handed out by `next_message`.
    position: i64,
    poll_interval: Duration,
}

impl TopicReader {
    /// Open a reader positioned after the group's last committed offset.
    pub async fn open(
        db: QueueDatabase,
        group_id: impl Into<String>,
        topic: impl Into<String>,
        partition: i64,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let group_id = group_id.into();
        let topic = topic.into();

        let committed: Option<(i64,)> = sqlx::query_as(
            "SELECT committed_offset FROM queue_offsets WHERE group_id = ? AND topic = ? AND partition_id = ?",
        )
        .bind(&group_id)
        .bind(&topic)
        .bind(partition)
        .fetch_optional(db.pool())
        .await
        .map_err(|e| QueueError::Read(e.to_string()))?;

        let position = committed.map_or(0, |(offset,)| offset);
        info!(group_id = %group_id, topic = %topic, partition, position, "Queue reader opened");

        Ok(Self {
            db,
            group_id,
            topic,
            partition,
            position,
            poll_interval,
        })
    }

    /// Wait for the next message after the current position.
    ///
    /// Returns `Ok(None)` once `cancel` fires. The position advances as soon
    /// as a message is returned; call [`commit`](Self::commit) to make the
    /// acknowledgement durable.
    pub async fn next_message(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueMessage>, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let message = sqlx::query_as::<_, QueueMessage>(
                "SELECT msg_offset, topic, partition_id, payload, published_at FROM queue_messages \
                 WHERE topic = ? AND partition_id = ? AND msg_offset > ? \
                 ORDER BY msg_offset ASC LIMIT 1",
            )
            .bind(&self.topic)
            .bind(self.partition)
            .bind(self.position)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| QueueError::Read(e.to_string()))?;

            if let Some(message) = message {
                self.position = message.offset;
                return Ok(Some(message));
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancel.cancelled() => return Ok(None),
            }
        }
    }

    /// Durably acknowledge every message up to and including `offset`.
    pub async fn commit(&self, offset: i64) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO queue_offsets (group_id, topic, partition_id, committed_offset, committed_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (group_id, topic, partition_id) \
             DO UPDATE SET committed_offset = excluded.committed_offset, committed_at = excluded.committed_at",
        )
        .bind(&self.group_id)
        .bind(&self.topic)
        .bind(self.partition)
        .bind(offset)
        .bind(now_utc())
        .execute(self.db.pool())
        .await
        .map_err(|e| QueueError::Commit {
            offset,
            reason: e.to_string(),
        })?;

        Ok(())
    }

    /// Delete messages every consumer group of this topic/partition has
    /// committed past. Returns the number of rows removed.
    ///
    /// A group that first commits after a prune cannot read what was pruned.
    pub async fn prune_committed(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "DELETE FROM queue_messages WHERE topic = ? AND partition_id = ? AND msg_offset <= \
             (SELECT MIN(committed_offset) FROM queue_offsets WHERE topic = ? AND partition_id = ?)",
        )
        .bind(&self.topic)
        .bind(self.partition)
        .bind(&self.topic)
        .bind(self.partition)
        .execute(self.db.pool())
        .await
        .map_err(|e| QueueError::Prune(e.to_string()))?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!(
                topic = %self.topic,
                partition = self.partition,
                pruned,
                "Pruned committed messages"
            );
        }
        Ok(pruned)
    }

    /// Number of messages published after the current position.
    pub async fn lag(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM queue_messages WHERE topic = ? AND partition_id = ? AND msg_offset > ?",
        )
        .bind(&self.topic)
        .bind(self.partition)
        .bind(self.position)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| QueueError::Read(e.to_string()))?;

        Ok(count)
    }

    pub const fn position(&self) -> i64 {
        self.position
    }

    /// Release the queue connections held by this reader.
    pub async fn close(&self) {
        self.db.close().await;
        info!(group_id = %self.group_id, position = self.position, "Queue reader closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TOPIC: &str = "cert-active-status-toggled";

    async fn test_queue() -> QueueDatabase {
        QueueDatabase::open_in_memory().await.unwrap()
    }

    async fn reader(db: &QueueDatabase, group: &str) -> TopicReader {
        TopicReader::open(db.clone(), group, TOPIC, 0, Duration::from_millis(10))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn publish_assigns_increasing_offsets() {
        let db = test_queue().await;
        let producer = TopicProducer::new(db, TOPIC, 0);

        let first = producer.publish(b"a").await.unwrap();
        let second = producer.publish(b"b").await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn reader_returns_messages_in_offset_order() {
        let db = test_queue().await;
        let producer = TopicProducer::new(db.clone(), TOPIC, 0);
        for payload in [b"one".as_slice(), b"two", b"three"] {
            producer.publish(payload).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let mut reader = reader(&db, "g").await;
        let mut seen = Vec::new();
        for _ in 0..3 {
            let msg = reader.next_message(&cancel).await.unwrap().unwrap();
            seen.push(msg.payload);
        }
        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(reader.lag().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reader_ignores_other_partitions_and_topics() {
        let db = test_queue().await;
        TopicProducer::new(db.clone(), TOPIC, 1)
            .publish(b"other-partition")
            .await
            .unwrap();
        TopicProducer::new(db.clone(), "other-topic", 0)
            .publish(b"other-topic")
            .await
            .unwrap();
        TopicProducer::new(db.clone(), TOPIC, 0)
            .publish(b"mine")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut reader = reader(&db, "g").await;
        let msg = reader.next_message(&cancel).await.unwrap().unwrap();
        assert_eq!(msg.payload, b"mine");
        assert_eq!(msg.partition, 0);
        assert_eq!(msg.topic, TOPIC);
    }

    #[tokio::test]
    async fn committed_offset_survives_reopen() {
        let db = test_queue().await;
        let producer = TopicProducer::new(db.clone(), TOPIC, 0);
        producer.publish(b"first").await.unwrap();
        producer.publish(b"second").await.unwrap();

        let cancel = CancellationToken::new();
        let mut r = reader(&db, "relay").await;
        let first = r.next_message(&cancel).await.unwrap().unwrap();
        r.commit(first.offset).await.unwrap();
        drop(r);

        let mut reopened = reader(&db, "relay").await;
        assert_eq!(reopened.position(), first.offset);
        let next = reopened.next_message(&cancel).await.unwrap().unwrap();
        assert_eq!(next.payload, b"second");
    }

    #[tokio::test]
    async fn uncommitted_message_is_redelivered() {
        let db = test_queue().await;
        TopicProducer::new(db.clone(), TOPIC, 0)
            .publish(b"once")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut r = reader(&db, "relay").await;
        r.next_message(&cancel).await.unwrap().unwrap();
        drop(r);

        let mut again = reader(&db, "relay").await;
        let msg = again.next_message(&cancel).await.unwrap().unwrap();
        assert_eq!(msg.payload, b"once");
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let db = test_queue().await;
        TopicProducer::new(db.clone(), TOPIC, 0)
            .publish(b"shared")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut a = reader(&db, "a").await;
        let msg = a.next_message(&cancel).await.unwrap().unwrap();
        a.commit(msg.offset).await.unwrap();

        let mut b = reader(&db, "b").await;
        assert_eq!(b.position(), 0);
        assert!(b.next_message(&cancel).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn next_message_returns_none_on_cancel() {
        let db = test_queue().await;
        let cancel = CancellationToken::new();
        let mut r = reader(&db, "g").await;

        let waiter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            waiter.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), r.next_message(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn reader_picks_up_messages_published_while_waiting() {
        let db = test_queue().await;
        let cancel = CancellationToken::new();
        let mut r = reader(&db, "g").await;

        let producer = TopicProducer::new(db.clone(), TOPIC, 0);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            producer.publish(b"late").await.unwrap();
        });

        let msg = tokio::time::timeout(Duration::from_secs(2), r.next_message(&cancel))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"late");
    }

    async fn stored_offsets(db: &QueueDatabase) -> Vec<i64> {
        sqlx::query_as::<_, (i64,)>("SELECT msg_offset FROM queue_messages ORDER BY msg_offset")
            .fetch_all(db.pool())
            .await
            .unwrap()
            .into_iter()
            .map(|(offset,)| offset)
            .collect()
    }

    #[tokio::test]
    async fn prune_keeps_messages_until_every_group_commits() {
        let db = test_queue().await;
        let producer = TopicProducer::new(db.clone(), TOPIC, 0);
        let first = producer.publish(b"first").await.unwrap();
        let second = producer.publish(b"second").await.unwrap();

        let cancel = CancellationToken::new();
        let mut fast = reader(&db, "fast").await;
        let mut slow = reader(&db, "slow").await;

        // Nothing committed yet.
        assert_eq!(fast.prune_committed().await.unwrap(), 0);

        fast.next_message(&cancel).await.unwrap().unwrap();
        fast.next_message(&cancel).await.unwrap().unwrap();
        fast.commit(second).await.unwrap();
        slow.next_message(&cancel).await.unwrap().unwrap();
        slow.commit(first).await.unwrap();

        assert_eq!(fast.prune_committed().await.unwrap(), 1);
        assert_eq!(stored_offsets(&db).await, vec![second]);

        let msg = slow.next_message(&cancel).await.unwrap().unwrap();
        assert_eq!(msg.payload, b"second");
        slow.commit(second).await.unwrap();
        assert_eq!(slow.prune_committed().await.unwrap(), 1);
        assert!(stored_offsets(&db).await.is_empty());
    }

    #[tokio::test]
    async fn offsets_are_not_reused_after_prune() {
        let db = test_queue().await;
        let producer = TopicProducer::new(db.clone(), TOPIC, 0);
        let first = producer.publish(b"first").await.unwrap();

        let r = reader(&db, "g").await;
        r.commit(first).await.unwrap();
        r.prune_committed().await.unwrap();

        let next = producer.publish(b"next").await.unwrap();
        assert!(next > first);
    }

    #[tokio::test]
    async fn prune_leaves_other_partitions_alone() {
        let db = test_queue().await;
        TopicProducer::new(db.clone(), TOPIC, 1)
            .publish(b"other-partition")
            .await
            .unwrap();
        let mine = TopicProducer::new(db.clone(), TOPIC, 0)
            .publish(b"mine")
            .await
            .unwrap();

        let r = reader(&db, "g").await;
        r.commit(mine).await.unwrap();
        assert_eq!(r.prune_committed().await.unwrap(), 1);
        assert_eq!(stored_offsets(&db).await.len(), 1);
    }

    #[tokio::test]
    async fn publish_fails_after_close() {
        let db = test_queue().await;
        let producer = TopicProducer::new(db, TOPIC, 0);
        producer.close().await;

        let err = producer.publish(b"x").await.unwrap_err();
        assert!(matches!(err, QueueError::Publish(_)));
    }
}
