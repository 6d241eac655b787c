//! Queue consumer relaying toggle events downstream.
//!
//! A single reader pulls messages in offset order and hands each one to an
//! independent forward task. The offset is committed as soon as the forward
//! is dispatched: a failed forward is logged and dropped, never redelivered.
//! Forwards may therefore complete out of order.
//!
//! Messages every consumer group has committed are deleted from the queue
//! at most once per prune interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use certflow_core::DeliveryPolicy;
use certflow_core::queue::{QueueMessage, TopicReader};

use crate::forwarder::EventSink;
use crate::pool::{ForwardPermit, ForwardPool};

/// Pause after a failed queue read before polling again.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Default minimum time between queue prunes.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Counters reported when the consumer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages read from the queue and dispatched.
    pub received: u64,
    /// Forwards that got a downstream response.
    pub delivered: u64,
    /// Forwards dropped after exhausting their attempts.
    pub dropped: u64,
    /// Forwards still running when the drain timeout expired.
    pub abandoned: u64,
}

/// Reads toggle events and relays them through an [`EventSink`].
pub struct EventConsumer<S> {
    reader: TopicReader,
    sink: Arc<S>,
    pool: ForwardPool,
    policy: DeliveryPolicy,
    drain_timeout: Duration,
    prune_interval: Duration,
}

impl<S: EventSink> EventConsumer<S> {
    pub fn new(
        reader: TopicReader,
        sink: S,
        pool: ForwardPool,
        policy: DeliveryPolicy,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            sink: Arc::new(sink),
            pool,
            policy,
            drain_timeout,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
        }
    }

    /// Set how often fully committed messages are pruned. Zero prunes after
    /// every commit.
    #[must_use]
    pub const fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    /// Relay messages until `cancel` fires.
    ///
    /// On cancellation the loop stops reading, waits up to the drain timeout
    /// for in-flight forwards, aborts the rest and closes the reader.
    pub async fn run(mut self, cancel: CancellationToken) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let mut in_flight: JoinSet<bool> = JoinSet::new();
        let mut last_prune = Instant::now();

        info!(
            position = self.reader.position(),
            max_in_flight = self.pool.max_in_flight(),
            "Listening for messages"
        );

        loop {
            while let Some(done) = in_flight.try_join_next() {
                tally(&mut stats, done);
            }

            let message = match self.reader.next_message(&cancel).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read message");
                    tokio::select! {
                        () = tokio::time::sleep(READ_ERROR_BACKOFF) => continue,
                        () = cancel.cancelled() => break,
                    }
                }
            };

            info!(
                offset = message.offset,
                message = %String::from_utf8_lossy(&message.payload),
                "Received message"
            );

            let Some(permit) = self.permit(&cancel, message.offset).await else {
                break;
            };

            let offset = message.offset;
            in_flight.spawn(deliver(
                Arc::clone(&self.sink),
                message,
                self.policy.clone(),
                permit,
            ));
            stats.received += 1;

            if let Err(e) = self.reader.commit(offset).await {
                warn!(offset, error = %e, "Failed to commit offset");
            }

            if last_prune.elapsed() >= self.prune_interval {
                self.prune().await;
                last_prune = Instant::now();
            }
        }

        self.drain(&mut in_flight, &mut stats).await;
        self.prune().await;
        self.pool.close();
        self.reader.close().await;

        info!(
            received = stats.received,
            delivered = stats.delivered,
            dropped = stats.dropped,
            abandoned = stats.abandoned,
            "Consumer stopped"
        );
        stats
    }

    /// Take a forward permit, waiting for one when the pool is full.
    ///
    /// Waiting here is the backpressure: no further reads until a forward
    /// finishes. Returns `None` when the pool is closed or `cancel` fires.
    async fn permit(&self, cancel: &CancellationToken, offset: i64) -> Option<ForwardPermit> {
        if let Some(permit) = self.pool.try_acquire() {
            return Some(permit);
        }
        debug!(
            offset,
            in_flight = self.pool.in_flight(),
            available = self.pool.available_permits(),
            "Forward pool full, waiting"
        );

        tokio::select! {
            permit = self.pool.acquire() => match permit {
                Ok(permit) => Some(permit),
                Err(e) => {
                    error!(error = %e, "Forward pool unavailable");
                    None
                }
            },
            () = cancel.cancelled() => {
                debug!(offset, "Cancelled before dispatch, message left uncommitted");
                None
            }
        }
    }

    async fn prune(&self) {
        if let Err(e) = self.reader.prune_committed().await {
            warn!(error = %e, "Failed to prune committed messages");
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<bool>, stats: &mut ConsumerStats) {
        if in_flight.is_empty() {
            return;
        }
        info!(pending = in_flight.len(), "Draining in-flight forwards");

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(done) = in_flight.join_next().await {
                tally(stats, done);
            }
        })
        .await;

        if drained.is_err() {
            stats.abandoned = u64::try_from(in_flight.len()).unwrap_or(u64::MAX);
            warn!(abandoned = stats.abandoned, "Drain timeout expired, aborting forwards");
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }
}

fn tally(stats: &mut ConsumerStats, done: Result<bool, tokio::task::JoinError>) {
    match done {
        Ok(true) => stats.delivered += 1,
        Ok(false) => stats.dropped += 1,
        Err(e) => {
            error!(error = %e, "Forward task failed");
            stats.dropped += 1;
        }
    }
}

/// Forward one message, retrying per `policy`. Returns whether it was
/// delivered.
async fn deliver<S: EventSink>(
    sink: Arc<S>,
    message: QueueMessage,
    policy: DeliveryPolicy,
    _permit: ForwardPermit,
) -> bool {
    let offset = message.offset;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match sink.forward(&message.payload).await {
            Ok(status) => {
                debug!(offset, status, attempts, "Message forwarded");
                return true;
            }
            Err(e) if policy.should_retry(attempts) => {
                let delay = policy.delay_for_attempt(attempts - 1);
                warn!(
                    offset,
                    attempts,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Forward failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(offset, attempts, error = %e, "Failed to send notify, dropping message");
                return false;
            }
        }
    }
}
