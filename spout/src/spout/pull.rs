//! Pull loop: emit at most one record per invocation

use super::Spout;
use crate::backoff::should_backoff;
use crate::mapper::RecordMapper;
use crate::message::Message;
use crate::metrics::try_record_redelivered;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// What a single [`Spout::pull_once`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// A fresh message was mapped and emitted
    Emitted,
    /// A failed message was redelivered
    Redelivered,
    /// A redelivered message mapped to nothing and was acknowledged
    Dropped,
    /// The queue head is still backing off; the call slept instead
    BackedOff,
    /// Nothing to emit (timeout, receive error, or closed spout)
    Idle,
}

impl PullOutcome {
    pub fn emitted(self) -> bool {
        matches!(self, PullOutcome::Emitted | PullOutcome::Redelivered)
    }
}

impl<M: RecordMapper> Spout<M> {
    /// Emit at most one record
    ///
    /// Queued redeliveries take priority over fresh messages, and a call
    /// that looks at the redelivery queue never falls through to the
    /// source. Must not be called concurrently with itself.
    pub async fn pull_once(&self) -> PullOutcome {
        if self.is_closed() {
            return PullOutcome::Idle;
        }

        match self.queue.peek() {
            Some(head) => self.redeliver(head).await,
            None => self.pull_fresh().await,
        }
    }

    async fn redeliver(&self, head: Message) -> PullOutcome {
        let Some(record) = self.ledger.get(&head.id) else {
            // ledger cleared after it was queued
            debug!(spout = %self.spout_id, message_id = %head.id, "Discarding stale retry entry");
            self.queue.poll_if(&head.id);
            return PullOutcome::Idle;
        };

        let backoff = &self.config.backoff;
        if should_backoff(
            record.first_failure,
            record.retry_count,
            backoff.initial_delay,
            backoff.max_delay,
            Instant::now(),
        ) {
            tokio::time::sleep(backoff.initial_delay).await;
            return PullOutcome::BackedOff;
        }

        let Some(message) = self.queue.poll_if(&head.id) else {
            // acked while backoff was checked; the new head gets its own check
            return PullOutcome::Idle;
        };
        info!(
            spout = %self.spout_id,
            message_id = %message.id,
            retry_count = record.retry_count,
            "Retrying failed message"
        );
        try_record_redelivered(&self.spout_id);

        if self.map_and_emit(message).await {
            PullOutcome::Redelivered
        } else {
            PullOutcome::Dropped
        }
    }

    async fn pull_fresh(&self) -> PullOutcome {
        loop {
            let message = match self.source.receive(self.config.receive_timeout).await {
                Ok(Some(message)) => message,
                Ok(None) => return PullOutcome::Idle,
                Err(e) => {
                    error!(
                        spout = %self.spout_id,
                        topic = %self.subscription.topic,
                        error = %e,
                        "Error receiving message"
                    );
                    return PullOutcome::Idle;
                }
            };

            self.counters.record_received(message.payload_len());
            debug!(spout = %self.spout_id, message_id = %message.id, "Received message");

            if self.map_and_emit(message).await {
                return PullOutcome::Emitted;
            }
        }
    }

    /// Returns whether a record was emitted
    async fn map_and_emit(&self, message: Message) -> bool {
        let Some(record) = self.mapper.to_record(&message) else {
            debug!(spout = %self.spout_id, message_id = %message.id, "Mapper dropped message");
            self.acknowledge(&message, false).await;
            return false;
        };

        let id = message.id.clone();
        self.track_emitted();
        self.collector.emit(record, message).await;
        self.counters.record_emitted();
        debug!(spout = %self.spout_id, message_id = %id, "Emitted record");
        true
    }
}
