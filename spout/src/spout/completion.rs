//! Completion handling: ack and fail
//!
//! `fail` decides between requeueing and terminal drop. A message is
//! retryable while both limits hold:
//!
//! - less than `failed_retries_timeout` has passed since its first failure
//! - its `retry_count` is below `max_failed_retries`
//!
//! Either limit may be disabled with `None`. A message that is not
//! retryable is acknowledged so the source never redelivers it.

use super::Spout;
use crate::ledger::RetryRecord;
use crate::mapper::RecordMapper;
use crate::message::Message;
use crate::metrics::try_record_dropped;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Receives messages dropped after exhausting their retry budget
///
/// Called before the drop is acknowledged to the source.
#[async_trait]
pub trait DeadLetterHook: Send + Sync {
    async fn dead_letter(&self, message: &Message, record: &RetryRecord);
}

/// Result of [`Spout::fail`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Queued for redelivery; `attempt` counts failures so far
    Requeued { attempt: u32 },
    /// Retry budget exhausted; acknowledged and forgotten
    Dropped,
}

impl<M: RecordMapper> Spout<M> {
    /// Report successful processing of an emitted record
    pub async fn ack(&self, token: Message) {
        self.acknowledge(&token, true).await;
    }

    /// Report failed processing of an emitted record
    ///
    /// Call at most once per emission: every call counts as a failure.
    pub async fn fail(&self, token: Message) -> FailOutcome {
        warn!(spout = %self.spout_id, message_id = %token.id, "Failed to process message");

        let record = self.ledger.record_failure(&token.id);

        if self.is_retryable(&record) {
            info!(
                spout = %self.spout_id,
                message_id = %token.id,
                retry_count = record.retry_count,
                "Putting message in retry queue"
            );
            self.queue.offer(token);
            self.release_pending();
            return FailOutcome::Requeued {
                attempt: record.retry_count.saturating_add(1),
            };
        }

        warn!(
            spout = %self.spout_id,
            message_id = %token.id,
            retry_count = record.retry_count,
            elapsed_ms = record.first_failure.elapsed().as_millis() as u64,
            "Retry budget exhausted, dropping message"
        );
        if let Some(hook) = &self.dead_letter {
            hook.dead_letter(&token, &record).await;
        }
        try_record_dropped(&self.spout_id, "retries_exhausted");
        self.acknowledge(&token, true).await;
        FailOutcome::Dropped
    }

    fn is_retryable(&self, record: &RetryRecord) -> bool {
        let within_timeout = self
            .config
            .failed_retries_timeout
            .is_none_or(|timeout| record.first_failure.elapsed() < timeout);
        let within_count = self
            .config
            .max_failed_retries
            .is_none_or(|max| record.retry_count < max);
        within_timeout && within_count
    }

    /// Acknowledge to the source and forget the message
    ///
    /// A message acked while waiting for redelivery is taken out of the
    /// queue as well. Its pending ack was already released by `fail`, so it
    /// is not released again.
    ///
    /// `in_flight` is false for messages the mapper dropped before they
    /// were ever emitted.
    pub(super) async fn acknowledge(&self, message: &Message, in_flight: bool) {
        if let Err(e) = self.source.acknowledge(message).await {
            warn!(
                spout = %self.spout_id,
                message_id = %message.id,
                error = %e,
                "Error acknowledging message"
            );
        }
        // queue first, so the pull loop never sees a queued head without a record
        let was_queued = self.queue.remove(&message.id);
        self.ledger.remove(&message.id);
        if was_queued {
            debug!(spout = %self.spout_id, message_id = %message.id, "Acked while queued for retry");
        } else if in_flight {
            self.release_pending();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collector::{ChannelCollector, Emitted};
    use crate::config::SpoutConfig;
    use crate::mapper::PayloadMapper;
    use crate::source::{MemoryConnector, MemorySource};
    use crate::spout::PullOutcome;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingHook {
        seen: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl DeadLetterHook for RecordingHook {
        async fn dead_letter(&self, message: &Message, record: &RetryRecord) {
            self.seen
                .lock()
                .push((message.id.to_string(), record.retry_count));
        }
    }

    async fn open_spout(
        config: SpoutConfig,
        hook: Option<Arc<RecordingHook>>,
    ) -> (
        Spout<PayloadMapper>,
        Arc<MemorySource>,
        mpsc::UnboundedReceiver<Emitted<String>>,
    ) {
        let source = Arc::new(MemorySource::new("events"));
        let connector = MemoryConnector::new(Arc::clone(&source));
        let (collector, rx) = ChannelCollector::new();
        let mut builder = Spout::builder(config, PayloadMapper, Arc::new(collector));
        if let Some(hook) = hook {
            builder = builder.dead_letter(hook);
        }
        let spout = builder.open(&connector).await.unwrap();
        (spout, source, rx)
    }

    async fn emit_one(
        spout: &Spout<PayloadMapper>,
        source: &MemorySource,
        rx: &mut mpsc::UnboundedReceiver<Emitted<String>>,
        id: &str,
    ) -> Message {
        source.publish_payload(id, "payload");
        assert!(spout.pull_once().await.emitted());
        rx.recv().await.unwrap().token
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_acknowledges_and_releases() {
        let (spout, source, mut rx) = open_spout(SpoutConfig::default(), None).await;
        let token = emit_one(&spout, &source, &mut rx, "m-1").await;
        assert_eq!(spout.pending_acks(), 1);

        spout.ack(token.clone()).await;

        assert!(source.is_acked(&token.id));
        assert_eq!(spout.pending_acks(), 0);
        assert!(spout.retry_record(&token.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_untracked_message_is_harmless() {
        let (spout, source, _rx) = open_spout(SpoutConfig::default(), None).await;
        let stranger = Message::with_id("never-emitted", "events", "x".into());

        spout.ack(stranger.clone()).await;

        assert!(source.is_acked(&stranger.id));
        assert_eq!(spout.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_requeues_and_releases_pending() {
        let (spout, source, mut rx) = open_spout(SpoutConfig::default(), None).await;
        let token = emit_one(&spout, &source, &mut rx, "m-1").await;

        let outcome = spout.fail(token.clone()).await;

        assert_eq!(outcome, FailOutcome::Requeued { attempt: 1 });
        assert_eq!(spout.pending_acks(), 0);
        assert_eq!(spout.queued_retries(), 1);
        assert_eq!(spout.retry_record(&token.id).unwrap().retry_count, 0);
        assert!(!source.is_acked(&token.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_of_queued_message_keeps_other_pending() {
        let (spout, source, mut rx) = open_spout(SpoutConfig::default(), None).await;
        let a = emit_one(&spout, &source, &mut rx, "m-a").await;
        let b = emit_one(&spout, &source, &mut rx, "m-b").await;

        spout.fail(a.clone()).await;
        assert_eq!(spout.pending_acks(), 1);

        spout.ack(a.clone()).await;

        assert!(source.is_acked(&a.id));
        assert_eq!(spout.queued_retries(), 0);
        // `b` is still in flight
        assert_eq!(spout.pending_acks(), 1);

        spout.ack(b).await;
        assert_eq!(spout.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_after_redelivery_releases() {
        let (spout, source, mut rx) = open_spout(SpoutConfig::default(), None).await;
        let a = emit_one(&spout, &source, &mut rx, "m-a").await;
        spout.fail(a).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(spout.pull_once().await, PullOutcome::Redelivered);
        let a = rx.recv().await.unwrap().token;
        assert_eq!(spout.pending_acks(), 1);

        spout.ack(a).await;
        assert_eq!(spout.pending_acks(), 0);
        assert_eq!(spout.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_drops_and_notifies_hook() {
        let config = SpoutConfig {
            failed_retries_timeout: None,
            max_failed_retries: Some(1),
            ..Default::default()
        };
        let hook = Arc::new(RecordingHook::default());
        let (spout, source, mut rx) = open_spout(config, Some(Arc::clone(&hook))).await;
        let token = emit_one(&spout, &source, &mut rx, "m-1").await;

        assert_eq!(
            spout.fail(token.clone()).await,
            FailOutcome::Requeued { attempt: 1 }
        );

        // wait out the backoff and redeliver
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(spout.pull_once().await, PullOutcome::Redelivered);
        let token = rx.recv().await.unwrap().token;

        assert_eq!(spout.fail(token.clone()).await, FailOutcome::Dropped);
        assert!(source.is_acked(&token.id));
        assert_eq!(spout.pending_acks(), 0);
        assert_eq!(spout.pending_retries(), 0);
        assert_eq!(hook.seen.lock().as_slice(), &[("m-1".to_string(), 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_message() {
        let config = SpoutConfig {
            failed_retries_timeout: Some(Duration::from_secs(5)),
            max_failed_retries: None,
            ..Default::default()
        };
        let (spout, source, mut rx) = open_spout(config, None).await;
        let token = emit_one(&spout, &source, &mut rx, "m-1").await;

        assert!(matches!(
            spout.fail(token.clone()).await,
            FailOutcome::Requeued { .. }
        ));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(spout.pull_once().await, PullOutcome::Redelivered);
        let token = rx.recv().await.unwrap().token;

        assert_eq!(spout.fail(token.clone()).await, FailOutcome::Dropped);
        assert!(source.is_acked(&token.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_drops_on_first_failure() {
        let config = SpoutConfig {
            failed_retries_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        let (spout, source, mut rx) = open_spout(config, None).await;
        let token = emit_one(&spout, &source, &mut rx, "m-1").await;

        assert_eq!(spout.fail(token).await, FailOutcome::Dropped);
        assert_eq!(spout.queued_retries(), 0);
        assert_eq!(spout.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_retries_keep_requeueing() {
        let config = SpoutConfig {
            failed_retries_timeout: None,
            max_failed_retries: None,
            ..Default::default()
        };
        let (spout, source, mut rx) = open_spout(config, None).await;
        let mut token = emit_one(&spout, &source, &mut rx, "m-1").await;

        for attempt in 1..=5 {
            assert_eq!(
                spout.fail(token.clone()).await,
                FailOutcome::Requeued { attempt }
            );
            // longest backoff here is 100ms * 2^4
            tokio::time::sleep(Duration::from_secs(2)).await;
            assert_eq!(spout.pull_once().await, PullOutcome::Redelivered);
            token = rx.recv().await.unwrap().token;
        }
        assert_eq!(spout.retry_record(&token.id).unwrap().retry_count, 4);
    }
}
