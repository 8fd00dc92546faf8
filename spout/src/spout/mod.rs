//! The spout - pulls, maps, and emits messages with bounded redelivery
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────── pull_once ────────────┐
//!                │                                   │
//! RedeliveryQueue ──(backoff elapsed)──┐             │
//!                                      ├─► mapper ──► Collector ──► host
//! MessageSource ──(receive, 100ms)─────┘                              │
//!      ▲                                                              │
//!      └──── acknowledge ◄── ack / fail ◄─────────────────────────────┘
//!                               │
//!                  RetryLedger ◄┴► RedeliveryQueue
//! ```
//!
//! The host calls [`Spout::pull_once`] from one task, one call at a time,
//! and [`Spout::ack`] / [`Spout::fail`] from any task. The ledger, queue and
//! pending-ack counter are the only state shared between the two.

mod completion;
mod pull;

pub use completion::{DeadLetterHook, FailOutcome};
pub use pull::PullOutcome;

use crate::collector::Collector;
use crate::config::SpoutConfig;
use crate::error::{Result, SpoutError};
use crate::ledger::{RetryLedger, RetryRecord};
use crate::mapper::RecordMapper;
use crate::message::MessageId;
use crate::metrics::{MetricsSnapshot, SpoutCounters};
use crate::redelivery::RedeliveryQueue;
use crate::source::{MessageSource, SharedSources, SourceConnector, Subscription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Pull-based spout with backoff-gated redelivery of failed messages
pub struct Spout<M: RecordMapper> {
    spout_id: String,
    config: SpoutConfig,
    subscription: Subscription,
    source: Arc<dyn MessageSource>,
    /// Set when the source came from a shared registry
    shared: Option<Arc<SharedSources>>,
    mapper: M,
    collector: Arc<dyn Collector<M::Record>>,
    dead_letter: Option<Arc<dyn DeadLetterHook>>,
    ledger: RetryLedger,
    queue: RedeliveryQueue,
    pending_acks: AtomicU64,
    counters: SpoutCounters,
    closed: AtomicBool,
}

/// Builder for [`Spout`]
pub struct SpoutBuilder<M: RecordMapper> {
    config: SpoutConfig,
    mapper: M,
    collector: Arc<dyn Collector<M::Record>>,
    dead_letter: Option<Arc<dyn DeadLetterHook>>,
    shared: Option<Arc<SharedSources>>,
}

impl<M: RecordMapper> SpoutBuilder<M> {
    /// Notify `hook` of messages dropped after exhausting their retries
    pub fn dead_letter(mut self, hook: Arc<dyn DeadLetterHook>) -> Self {
        self.dead_letter = Some(hook);
        self
    }

    /// Registry used when `shared_consumer` is set
    ///
    /// Defaults to [`SharedSources::global`].
    pub fn shared_sources(mut self, shared: Arc<SharedSources>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Validate the configuration and subscribe
    ///
    /// Subscription failures are fatal and come back as
    /// [`SpoutError::Init`].
    pub async fn open(self, connector: &dyn SourceConnector) -> Result<Spout<M>> {
        self.config.validate()?;

        let spout_id = self.config.spout_id();
        let subscription = self.config.subscription();

        let shared = self
            .config
            .shared_consumer
            .then(|| self.shared.unwrap_or_else(SharedSources::global));

        let subscribed = match &shared {
            Some(shared) => shared.acquire(&subscription, connector).await,
            None => connector.subscribe(&subscription).await,
        };
        let source = subscribed.map_err(|e| {
            error!(
                spout = %spout_id,
                topic = %subscription.topic,
                error = %e,
                "Error creating consumer"
            );
            SpoutError::init(&subscription.topic, &subscription.subscription, e)
        })?;

        info!(
            spout = %spout_id,
            topic = %subscription.topic,
            subscription = %subscription.subscription,
            shared = shared.is_some(),
            "Created consumer"
        );

        Ok(Spout {
            spout_id,
            config: self.config,
            subscription,
            source,
            shared,
            mapper: self.mapper,
            collector: self.collector,
            dead_letter: self.dead_letter,
            ledger: RetryLedger::new(),
            queue: RedeliveryQueue::new(),
            pending_acks: AtomicU64::new(0),
            counters: SpoutCounters::default(),
            closed: AtomicBool::new(false),
        })
    }
}

impl<M: RecordMapper> Spout<M> {
    /// Start building a spout
    pub fn builder(
        config: SpoutConfig,
        mapper: M,
        collector: Arc<dyn Collector<M::Record>>,
    ) -> SpoutBuilder<M> {
        SpoutBuilder {
            config,
            mapper,
            collector,
            dead_letter: None,
            shared: None,
        }
    }

    /// Open a spout with no dead-letter hook
    pub async fn open(
        config: SpoutConfig,
        connector: &dyn SourceConnector,
        mapper: M,
        collector: Arc<dyn Collector<M::Record>>,
    ) -> Result<Self> {
        Self::builder(config, mapper, collector)
            .open(connector)
            .await
    }

    /// Close the source and discard all retry state
    ///
    /// Always completes: close errors are logged, never returned. Calling
    /// it again is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(spout = %self.spout_id, topic = %self.subscription.topic, "Closing consumer");

        let closed = match &self.shared {
            Some(shared) => shared.release(&self.subscription).await.map(|_| ()),
            None => self.source.close().await,
        };
        if let Err(e) = closed {
            error!(
                spout = %self.spout_id,
                topic = %self.subscription.topic,
                error = %e,
                "Error closing consumer"
            );
        }

        let discarded = self.queue.clear();
        self.ledger.clear();
        debug!(spout = %self.spout_id, discarded, "Cleared retry state");
    }

    /// Snapshot metrics and start a new interval
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::new(
            self.ledger.len() as u64,
            self.pending_acks(),
            self.counters.take(),
            self.config.metrics_interval,
        )
    }

    pub fn spout_id(&self) -> &str {
        &self.spout_id
    }

    pub fn config(&self) -> &SpoutConfig {
        &self.config
    }

    /// Emitted records not yet acked or failed
    pub fn pending_acks(&self) -> u64 {
        self.pending_acks.load(Ordering::Acquire)
    }

    /// Messages currently tracked in the retry ledger
    pub fn pending_retries(&self) -> usize {
        self.ledger.len()
    }

    /// Messages waiting in the redelivery queue
    pub fn queued_retries(&self) -> usize {
        self.queue.len()
    }

    /// Retry record for `id`, if it has failed and is still tracked
    pub fn retry_record(&self, id: &MessageId) -> Option<RetryRecord> {
        self.ledger.get(id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn track_emitted(&self) {
        self.pending_acks.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement pending acks, never below zero
    fn release_pending(&self) {
        let released = self
            .pending_acks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if released.is_err() {
            debug!(spout = %self.spout_id, "Completion for a record that was not pending");
        }
    }
}
