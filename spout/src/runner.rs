//! Runner - drives a spout until told to stop
//!
//! The runner is the host side of the spout: it calls `pull_once` in a loop
//! on one task, publishes a metrics snapshot every `metrics_interval` from a
//! background task, and shuts the spout down when the [`ShutdownHandle`]
//! fires.
//!
//! # Example
//!
//! ```ignore
//! let spout = Arc::new(Spout::open(config, &connector, mapper, collector).await?);
//! let (handle, runner) = SpoutRunner::new(Arc::clone(&spout));
//!
//! tokio::spawn(async move {
//!     shutdown_signal().await;
//!     handle.shutdown();
//! });
//!
//! let stats = runner.run().await;
//! ```

use crate::mapper::RecordMapper;
use crate::metrics::Metrics;
use crate::spout::{PullOutcome, Spout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Stops a running [`SpoutRunner`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the runner to stop after the pull in progress
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// What the pull loop did over the runner's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub pulls: u64,
    pub emitted: u64,
    pub redelivered: u64,
    pub dropped: u64,
    pub backed_off: u64,
}

impl RunStats {
    fn record(&mut self, outcome: PullOutcome) {
        self.pulls += 1;
        match outcome {
            PullOutcome::Emitted => self.emitted += 1,
            PullOutcome::Redelivered => self.redelivered += 1,
            PullOutcome::Dropped => self.dropped += 1,
            PullOutcome::BackedOff => self.backed_off += 1,
            PullOutcome::Idle => {}
        }
    }
}

/// Pull loop plus metrics reporter for one spout
pub struct SpoutRunner<M: RecordMapper> {
    spout: Arc<Spout<M>>,
    shutdown: watch::Receiver<bool>,
}

impl<M: RecordMapper + 'static> SpoutRunner<M> {
    pub fn new(spout: Arc<Spout<M>>) -> (ShutdownHandle, Self) {
        let (tx, rx) = watch::channel(false);
        let handle = ShutdownHandle { tx: Arc::new(tx) };
        (handle, Self { spout, shutdown: rx })
    }

    /// Pull until shutdown, then shut the spout down
    ///
    /// The shutdown flag is checked between pulls, so an in-progress
    /// receive or backoff sleep always completes first.
    pub async fn run(self) -> RunStats {
        let spout_id = self.spout.spout_id().to_string();
        let interval = self.spout.config().metrics_interval;
        info!(
            spout = %spout_id,
            metrics_interval_secs = interval.as_secs(),
            "Spout runner started"
        );

        let reporter = spawn_reporter(Arc::clone(&self.spout), interval, self.shutdown.clone());

        let mut stats = RunStats::default();
        while !*self.shutdown.borrow() {
            let outcome = self.spout.pull_once().await;
            stats.record(outcome);
            if outcome == PullOutcome::Idle {
                // a zero receive timeout would otherwise spin
                tokio::task::yield_now().await;
            }
        }

        reporter.abort();
        self.spout.shutdown().await;

        info!(
            spout = %spout_id,
            pulls = stats.pulls,
            emitted = stats.emitted,
            redelivered = stats.redelivered,
            "Spout runner stopped"
        );
        stats
    }
}

fn spawn_reporter<M: RecordMapper + 'static>(
    spout: Arc<Spout<M>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => report(&spout),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(spout = %spout.spout_id(), "Metrics reporter stopping");
                        return;
                    }
                }
            }
        }
    })
}

fn report<M: RecordMapper>(spout: &Spout<M>) {
    let snapshot = spout.metrics_snapshot();
    if let Some(metrics) = Metrics::get() {
        metrics.publish(spout.spout_id(), &snapshot);
    }
    info!(spout = %spout.spout_id(), metrics = %snapshot.to_json(), "Spout metrics");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collector::ChannelCollector;
    use crate::config::SpoutConfig;
    use crate::mapper::PayloadMapper;
    use crate::source::{MemoryConnector, MemorySource};

    async fn open_spout(
        config: SpoutConfig,
    ) -> (
        Arc<Spout<PayloadMapper>>,
        Arc<MemorySource>,
        tokio::sync::mpsc::UnboundedReceiver<crate::collector::Emitted<String>>,
    ) {
        let source = Arc::new(MemorySource::new("events"));
        let connector = MemoryConnector::new(Arc::clone(&source));
        let (collector, rx) = ChannelCollector::new();
        let spout = Spout::open(config, &connector, PayloadMapper, Arc::new(collector))
            .await
            .unwrap();
        (Arc::new(spout), source, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_emits_until_shutdown() {
        let (spout, source, mut rx) = open_spout(SpoutConfig::default()).await;
        for i in 0..3 {
            source.publish_payload(&format!("m-{i}"), "payload");
        }
        let (handle, runner) = SpoutRunner::new(Arc::clone(&spout));

        let drive = async {
            for _ in 0..3 {
                let emitted = rx.recv().await.unwrap();
                spout.ack(emitted.token).await;
            }
            handle.shutdown();
        };
        let (stats, ()) = tokio::join!(runner.run(), drive);

        assert_eq!(stats.emitted, 3);
        assert!(spout.is_closed());
        assert!(source.is_closed());
        assert_eq!(source.ack_count(), 3);
        assert_eq!(spout.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_redelivers_failed_records() {
        let (spout, source, mut rx) = open_spout(SpoutConfig::default()).await;
        source.publish_payload("m-1", "payload");
        let (handle, runner) = SpoutRunner::new(Arc::clone(&spout));

        let drive = async {
            let first = rx.recv().await.unwrap();
            spout.fail(first.token).await;
            let second = rx.recv().await.unwrap();
            assert_eq!(second.token.id.as_str(), "m-1");
            spout.ack(second.token).await;
            handle.shutdown();
        };
        let (stats, ()) = tokio::join!(runner.run(), drive);

        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.redelivered, 1);
        assert_eq!(spout.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_resets_interval_counters() {
        let config = SpoutConfig {
            metrics_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let (spout, source, mut rx) = open_spout(config).await;
        source.publish_payload("m-1", "payload");
        let (handle, runner) = SpoutRunner::new(Arc::clone(&spout));

        let drive = async {
            let emitted = rx.recv().await.unwrap();
            spout.ack(emitted.token).await;
            tokio::time::sleep(Duration::from_millis(1500)).await;
            handle.shutdown();
        };
        tokio::join!(runner.run(), drive);

        let snapshot = spout.metrics_snapshot();
        assert_eq!(snapshot.received_count, 0);
        assert_eq!(snapshot.emitted_count, 0);
    }

    #[test]
    fn test_shutdown_handle() {
        let (tx, _rx) = watch::channel(false);
        let handle = ShutdownHandle { tx: Arc::new(tx) };
        assert!(!handle.is_shutdown());

        handle.clone().shutdown();
        assert!(handle.is_shutdown());
    }
}
