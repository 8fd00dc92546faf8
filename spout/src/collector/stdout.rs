//! Stdout collector for debugging
//!
//! Prints emitted records to stdout in a human-readable format.

use crate::collector::Collector;
use crate::message::Message;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stdout collector - prints records for debugging
pub struct StdoutCollector {
    /// Multi-line output
    pretty: bool,
    /// Count of records emitted
    emitted_count: AtomicU64,
}

impl StdoutCollector {
    pub fn new() -> Self {
        Self {
            pretty: false,
            emitted_count: AtomicU64::new(0),
        }
    }

    pub fn pretty() -> Self {
        Self {
            pretty: true,
            emitted_count: AtomicU64::new(0),
        }
    }

    /// Total records emitted
    pub fn emitted_count(&self) -> u64 {
        self.emitted_count.load(Ordering::Relaxed)
    }
}

impl Default for StdoutCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> Collector<R> for StdoutCollector
where
    R: Debug + Send + 'static,
{
    async fn emit(&self, record: R, token: Message) {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();

        if self.pretty {
            writeln!(
                stdout,
                "┌─ Record ────────────────────────────────────────────",
            )
            .ok();
            writeln!(stdout, "│ Message:   {}", token.id).ok();
            writeln!(stdout, "│ Topic:     {}", token.topic).ok();
            writeln!(stdout, "│ Published: {} ns", token.publish_time).ok();
            if !token.properties.is_empty() {
                writeln!(stdout, "│ Props:     {:?}", token.properties).ok();
            }
            writeln!(stdout, "│ Record:    {record:?}").ok();
            writeln!(
                stdout,
                "└─────────────────────────────────────────────────────",
            )
            .ok();
        } else {
            writeln!(stdout, "[{}] {}: {record:?}", token.topic, token.id).ok();
        }

        self.emitted_count.fetch_add(1, Ordering::Relaxed);
    }
}
