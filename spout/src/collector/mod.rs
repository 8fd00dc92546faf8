//! Output sink for emitted records
//!
//! The spout hands every record to a [`Collector`] together with the
//! originating [`Message`] as its correlation token. The host later passes
//! that token back to `Spout::ack` or `Spout::fail`.
//!
//! # Example
//!
//! ```ignore
//! struct BoltCollector {
//!     bolt: MyBolt,
//! }
//!
//! #[async_trait]
//! impl Collector<String> for BoltCollector {
//!     async fn emit(&self, record: String, token: Message) {
//!         self.bolt.execute(record, token).await;
//!     }
//! }
//! ```

pub mod stdout;

use crate::message::Message;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

pub use stdout::StdoutCollector;

/// Receives emitted records
#[async_trait]
pub trait Collector<R: Send + 'static>: Send + Sync {
    /// Hand a record downstream; `token` identifies it on ack/fail
    async fn emit(&self, record: R, token: Message);
}

/// A record together with its correlation token
#[derive(Debug, Clone)]
pub struct Emitted<R> {
    pub record: R,
    pub token: Message,
}

/// Forwards emitted records into a channel
pub struct ChannelCollector<R> {
    tx: mpsc::UnboundedSender<Emitted<R>>,
}

impl<R: Send + 'static> ChannelCollector<R> {
    /// Create a collector and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Emitted<R>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<R: Send + 'static> Collector<R> for ChannelCollector<R> {
    async fn emit(&self, record: R, token: Message) {
        let id = token.id.clone();
        if self.tx.send(Emitted { record, token }).is_err() {
            // receiver gone: the record is never acked, so the source will
            // redeliver it after a restart
            warn!(message_id = %id, "Collector channel closed, record not delivered");
        }
    }
}
