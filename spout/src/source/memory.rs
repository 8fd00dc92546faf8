//! In-memory message source
//!
//! Backed by an unbounded tokio channel. Useful for tests, demos, and as a
//! reference for writing real sources: it honours the receive timeout,
//! records every acknowledgement, and can be told to fail the next receive.

use crate::error::SourceError;
use crate::message::{Message, MessageId};
use crate::source::{MessageSource, SourceConnector, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// In-memory source
pub struct MemorySource {
    topic: String,
    tx: mpsc::UnboundedSender<Message>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    acked: Mutex<Vec<MessageId>>,
    receive_errors: Mutex<VecDeque<SourceError>>,
    closed: AtomicBool,
    close_calls: AtomicU64,
}

impl MemorySource {
    pub fn new(topic: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            topic: topic.into(),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            acked: Mutex::new(Vec::new()),
            receive_errors: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Make a message available to the next receive
    pub fn publish(&self, message: Message) {
        // rx lives as long as self, so the send cannot fail
        let _ = self.tx.send(message);
    }

    /// Publish a payload under an explicit id, returning the message
    pub fn publish_payload(&self, id: &str, payload: impl Into<Bytes>) -> Message {
        let message = Message::with_id(id, self.topic.clone(), payload.into());
        self.publish(message.clone());
        message
    }

    /// Fail the next receive with `error`
    pub fn fail_next_receive(&self, error: SourceError) {
        self.receive_errors.lock().push_back(error);
    }

    /// Ids acknowledged so far, in order
    pub fn acked_ids(&self) -> Vec<MessageId> {
        self.acked.lock().clone()
    }

    pub fn ack_count(&self) -> usize {
        self.acked.lock().len()
    }

    pub fn is_acked(&self, id: &MessageId) -> bool {
        self.acked.lock().contains(id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// How many times `close` was called
    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, SourceError> {
        if self.is_closed() {
            return Err(SourceError::Closed);
        }
        if let Some(error) = self.receive_errors.lock().pop_front() {
            return Err(error);
        }

        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(message) => Ok(message),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn acknowledge(&self, message: &Message) -> Result<(), SourceError> {
        if self.is_closed() {
            return Err(SourceError::Closed);
        }
        debug!(topic = %self.topic, message_id = %message.id, "Acknowledged");
        self.acked.lock().push(message.id.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Connector handing out a fixed in-memory source
pub struct MemoryConnector {
    source: Option<Arc<MemorySource>>,
    failure: Option<SourceError>,
    subscribe_calls: AtomicU64,
}

impl MemoryConnector {
    /// Every subscription resolves to `source`
    pub fn new(source: Arc<MemorySource>) -> Self {
        Self {
            source: Some(source),
            failure: None,
            subscribe_calls: AtomicU64::new(0),
        }
    }

    /// Every subscription fails with `error`
    pub fn failing(error: SourceError) -> Self {
        Self {
            source: None,
            failure: Some(error),
            subscribe_calls: AtomicU64::new(0),
        }
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    async fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Result<Arc<dyn MessageSource>, SourceError> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        debug!(%subscription, "Subscribing to in-memory source");

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        match &self.source {
            Some(source) => Ok(Arc::clone(source) as Arc<dyn MessageSource>),
            None => Err(SourceError::Connection("no source configured".to_string())),
        }
    }
}
