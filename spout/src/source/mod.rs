//! Message source system
//!
//! A source is the client side of a pull-based subscription: it hands out
//! one message at a time, accepts acknowledgements, and is closed when the
//! spout shuts down. Connection setup lives behind [`SourceConnector`].
//!
//! # Example
//!
//! ```ignore
//! struct MyBrokerSource {
//!     consumer: MyConsumer,
//! }
//!
//! #[async_trait]
//! impl MessageSource for MyBrokerSource {
//!     fn name(&self) -> &'static str { "my-broker" }
//!
//!     async fn receive(&self, timeout: Duration) -> Result<Option<Message>, SourceError> {
//!         self.consumer.receive_timeout(timeout).await.map_err(|e| SourceError::Receive(e.to_string()))
//!     }
//!
//!     async fn acknowledge(&self, message: &Message) -> Result<(), SourceError> {
//!         self.consumer.ack(&message.id).await.map_err(|e| SourceError::Acknowledge(e.to_string()))
//!     }
//! }
//! ```

pub mod memory;
pub mod shared;

use crate::error::SourceError;
use crate::message::Message;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{MemoryConnector, MemorySource};
pub use shared::SharedSources;

/// Identifies a subscription on a source service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub service_url: String,
    pub topic: String,
    pub subscription: String,
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.service_url, self.topic, self.subscription)
    }
}

/// Pull-based message source
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name for identification and logging
    fn name(&self) -> &'static str;

    /// Wait up to `timeout` for the next message
    ///
    /// `Ok(None)` means nothing arrived in time; it is not an error.
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, SourceError>;

    /// Mark a message as durably processed so the source never redelivers it
    async fn acknowledge(&self, message: &Message) -> Result<(), SourceError>;

    /// Release the subscription
    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Establishes subscriptions
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Subscribe, returning a ready source
    async fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Result<Arc<dyn MessageSource>, SourceError>;
}
