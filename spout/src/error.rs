//! Error types for the retry spout

use thiserror::Error;

/// Result type alias for spout operations
pub type Result<T> = std::result::Result<T, SpoutError>;

/// Main error type for the spout
#[derive(Error, Debug)]
pub enum SpoutError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Subscription could not be established at open time (fatal)
    #[error("failed to initialize consumer for {topic}-{subscription}: {message}")]
    Init {
        topic: String,
        subscription: String,
        message: String,
    },

    /// Source client error
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Error type for message source operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Could not reach the service
    #[error("connection error: {0}")]
    Connection(String),

    /// Subscription setup failed
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Receive failed
    #[error("receive failed: {0}")]
    Receive(String),

    /// Acknowledge failed
    #[error("acknowledge failed: {0}")]
    Acknowledge(String),

    /// Close failed
    #[error("close failed: {0}")]
    Close(String),

    /// Source already closed
    #[error("source closed")]
    Closed,
}

impl SpoutError {
    /// Build an initialization error for a topic/subscription pair
    pub fn init(topic: &str, subscription: &str, cause: impl std::fmt::Display) -> Self {
        SpoutError::Init {
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            message: cause.to_string(),
        }
    }
}
