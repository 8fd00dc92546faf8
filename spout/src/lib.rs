//! Retry spout - pull-based message consumption with bounded redelivery
//!
//! A spout pulls messages from a source, maps each one to a record, and
//! emits it to the host's collector. The host later reports every record
//! back as acked or failed. Failed messages are redelivered with
//! exponential backoff until a retry timeout or retry count runs out, at
//! which point they are acknowledged and dropped.
//!
//! # Architecture
//!
//! ```text
//! MessageSource ──► Spout (ledger, redelivery queue) ──► Collector ──► host
//!                     ▲                                               │
//!                     └──────────────── ack / fail ◄──────────────────┘
//! ```
//!
//! Sources, mappers and collectors are pluggable via traits.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod backoff;
pub mod collector;
pub mod config;
pub mod error;
pub mod ledger;
pub mod mapper;
pub mod message;
pub mod metrics;
pub mod metrics_server;
pub mod redelivery;
pub mod runner;
pub mod source;
pub mod spout;

pub use collector::{ChannelCollector, Collector, Emitted, StdoutCollector};
pub use config::SpoutConfig;
pub use error::{Result, SourceError, SpoutError};
pub use mapper::{FnMapper, PayloadMapper, RecordMapper};
pub use message::{Message, MessageId};
pub use metrics::MetricsSnapshot;
pub use runner::{RunStats, ShutdownHandle, SpoutRunner};
pub use source::{MemoryConnector, MemorySource, MessageSource, SourceConnector, Subscription};
pub use spout::{DeadLetterHook, FailOutcome, PullOutcome, Spout, SpoutBuilder};
