//! Retry ledger
//!
//! Remembers, per message id, when the message first failed and how many
//! times it has failed since. An id has an entry exactly while the message
//! has failed at least once and has not yet been acknowledged or dropped.
//!
//! Thread-safe using a parking_lot mutex; the completion path and the pull
//! loop may touch it from different tasks.

use crate::message::MessageId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

/// Retry bookkeeping for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRecord {
    /// When the message first failed; never changes afterwards
    pub first_failure: Instant,
    /// Failures recorded after the first one
    pub retry_count: u32,
}

impl RetryRecord {
    fn new(now: Instant) -> Self {
        Self {
            first_failure: now,
            retry_count: 0,
        }
    }
}

/// Map from message id to retry record
#[derive(Debug, Default)]
pub struct RetryLedger {
    records: Mutex<HashMap<MessageId, RetryRecord>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure of `id` and return the updated record
    ///
    /// The first failure creates a record with `retry_count = 0` stamped
    /// with the current time; each later failure increments the count.
    pub fn record_failure(&self, id: &MessageId) -> RetryRecord {
        self.record_failure_at(id, Instant::now())
    }

    /// [`record_failure`](Self::record_failure) with an explicit clock
    pub fn record_failure_at(&self, id: &MessageId, now: Instant) -> RetryRecord {
        let mut records = self.records.lock();
        match records.get_mut(id) {
            Some(record) => {
                record.retry_count = record.retry_count.saturating_add(1);
                *record
            }
            None => {
                let record = RetryRecord::new(now);
                records.insert(id.clone(), record);
                record
            }
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<RetryRecord> {
        self.records.lock().get(id).copied()
    }

    /// Forget `id`; no-op if it was never tracked
    pub fn remove(&self, id: &MessageId) -> Option<RetryRecord> {
        self.records.lock().remove(id)
    }

    /// Number of messages currently tracked
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}
