//! Redelivery queue
//!
//! FIFO holding area for messages that failed and are waiting for their
//! backoff to elapse. The completion path appends, and takes out messages
//! acked while queued. The pull loop only ever looks at and removes the
//! head.
//!
//! In-memory only. Messages queued here are lost on process restart, but
//! they were never acknowledged, so the source delivers them again.

use crate::message::{Message, MessageId};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Thread-safe FIFO of messages awaiting redelivery
#[derive(Debug, Default)]
pub struct RedeliveryQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl RedeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the tail
    pub fn offer(&self, message: Message) {
        self.messages.lock().push_back(message);
    }

    /// Look at the head without removing it
    pub fn peek(&self) -> Option<Message> {
        self.messages.lock().front().cloned()
    }

    /// Remove and return the head
    pub fn poll(&self) -> Option<Message> {
        self.messages.lock().pop_front()
    }

    /// Remove and return the head only if it is still `id`
    ///
    /// `remove` can take the head out between a `peek` and the matching
    /// poll, so the pull loop polls by the id it peeked.
    pub fn poll_if(&self, id: &MessageId) -> Option<Message> {
        let mut messages = self.messages.lock();
        if messages.front().is_some_and(|head| &head.id == id) {
            messages.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Remove every queued occurrence of `id`
    ///
    /// Used when a queued message is acknowledged before it is redelivered.
    pub fn remove(&self, id: &MessageId) -> bool {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|message| &message.id != id);
        messages.len() != before
    }

    /// Drop everything queued, returning how many messages were discarded
    pub fn clear(&self) -> usize {
        let mut messages = self.messages.lock();
        let discarded = messages.len();
        messages.clear();
        discarded
    }
}
