//! Message to record mapping
//!
//! The mapper turns a raw [`Message`] into zero or one application record.
//! Returning `None` drops the message: the spout acknowledges it right away
//! and never emits it.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use retry_spout::mapper::{FnMapper, RecordMapper};
//! use retry_spout::message::Message;
//!
//! let mapper = FnMapper::new(|msg: &Message| msg.payload_str().map(str::to_uppercase));
//! let msg = Message::new("t", Bytes::from("hello"));
//! assert_eq!(mapper.to_record(&msg), Some("HELLO".to_string()));
//! ```

use crate::message::Message;
use std::marker::PhantomData;

/// Converts messages into application records
pub trait RecordMapper: Send + Sync {
    /// Record handed to the collector
    type Record: Send + 'static;

    /// Map a message; `None` means drop and acknowledge
    fn to_record(&self, message: &Message) -> Option<Self::Record>;
}

/// Mapper built from a closure
pub struct FnMapper<F, R>
where
    F: Fn(&Message) -> Option<R> + Send + Sync,
{
    map_fn: F,
    _record: PhantomData<fn() -> R>,
}

impl<F, R> FnMapper<F, R>
where
    F: Fn(&Message) -> Option<R> + Send + Sync,
{
    pub fn new(map_fn: F) -> Self {
        Self {
            map_fn,
            _record: PhantomData,
        }
    }
}

impl<F, R> RecordMapper for FnMapper<F, R>
where
    F: Fn(&Message) -> Option<R> + Send + Sync,
    R: Send + 'static,
{
    type Record = R;

    fn to_record(&self, message: &Message) -> Option<R> {
        (self.map_fn)(message)
    }
}

/// Maps a UTF-8 payload to a `String`
///
/// Empty and non-UTF-8 payloads are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadMapper;

impl RecordMapper for PayloadMapper {
    type Record = String;

    fn to_record(&self, message: &Message) -> Option<String> {
        message
            .payload_str()
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }
}
