//! Message and sink record types.

use chrono::{DateTime, Utc};

/// Timestamp format used by the webhook and CSV sinks.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A message observed in a source chat.
///
/// Ids are monotonically increasing and unique per chat; a message is never
/// mutated after the adapter produces it.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    /// Chat the message was observed in (negative = group/channel).
    pub chat_id: i64,
    pub sender_id: i64,
    /// Text content; media-only messages have none.
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Format the timestamp the way the sinks expect it.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// One row committed by a push sink, built from a pushed message plus the
/// resolved chat title. Append-only; no dedup beyond arrival order.
#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub sender_id: i64,
    pub chat_title: String,
    pub text: String,
    pub timestamp: String,
}

impl SinkRecord {
    pub fn from_message(msg: &Message, chat_title: String) -> Self {
        Self {
            sender_id: msg.sender_id,
            chat_title,
            text: msg.text.clone().unwrap_or_default(),
            timestamp: msg.formatted_timestamp(),
        }
    }
}
