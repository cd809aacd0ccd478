//! Forwarding cursor - per-source progress marker.

use crate::forwarder::client::{ChatClient, ClientError};

/// Tracks the last processed message id for one source chat.
///
/// The cursor is the sole dedup mechanism: fetches use a strictly
/// greater-than bound, so a message with id <= `last_seen_id` is never
/// refetched. `last_seen_id` never decreases.
#[derive(Debug)]
pub struct ForwardingCursor {
    chat_id: i64,
    last_seen_id: i64,
}

impl ForwardingCursor {
    /// Seed a cursor from the most recent existing message in `chat_id`,
    /// so the historical backlog is not replayed.
    ///
    /// Fails with [`ClientError::EmptyChat`] when a history-capable
    /// transport reports the chat as having no messages; the caller decides
    /// whether that is fatal. Transports without a history view seed at 0
    /// (see [`ChatClient::latest_message_id`]).
    pub async fn initialize(
        client: &dyn ChatClient,
        chat_id: i64,
    ) -> Result<Self, ClientError> {
        let last_seen_id = client.latest_message_id(chat_id).await?;
        Ok(Self { chat_id, last_seen_id })
    }

    #[cfg(test)]
    pub fn at(chat_id: i64, last_seen_id: i64) -> Self {
        Self { chat_id, last_seen_id }
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn last_seen_id(&self) -> i64 {
        self.last_seen_id
    }

    /// Advance past `candidate_id`. Never regresses.
    pub fn advance(&mut self, candidate_id: i64) {
        self.last_seen_id = self.last_seen_id.max(candidate_id);
    }
}
