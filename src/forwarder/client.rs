//! Chat client seam - the transport the forwarder talks through.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::forwarder::message::Message;

/// Errors surfaced by a [`ChatClient`].
#[derive(Debug)]
pub enum ClientError {
    /// The chat has no messages to seed a cursor from. Fatal to that
    /// source's poll task at startup.
    EmptyChat(i64),
    /// Transient network/API failure while fetching. The poll task skips
    /// the interval and tries again; the cursor does not move.
    Fetch(String),
    /// Send failure. The message is skipped but the cursor still advances
    /// past it (at-most-once delivery, see the engine).
    Send(String),
    /// The client is not authorized. Fatal at startup.
    Unauthorized(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyChat(chat_id) => {
                write!(f, "chat {} has no messages to seed a cursor from", chat_id)
            }
            Self::Fetch(msg) => write!(f, "fetch failed: {}", msg),
            Self::Send(msg) => write!(f, "send failed: {}", msg),
            Self::Unauthorized(msg) => write!(f, "not authorized: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

/// The underlying chat transport.
///
/// One shared instance serves every poll task and sink subscription
/// concurrently, so implementations must tolerate concurrent calls
/// (serialize internal state or be reentrant).
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Establish the connection. Called once at startup.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Whether the client credentials are valid.
    async fn is_authorized(&self) -> bool;

    /// Fetch messages from `chat_id` with id strictly greater than
    /// `since_id` (all known messages when `None`), up to `limit` most
    /// recent ones. Order of the returned batch is unspecified.
    async fn fetch_messages(
        &self,
        chat_id: i64,
        since_id: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ClientError>;

    /// Id of the most recent message in `chat_id`, used to seed a cursor.
    ///
    /// The default asks the transport for its single most recent message
    /// and reports [`ClientError::EmptyChat`] when there is none.
    /// Transports without a history view override this: nothing they have
    /// observed is backlog, so the cursor seeds at 0 instead.
    async fn latest_message_id(&self, chat_id: i64) -> Result<i64, ClientError> {
        let latest = self.fetch_messages(chat_id, None, Some(1)).await?;
        latest
            .iter()
            .map(|m| m.id)
            .max()
            .ok_or(ClientError::EmptyChat(chat_id))
    }

    /// Send `text` to `chat_id`.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ClientError>;

    /// Subscribe to new messages in any of `chat_ids`. The adapter pushes
    /// each matching message into the returned channel as it arrives.
    async fn subscribe(&self, chat_ids: &[i64]) -> mpsc::Receiver<Message>;

    /// Human-readable title for `chat_id`, falling back to the id itself
    /// when no title is known.
    async fn chat_title(&self, chat_id: i64) -> String;
}

/// Connect and verify credentials. An authorization failure here is the
/// one unrecoverable startup error; callers terminate on it.
pub async fn connect_and_authorize(client: &dyn ChatClient) -> Result<(), ClientError> {
    client.connect().await?;
    if !client.is_authorized().await {
        return Err(ClientError::Unauthorized(
            "credentials rejected by the platform".to_string(),
        ));
    }
    Ok(())
}
