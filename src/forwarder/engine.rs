//! Poll loop engine - one forwarding task per source chat.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::forwarder::client::{ChatClient, ClientError};
use crate::forwarder::cursor::ForwardingCursor;
use crate::forwarder::filter::KeywordSet;

/// Default delay between poll cycles, in seconds. The fixed sleep is the
/// sole rate-limiting mechanism; there is no adaptive backoff.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// What to forward where.
#[derive(Debug, Clone)]
pub struct ForwardRoute {
    pub source_chat_ids: Vec<i64>,
    pub destination_chat_id: i64,
    pub keywords: KeywordSet,
    pub poll_interval: Duration,
}

/// The forwarding engine. Spawns one independent task per source chat;
/// tasks share nothing but the client and each own exactly one cursor.
pub struct PollEngine {
    client: Arc<dyn ChatClient>,
    route: ForwardRoute,
}

impl PollEngine {
    pub fn new(client: Arc<dyn ChatClient>, route: ForwardRoute) -> Self {
        Self { client, route }
    }

    /// Run all poll tasks. Never returns on its own; the process-level
    /// shutdown (Ctrl-C) is the only way out.
    pub async fn run(self) {
        let mut tasks = Vec::new();
        for &chat_id in &self.route.source_chat_ids {
            let client = self.client.clone();
            let route = self.route.clone();
            tasks.push(tokio::spawn(async move {
                poll_chat(client, chat_id, route).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn poll_chat(client: Arc<dyn ChatClient>, chat_id: i64, route: ForwardRoute) {
    // Seed from the newest existing message so the backlog is not replayed.
    // An empty chat is fatal to this task only; the other tasks keep going.
    let mut cursor = match ForwardingCursor::initialize(client.as_ref(), chat_id).await {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Cannot start polling chat {}: {}", chat_id, e);
            return;
        }
    };
    info!(
        "Polling chat {} for new messages (starting after id {})",
        chat_id,
        cursor.last_seen_id()
    );

    loop {
        if let Err(e) = poll_once(
            client.as_ref(),
            &mut cursor,
            route.destination_chat_id,
            &route.keywords,
        )
        .await
        {
            // Transient fetch failure: skip this interval, keep the cursor.
            warn!("Poll cycle for chat {} failed: {}", chat_id, e);
        }
        sleep(route.poll_interval).await;
    }
}

/// One poll cycle: fetch everything past the cursor, forward matches in
/// ascending id order, advance the cursor past every fetched message.
///
/// A send failure skips that message but still advances the cursor, so
/// delivery is at-most-once. That is the intended policy, not a bug to fix:
/// the design trades retry complexity for the possibility of a dropped
/// message.
pub async fn poll_once(
    client: &dyn ChatClient,
    cursor: &mut ForwardingCursor,
    destination_chat_id: i64,
    keywords: &KeywordSet,
) -> Result<(), ClientError> {
    let chat_id = cursor.chat_id();
    let mut messages = client
        .fetch_messages(chat_id, Some(cursor.last_seen_id()), None)
        .await?;

    // The adapter may hand the batch back in any order; forwarded output
    // must preserve source chronology.
    messages.sort_by_key(|m| m.id);

    for message in &messages {
        if keywords.matches(message.text.as_deref()) {
            let text = message.text.as_deref().unwrap_or_default();
            match client.send_message(destination_chat_id, text).await {
                Ok(()) => {
                    info!("Forwarded message {} from chat {}", message.id, chat_id);
                }
                Err(e) => {
                    warn!(
                        "Failed to forward message {} from chat {}: {}",
                        message.id, chat_id, e
                    );
                }
            }
        }
        cursor.advance(message.id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::message::Message;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use tokio::sync::{mpsc, Mutex};

    /// Scripted client: hands out queued fetch batches and records sends.
    struct MockClient {
        batches: Mutex<VecDeque<Result<Vec<Message>, ClientError>>>,
        sent: Mutex<Vec<(i64, String)>>,
        /// Texts whose send should fail.
        failing_texts: Vec<String>,
        authorized: bool,
    }

    impl MockClient {
        fn new(batches: Vec<Result<Vec<Message>, ClientError>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                sent: Mutex::new(Vec::new()),
                failing_texts: Vec::new(),
                authorized: true,
            }
        }

        fn failing_on(mut self, text: &str) -> Self {
            self.failing_texts.push(text.to_string());
            self
        }

        fn unauthorized(mut self) -> Self {
            self.authorized = false;
            self
        }

        async fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl ChatClient for MockClient {
        async fn connect(&self) -> Result<(), ClientError> {
            Ok(())
        }

        async fn is_authorized(&self) -> bool {
            self.authorized
        }

        async fn fetch_messages(
            &self,
            chat_id: i64,
            _since_id: Option<i64>,
            _limit: Option<usize>,
        ) -> Result<Vec<Message>, ClientError> {
            self.batches
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted batch left for chat {}", chat_id))
        }

        async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ClientError> {
            if self.failing_texts.iter().any(|t| t == text) {
                return Err(ClientError::Send("scripted failure".to_string()));
            }
            self.sent.lock().await.push((chat_id, text.to_string()));
            Ok(())
        }

        async fn subscribe(&self, _chat_ids: &[i64]) -> mpsc::Receiver<Message> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }

        async fn chat_title(&self, chat_id: i64) -> String {
            chat_id.to_string()
        }
    }

    const SOURCE: i64 = -1001;
    const DEST: i64 = -2002;

    fn msg(id: i64, text: &str) -> Message {
        Message {
            id,
            chat_id: SOURCE,
            sender_id: 1,
            text: Some(text.to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_startup_rejects_bad_credentials() {
        use crate::forwarder::client::connect_and_authorize;

        let client = MockClient::new(vec![]).unauthorized();
        let err = connect_and_authorize(&client).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));

        let client = MockClient::new(vec![]);
        connect_and_authorize(&client).await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_seeds_from_latest_message() {
        let client = MockClient::new(vec![Ok(vec![msg(100, "old")])]);
        let cursor = ForwardingCursor::initialize(&client, SOURCE).await.unwrap();
        assert_eq!(cursor.last_seen_id(), 100);
    }

    #[tokio::test]
    async fn test_initialize_empty_chat_fails() {
        let client = MockClient::new(vec![Ok(vec![])]);
        let err = ForwardingCursor::initialize(&client, SOURCE).await.unwrap_err();
        assert!(matches!(err, ClientError::EmptyChat(id) if id == SOURCE));
    }

    #[tokio::test]
    async fn test_keyword_cycle_forwards_only_matching() {
        let client = MockClient::new(vec![Ok(vec![
            msg(101, "morning everyone"),
            msg(102, "flash SALE today"),
            msg(103, "see you later"),
        ])]);
        let mut cursor = ForwardingCursor::at(SOURCE, 100);
        let keywords = KeywordSet::parse("sale");

        poll_once(&client, &mut cursor, DEST, &keywords).await.unwrap();

        assert_eq!(client.sent().await, vec![(DEST, "flash SALE today".to_string())]);
        assert_eq!(cursor.last_seen_id(), 103);
    }

    #[tokio::test]
    async fn test_forward_all_sends_everything_in_order() {
        let client = MockClient::new(vec![Ok(vec![msg(101, "a"), msg(102, "b"), msg(103, "c")])]);
        let mut cursor = ForwardingCursor::at(SOURCE, 100);
        let keywords = KeywordSet::default();

        poll_once(&client, &mut cursor, DEST, &keywords).await.unwrap();

        let sent = client.sent().await;
        let texts: Vec<&str> = sent.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(cursor.last_seen_id(), 103);
    }

    #[tokio::test]
    async fn test_out_of_order_fetch_is_sorted_before_forwarding() {
        let client = MockClient::new(vec![Ok(vec![msg(103, "c"), msg(101, "a"), msg(102, "b")])]);
        let mut cursor = ForwardingCursor::at(SOURCE, 100);
        let keywords = KeywordSet::default();

        poll_once(&client, &mut cursor, DEST, &keywords).await.unwrap();

        let sent = client.sent().await;
        let texts: Vec<&str> = sent.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(cursor.last_seen_id(), 103);
    }

    #[tokio::test]
    async fn test_send_failure_skips_message_but_advances_cursor() {
        let client =
            MockClient::new(vec![Ok(vec![msg(101, "a"), msg(102, "b"), msg(103, "c")])])
                .failing_on("b");
        let mut cursor = ForwardingCursor::at(SOURCE, 100);
        let keywords = KeywordSet::default();

        poll_once(&client, &mut cursor, DEST, &keywords).await.unwrap();

        let sent = client.sent().await;
        let texts: Vec<&str> = sent.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
        // At-most-once: message 102 is lost, the cursor moved past it anyway.
        assert_eq!(cursor.last_seen_id(), 103);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cursor_untouched() {
        let client = MockClient::new(vec![Err(ClientError::Fetch("flood wait".to_string()))]);
        let mut cursor = ForwardingCursor::at(SOURCE, 100);
        let keywords = KeywordSet::default();

        let err = poll_once(&client, &mut cursor, DEST, &keywords).await.unwrap_err();
        assert!(matches!(err, ClientError::Fetch(_)));
        assert_eq!(cursor.last_seen_id(), 100);
        assert!(client.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_fetch_is_a_no_op() {
        let client = MockClient::new(vec![Ok(vec![])]);
        let mut cursor = ForwardingCursor::at(SOURCE, 100);
        let keywords = KeywordSet::parse("sale");

        poll_once(&client, &mut cursor, DEST, &keywords).await.unwrap();
        assert_eq!(cursor.last_seen_id(), 100);
        assert!(client.sent().await.is_empty());
    }
}
