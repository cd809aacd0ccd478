//! Telegram transport using teloxide.
//!
//! The Bot API has no history fetch, so the client keeps a bounded
//! in-memory buffer of the messages observed through long polling and
//! answers `fetch_messages` from that buffer. One instance is shared by
//! every poll task and sink subscription; all mutable state sits behind a
//! single mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::forwarder::client::{ChatClient, ClientError};
use crate::forwarder::message::Message;

/// Messages retained per chat in the update buffer.
const BUFFER_LIMIT: usize = 1024;

/// Capacity of each subscription channel.
const SUBSCRIPTION_CAPACITY: usize = 256;

struct Subscriber {
    chats: HashSet<i64>,
    tx: mpsc::Sender<Message>,
}

#[derive(Default)]
struct State {
    /// Observed messages per chat, ascending id.
    seen: HashMap<i64, Vec<Message>>,
    /// Chat titles picked up from updates or resolved on demand.
    titles: HashMap<i64, String>,
    subscribers: Vec<Subscriber>,
}

/// Telegram chat client.
pub struct TelegramClient {
    bot: Bot,
    state: Arc<Mutex<State>>,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Spawn the long-polling dispatcher that feeds the update buffer and
    /// the sink subscriptions. Runs until the process exits.
    pub fn spawn_dispatcher(self: &Arc<Self>) {
        let bot = self.bot.clone();
        let client = self.clone();
        tokio::spawn(async move {
            let handler = dptree::entry()
                .branch(Update::filter_message().endpoint(on_update))
                .branch(Update::filter_channel_post().endpoint(on_update));

            Dispatcher::builder(bot, handler)
                .dependencies(dptree::deps![client])
                .enable_ctrlc_handler()
                .build()
                .dispatch()
                .await;
        });
    }

    /// Record one observed message and fan it out to the subscribers
    /// watching its chat.
    async fn ingest(&self, msg: Message, title: Option<&str>) {
        let chat_id = msg.chat_id;
        let mut state = self.state.lock().await;

        if let Some(title) = title {
            state.titles.insert(chat_id, title.to_string());
        }

        let buffer = state.seen.entry(chat_id).or_default();
        buffer.push(msg.clone());
        if buffer.len() > BUFFER_LIMIT {
            let excess = buffer.len() - BUFFER_LIMIT;
            buffer.drain(..excess);
        }

        // Prune subscribers whose receiver is gone before fanning out.
        state.subscribers.retain(|sub| !sub.tx.is_closed());

        for sub in &state.subscribers {
            if sub.chats.contains(&chat_id) && sub.tx.try_send(msg.clone()).is_err() {
                warn!(
                    "Subscription queue full; dropping message {} from chat {}",
                    msg.id, chat_id
                );
            }
        }
    }
}

async fn on_update(msg: teloxide::types::Message, client: Arc<TelegramClient>) -> ResponseResult<()> {
    let title = msg.chat.title().map(|t| t.to_string());
    client.ingest(convert(&msg), title.as_deref()).await;
    Ok(())
}

fn convert(msg: &teloxide::types::Message) -> Message {
    // Channel posts carry no user; fall back to the posting chat itself.
    let sender_id = msg
        .from
        .as_ref()
        .map(|u| u.id.0 as i64)
        .or_else(|| msg.sender_chat.as_ref().map(|c| c.id.0))
        .unwrap_or(0);

    Message {
        id: i64::from(msg.id.0),
        chat_id: msg.chat.id.0,
        sender_id,
        text: msg.text().map(|t| t.to_string()),
        timestamp: msg.date,
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn connect(&self) -> Result<(), ClientError> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| ClientError::Unauthorized(e.to_string()))?;
        info!("Connected as @{} ({})", me.username(), me.id);
        Ok(())
    }

    async fn is_authorized(&self) -> bool {
        self.bot.get_me().await.is_ok()
    }

    async fn fetch_messages(
        &self,
        chat_id: i64,
        since_id: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ClientError> {
        let state = self.state.lock().await;
        let mut messages: Vec<Message> = state
            .seen
            .get(&chat_id)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|m| since_id.is_none_or(|since| m.id > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Keep the most recent `limit` messages, still in ascending order.
        if let Some(limit) = limit {
            if messages.len() > limit {
                messages.drain(..messages.len() - limit);
            }
        }
        Ok(messages)
    }

    async fn latest_message_id(&self, chat_id: i64) -> Result<i64, ClientError> {
        // The update buffer carries no backlog: a chat with nothing
        // observed yet is not empty, its history just is not visible over
        // the Bot API. Seed at 0 so the cursor picks up the first update;
        // EmptyChat stays reserved for transports that can see history.
        let state = self.state.lock().await;
        Ok(state
            .seen
            .get(&chat_id)
            .and_then(|buffer| buffer.iter().map(|m| m.id).max())
            .unwrap_or(0))
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ClientError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map_err(|e| ClientError::Send(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, chat_ids: &[i64]) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let mut state = self.state.lock().await;
        state.subscribers.push(Subscriber {
            chats: chat_ids.iter().copied().collect(),
            tx,
        });
        rx
    }

    async fn chat_title(&self, chat_id: i64) -> String {
        if let Some(title) = self.state.lock().await.titles.get(&chat_id) {
            return title.clone();
        }

        match self.bot.get_chat(ChatId(chat_id)).await {
            Ok(chat) => {
                let title = chat
                    .title()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| chat_id.to_string());
                self.state
                    .lock()
                    .await
                    .titles
                    .insert(chat_id, title.clone());
                title
            }
            Err(e) => {
                warn!("Failed to resolve title for chat {}: {}", chat_id, e);
                chat_id.to_string()
            }
        }
    }
}
