//! Forwarder module - relays messages between Telegram chats.

pub mod client;
pub mod cursor;
pub mod engine;
pub mod filter;
pub mod message;
pub mod sinks;
pub mod telegram;

pub use client::{connect_and_authorize, ChatClient};
pub use engine::{ForwardRoute, PollEngine};
pub use filter::KeywordSet;
pub use sinks::{CsvSink, SheetSink};
pub use telegram::TelegramClient;
