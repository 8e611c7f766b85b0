//! Outbound delivery channel abstraction
//!
//! The dispatcher only talks to [`Channel`]; the Telegram Bot API client is
//! the production implementation.

mod telegram;

pub use telegram::TelegramChannel;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Destination of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Numeric chat id of a recipient
    Chat(i64),
    /// Public alias such as `@channel`
    Alias(String),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Chat(id) => write!(f, "{}", id),
            Target::Alias(alias) => write!(f, "{}", alias),
        }
    }
}

/// Interactive action rendered under a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Callback { label: String, data: String },
    Url { label: String, url: String },
}

/// Opaque reference to a delivered message, needed to retract it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Trait for message delivery
#[async_trait]
pub trait Channel: Send + Sync {
    /// Deliver a message, returning the handle assigned by the channel
    async fn send_message(
        &self,
        target: &Target,
        text: &str,
        preview: bool,
        actions: &[Action],
    ) -> Result<MessageHandle>;

    /// Delete a previously delivered message
    async fn delete_message(&self, handle: &MessageHandle) -> Result<()>;
}
