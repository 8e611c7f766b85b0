//! Telegram Bot API channel

use super::{Action, Channel, MessageHandle, Target};
use crate::config::TelegramConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Buttons per keyboard row
const ROW_WIDTH: usize = 2;

/// Telegram Bot API client
pub struct TelegramChannel {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
}

impl TelegramChannel {
    /// Create a client from configuration; the bot token is mandatory
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config.token.as_deref().ok_or_else(|| AppError::Configuration {
            message: "telegram.token is required to deliver messages".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, body: Value) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Channel {
                message: format!("{} request failed: {}", method, e),
            })?;

        let status = response.status();
        let parsed: ApiResponse<T> = response.json().await.map_err(|e| AppError::Channel {
            message: format!("{} returned unreadable body ({}): {}", method, status, e),
        })?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(AppError::Channel {
                message: format!(
                    "{} rejected ({}): {}",
                    method,
                    status,
                    parsed.description.unwrap_or_default()
                ),
            }),
        }
    }
}

fn chat_id(target: &Target) -> Value {
    match target {
        Target::Chat(id) => json!(id),
        Target::Alias(alias) => json!(alias),
    }
}

fn inline_keyboard(actions: &[Action]) -> Value {
    let rows: Vec<Vec<Value>> = actions
        .chunks(ROW_WIDTH)
        .map(|row| {
            row.iter()
                .map(|action| match action {
                    Action::Callback { label, data } => {
                        json!({ "text": label, "callback_data": data })
                    }
                    Action::Url { label, url } => json!({ "text": label, "url": url }),
                })
                .collect()
        })
        .collect();

    json!({ "inline_keyboard": rows })
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn send_message(
        &self,
        target: &Target,
        text: &str,
        preview: bool,
        actions: &[Action],
    ) -> Result<MessageHandle> {
        let mut body = json!({
            "chat_id": chat_id(target),
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": !preview,
        });
        if !actions.is_empty() {
            body["reply_markup"] = inline_keyboard(actions);
        }

        let sent: SentMessage = self.call("sendMessage", body).await?;
        debug!(target = %target, message_id = sent.message_id, "Message delivered");

        Ok(MessageHandle {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<()> {
        let body = json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id,
        });

        let _: bool = self.call("deleteMessage", body).await?;
        Ok(())
    }
}
