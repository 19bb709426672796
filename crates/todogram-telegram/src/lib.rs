//! Todogram Telegram Adapter
//!
//! Telegram Bot API polling, reply keyboards and message chunking behind the
//! [`Gateway`] trait

pub mod gateway;

pub use gateway::{Gateway, TransportError, Update, UpdateKind};

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use todogram_config::TelegramConfig;
use tracing::{debug, info, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub chat_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Result of `getMe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramAdapter {
    client: Client,
    api_url: String,
    account_tag: String,
    allowed_chats: Option<HashSet<i64>>,
    poll_timeout_secs: u64,
    request_timeout_secs: u64,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Result<Self, TransportError> {
        Self::with_api_base(config, TELEGRAM_API_BASE)
    }

    /// Same as [`TelegramAdapter::new`] but against another Bot API server.
    pub fn with_api_base(config: &TelegramConfig, api_base: &str) -> Result<Self, TransportError> {
        let api_url = format!(
            "{}/bot{}",
            api_base.trim_end_matches('/'),
            config.bot_token
        );
        let request_timeout_secs = config.fetch_timeout_secs();
        let client = Self::build_client(request_timeout_secs)?;

        Ok(Self {
            client,
            api_url,
            account_tag: config.account_tag(),
            allowed_chats: config
                .allowed_chats
                .clone()
                .map(|items| items.into_iter().collect()),
            poll_timeout_secs: config.poll_timeout_secs,
            request_timeout_secs,
        })
    }

    fn build_client(request_timeout_secs: u64) -> Result<Client, TransportError> {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(request_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Request {
                endpoint: "client".to_string(),
                reason: e.to_string(),
            })
    }

    fn request_error(&self, endpoint: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                endpoint: endpoint.to_string(),
                secs: self.request_timeout_secs,
            }
        } else {
            TransportError::Request {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }

    pub fn account_tag(&self) -> &str {
        &self.account_tag
    }

    fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&chat_id))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.request_error(endpoint, e))?;

        Self::read_response(endpoint, resp).await
    }

    async fn read_response<T: DeserializeOwned>(
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(TransportError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse<T> = resp.json().await.map_err(|e| TransportError::Decode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        if !parsed.ok {
            return Err(TransportError::Rejected {
                endpoint: endpoint.to_string(),
                description: parsed.description.unwrap_or_default(),
            });
        }

        parsed.result.ok_or_else(|| TransportError::Decode {
            endpoint: endpoint.to_string(),
            reason: "missing result".to_string(),
        })
    }

    /// Raw `getUpdates`; `offset` is the first update id wanted.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TransportError> {
        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });

        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }

        let raw: Vec<serde_json::Value> = self.call("getUpdates", &payload).await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| self.decode_update(value))
            .collect())
    }

    /// Decodes one element of the `getUpdates` result on its own, so a bad
    /// element never spoils the rest of the batch.
    fn decode_update(&self, value: serde_json::Value) -> Option<Update> {
        let Some(id) = value.get("update_id").and_then(serde_json::Value::as_i64) else {
            warn!("Dropping Telegram update without update_id");
            return None;
        };

        let kind = match serde_json::from_value::<TelegramUpdate>(value) {
            Ok(update) => self.classify(update),
            Err(err) => UpdateKind::Malformed(err.to_string()),
        };
        Some(Update { id, kind })
    }

    fn classify(&self, update: TelegramUpdate) -> UpdateKind {
        let Some(message) = update.message else {
            return UpdateKind::Other;
        };

        if !self.is_chat_allowed(message.chat.id) {
            info!("Skipping message from unauthorized chat {}", message.chat.id);
            return UpdateKind::Other;
        }

        match message.text {
            Some(text) => UpdateKind::Text {
                owner: message.chat.id.to_string(),
                text,
            },
            None => UpdateKind::Other,
        }
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        selection: Option<&[String]>,
    ) -> Result<(), TransportError> {
        let chunks = chunk_message(text);

        for (i, chunk) in chunks.iter().enumerate() {
            let mut payload = serde_json::json!({
                "chat_id": chat_id_value(chat_id),
                "text": chunk,
                "parse_mode": "Markdown",
            });

            if i == chunks.len() - 1 {
                if let Some(items) = selection {
                    payload["reply_markup"] = reply_keyboard(items);
                }
            }

            self.send_with_markdown_fallback(payload).await?;
        }

        Ok(())
    }

    /// Item text is user input, so Markdown may not parse. Telegram answers
    /// 400 in that case and the same payload goes out once more as plain text.
    async fn send_with_markdown_fallback(
        &self,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        let endpoint = "sendMessage";
        let url = format!("{}/{}", self.api_url, endpoint);

        let first_resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error(endpoint, e))?;

        match Self::read_response::<serde_json::Value>(endpoint, first_resp).await {
            Ok(_) => return Ok(()),
            Err(TransportError::Status { status: 400, body, .. }) => {
                warn!(
                    "telegram {} HTTP 400 with Markdown payload, retrying without parse_mode: {}",
                    endpoint, body
                );
            }
            Err(TransportError::Rejected { description, .. }) => {
                warn!(
                    "telegram {} returned ok=false with Markdown payload, retrying without parse_mode: {}",
                    endpoint, description
                );
            }
            Err(err) => return Err(err),
        }

        let mut fallback_payload = payload;
        if let Some(obj) = fallback_payload.as_object_mut() {
            obj.remove("parse_mode");
        }

        let _: serde_json::Value = self.call(endpoint, &fallback_payload).await?;
        Ok(())
    }

    /// Verifies the token and returns the bot's identity.
    pub async fn get_me(&self) -> Result<BotIdentity, TransportError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Long polling does not work while a webhook is registered.
    pub async fn delete_webhook(&self) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "deleteWebhook",
                &serde_json::json!({ "drop_pending_updates": false }),
            )
            .await?;
        Ok(())
    }

    pub async fn sync_bot_commands(&self) -> Result<(), TransportError> {
        let commands = serde_json::json!([
            { "command": "start", "description": "Show welcome and help" },
            { "command": "list", "description": "Show your todo list" },
            { "command": "done", "description": "Mark an item as completed" }
        ]);

        let payload = serde_json::json!({ "commands": commands });
        let _: bool = self.call("setMyCommands", &payload).await?;
        debug!("Telegram bot commands synced");
        Ok(())
    }
}

#[async_trait]
impl Gateway for TelegramAdapter {
    async fn fetch_updates(&self, since: Option<i64>) -> Result<Vec<Update>, TransportError> {
        self.get_updates(since.map(|id| id + 1)).await
    }

    async fn send_text(
        &self,
        owner: &str,
        text: &str,
        selection: Option<&[String]>,
    ) -> Result<(), TransportError> {
        self.send_message(owner, text, selection).await
    }
}

/// Numeric chat ids go out as numbers, anything else (e.g. `@channel`) as-is.
fn chat_id_value(chat_id: &str) -> serde_json::Value {
    match chat_id.parse::<i64>() {
        Ok(id) => serde_json::json!(id),
        Err(_) => serde_json::json!(chat_id),
    }
}

/// One item per row; the keyboard hides itself after a tap.
fn reply_keyboard(items: &[String]) -> serde_json::Value {
    serde_json::json!({
        "keyboard": items
            .iter()
            .map(|item| vec![serde_json::json!({ "text": item })])
            .collect::<Vec<_>>(),
        "one_time_keyboard": true,
        "resize_keyboard": true,
    })
}

fn chunk_message(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + TELEGRAM_MAX_MESSAGE_LEN).min(chars.len());

        if end < chars.len() {
            let mut split = end;
            for i in (start..end).rev() {
                if chars[i] == '\n' || chars[i] == ' ' {
                    split = i + 1;
                    break;
                }
            }
            if split > start {
                end = split;
            }
        }

        chunks.push(chars[start..end].iter().collect::<String>());
        start = end;
    }

    chunks
}
