//! Messaging gateway seam used by the poll loop

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{endpoint} request failed: {reason}")]
    Request { endpoint: String, reason: String },

    #[error("{endpoint} HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} decode failed: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("{endpoint} returned ok=false: {description}")]
    Rejected {
        endpoint: String,
        description: String,
    },

    #[error("{endpoint} timed out after {secs}s")]
    Timeout { endpoint: String, secs: u64 },

    #[error("bot token rejected by Telegram ({status})")]
    Unauthorized { status: u16 },
}

/// One inbound event, already reduced to what the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub id: i64,
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Text { owner: String, text: String },
    /// Anything without text: stickers, photos, edits, filtered chats.
    Other,
    /// The payload carried an id but could not be decoded.
    Malformed(String),
}

impl Update {
    pub fn text(id: i64, owner: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            kind: UpdateKind::Text {
                owner: owner.into(),
                text: text.into(),
            },
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Updates with an id strictly greater than `since`, or the platform's
    /// pending backlog when `since` is `None`.
    async fn fetch_updates(&self, since: Option<i64>) -> Result<Vec<Update>, TransportError>;

    /// Sends `text` to `owner`. A selection is offered as a one-shot keyboard.
    async fn send_text(
        &self,
        owner: &str,
        text: &str,
        selection: Option<&[String]>,
    ) -> Result<(), TransportError>;
}
