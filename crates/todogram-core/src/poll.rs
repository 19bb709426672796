//! Update consumption loop
//!
//! Fetches a batch, dispatches every update in id order, then moves the
//! cursor past the batch. Cancellation is honoured between batches only.

use crate::dispatcher::Dispatcher;
use crate::render::{render, Reply};
use std::sync::Arc;
use std::time::Duration;
use todogram_config::TelegramConfig;
use todogram_storage::{CursorStore, ItemStore, StorageError};
use todogram_telegram::{Gateway, TransportError, Update, UpdateKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Pause between polls.
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(35),
            send_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&TelegramConfig> for PollSettings {
    fn from(config: &TelegramConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs()),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
        }
    }
}

struct CursorSink {
    store: Arc<dyn CursorStore>,
    tag: String,
}

pub struct PollLoop<G, S> {
    gateway: G,
    dispatcher: Dispatcher<S>,
    settings: PollSettings,
    cursor: Option<i64>,
    cursor_sink: Option<CursorSink>,
}

impl<G: Gateway, S: ItemStore> PollLoop<G, S> {
    pub fn new(gateway: G, dispatcher: Dispatcher<S>, settings: PollSettings) -> Self {
        Self {
            gateway,
            dispatcher,
            settings,
            cursor: None,
            cursor_sink: None,
        }
    }

    /// Restores the cursor saved under `tag` and keeps saving it after each
    /// batch. Without this the loop starts from the platform backlog.
    pub fn with_cursor_store(
        mut self,
        store: Arc<dyn CursorStore>,
        tag: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let tag = tag.into();
        self.cursor = store.load_cursor(&tag)?;
        info!(cursor = ?self.cursor, gateway = %tag, "Restored update cursor");
        self.cursor_sink = Some(CursorSink { store, tag });
        Ok(self)
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Polls until `shutdown` fires. Returns an error only when Telegram
    /// rejects the credential.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), TransportError> {
        info!(cursor = ?self.cursor, "Polling started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = self.fetch() => batch?,
            };

            // A fetched batch is always drained completely.
            self.drain(batch).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!(cursor = ?self.cursor, "Polling stopped");
        Ok(())
    }

    /// One fetch and drain without pausing. Returns the batch size.
    pub async fn poll_once(&mut self) -> Result<usize, TransportError> {
        let batch = self.fetch().await?;
        let size = batch.len();
        self.drain(batch).await;
        Ok(size)
    }

    /// Transient failures count as an empty batch.
    async fn fetch(&self) -> Result<Vec<Update>, TransportError> {
        let fetch = self.gateway.fetch_updates(self.cursor);
        match tokio::time::timeout(self.settings.fetch_timeout, fetch).await {
            Ok(Ok(updates)) => Ok(updates),
            Ok(Err(err @ TransportError::Unauthorized { .. })) => {
                error!("Telegram rejected the bot token, stopping: {}", err);
                Err(err)
            }
            Ok(Err(err)) => {
                warn!("Fetching updates failed: {}", err);
                Ok(Vec::new())
            }
            Err(_) => {
                warn!(
                    "Fetching updates timed out after {:?}",
                    self.settings.fetch_timeout
                );
                Ok(Vec::new())
            }
        }
    }

    async fn drain(&mut self, mut batch: Vec<Update>) {
        if batch.is_empty() {
            return;
        }

        batch.sort_by_key(|update| update.id);
        let highest = batch.last().map(|update| update.id);
        debug!(count = batch.len(), ?highest, "Draining batch");

        for update in batch {
            if self.cursor.is_some_and(|cursor| update.id <= cursor) {
                debug!(update_id = update.id, "Skipping already processed update");
                continue;
            }
            self.handle(update).await;
        }

        if let Some(highest) = highest {
            self.advance(highest);
        }
    }

    fn advance(&mut self, id: i64) {
        let next = self.cursor.map_or(id, |cursor| cursor.max(id));
        self.cursor = Some(next);

        if let Some(sink) = &self.cursor_sink {
            if let Err(err) = sink.store.save_cursor(&sink.tag, next) {
                warn!(cursor = next, "Failed to persist cursor: {}", err);
            }
        }
    }

    async fn handle(&self, update: Update) {
        let update_id = update.id;
        match update.kind {
            UpdateKind::Other => {
                debug!(update_id, "Ignoring update without text");
            }
            UpdateKind::Malformed(reason) => {
                warn!(update_id, "Skipping malformed update: {}", reason);
            }
            UpdateKind::Text { owner, text } => {
                let outcome = match self.dispatcher.dispatch(&owner, &text) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(
                            update_id,
                            owner = %owner,
                            "Dispatch failed, no reply sent: {}",
                            err
                        );
                        return;
                    }
                };
                debug!(update_id, owner = %owner, ?outcome, "Dispatched");
                self.send(&owner, &render(&outcome)).await;
            }
        }
    }

    /// Sends are never retried; a failure is only logged.
    async fn send(&self, owner: &str, reply: &Reply) {
        let send = self
            .gateway
            .send_text(owner, &reply.text, reply.selection.as_deref());
        match tokio::time::timeout(self.settings.send_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(owner, "Failed to send reply: {}", err);
            }
            Err(_) => {
                warn!(
                    owner,
                    "Sending reply timed out after {:?}", self.settings.send_timeout
                );
            }
        }
    }
}
