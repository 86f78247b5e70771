//! Telegram channel adapter.
//!
//! Long-polls the Bot API for updates and maps them into [`ChannelMessage`]s;
//! sends text, edits progress messages in place and uploads composited photos.

use crate::message::{ChannelMessage, MessageContent, OutgoingContent, OutgoingMessage};
use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Pause after a failed poll when Telegram gives no `retry_after`.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram's hard limit for a single text message.
const MAX_MESSAGE_LEN: usize = 4096;

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server (local bot API, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the `getUpdates` long-poll timeout.
    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path)
    }

    fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// Download a file from Telegram by its `file_id`.
    async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        // Step 1: Get the file path via getFile API
        let body = serde_json::json!({ "file_id": file_id });
        let resp = self.client.post(self.api_url("getFile")).json(&body).send().await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram getFile failed: {err}");
        }

        let data: serde_json::Value = resp.json().await?;
        let file_path = data
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(|p| p.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing file_path in getFile response"))?;

        // Step 2: Download the file
        let file_resp = self.client.get(self.file_url(file_path)).send().await?;

        if !file_resp.status().is_success() {
            anyhow::bail!(
                "Failed to download file from Telegram: {}",
                file_resp.status()
            );
        }

        let bytes = file_resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Send a single text chunk, returning the new message id.
    async fn send_single_chunk(&self, text: &str, chat_id: &str) -> anyhow::Result<i64> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed: {err}");
        }

        message_id_of(&resp.json().await?)
    }

    /// Upload an in-memory image as a photo.
    async fn send_photo_bytes(
        &self,
        chat_id: &str,
        data: Vec<u8>,
        caption: Option<String>,
    ) -> anyhow::Result<i64> {
        let part = Part::bytes(data)
            .file_name("result.jpg".to_string())
            .mime_str("image/jpeg")?;
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap);
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendPhoto failed: {err}");
        }

        message_id_of(&resp.json().await?)
    }

    /// Edit the text of an existing message.
    async fn edit_message_text(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text
        });

        let resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }

        let err = resp.text().await.unwrap_or_default();
        // Re-sending identical progress text is not an error for us
        if err.contains("message is not modified") {
            return Ok(());
        }
        anyhow::bail!("Telegram editMessageText failed: {err}")
    }

    /// Map one `getUpdates` entry to a channel message.
    ///
    /// Returns `None` for updates the bot does not handle and for senders
    /// outside `allowed_users`.
    fn parse_update(&self, update: &serde_json::Value) -> Option<ChannelMessage> {
        let message = update.get("message")?;

        let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();

        let from = message.get("from")?;
        let user_id = from.get("id")?.as_i64()?.to_string();
        let username = from
            .get("username")
            .and_then(|u| u.as_str())
            .unwrap_or("unknown");

        if !self.is_any_user_allowed([username, user_id.as_str()]) {
            tracing::warn!(
                "Telegram: ignoring message from unauthorized user: {}",
                username
            );
            return None;
        }

        let content = if let Some(text) = message.get("text").and_then(|v| v.as_str()) {
            MessageContent::from_text(text)
        } else if let Some(sizes) = message.get("photo").and_then(|v| v.as_array()) {
            // Sizes are ordered smallest first
            let largest = sizes.last()?;
            MessageContent::Photo {
                file_id: largest.get("file_id")?.as_str()?.to_string(),
                file_size: largest.get("file_size").and_then(serde_json::Value::as_u64),
            }
        } else if let Some(doc) = message.get("document") {
            MessageContent::Document {
                file_id: doc.get("file_id")?.as_str()?.to_string(),
                file_name: doc.get("file_name").and_then(|v| v.as_str()).map(String::from),
                mime_type: doc.get("mime_type").and_then(|v| v.as_str()).map(String::from),
                file_size: doc.get("file_size").and_then(serde_json::Value::as_u64),
            }
        } else {
            return None;
        };

        let id = message
            .get("message_id")
            .and_then(serde_json::Value::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Some(ChannelMessage {
            id,
            chat_id,
            user_id,
            content,
            timestamp: message
                .get("date")
                .and_then(serde_json::Value::as_i64)
                .map_or_else(|| chrono::Utc::now().timestamp_millis(), |secs| secs * 1000),
            trace_id: overlay_common::logging::generate_trace_id(),
        })
    }
}

fn message_id_of(data: &serde_json::Value) -> anyhow::Result<i64> {
    data.get("result")
        .and_then(|r| r.get("message_id"))
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| anyhow::anyhow!("Missing message_id in response"))
}

/// How long to wait before polling again after a failed `getUpdates`.
///
/// Flood control (429) carries `parameters.retry_after` in seconds.
fn retry_delay(data: &serde_json::Value) -> Duration {
    data.get("parameters")
        .and_then(|p| p.get("retry_after"))
        .and_then(serde_json::Value::as_u64)
        .map_or(POLL_RETRY_DELAY, |secs| Duration::from_secs(secs.max(1)))
}

/// Split a message into chunks that fit within Telegram's limit.
fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }

        let chunk = &remaining[..boundary];
        let split_pos = chunk
            .rfind("\n\n")
            .or_else(|| chunk.rfind('\n'))
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        let actual_split = if split_pos == 0 { boundary } else { split_pos };

        chunks.push(remaining[..actual_split].to_string());
        remaining = remaining[actual_split..].trim_start();
    }

    chunks
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn init(&self) -> ChannelResult<()> {
        // Verify bot token by calling getMe
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Auth(format!("Invalid bot token: {err}")));
        }

        tracing::info!("Telegram channel initialized");
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let message_id = match message.content {
            OutgoingContent::Text { text } => {
                let mut last = None;
                for chunk in split_message(&text, MAX_MESSAGE_LEN) {
                    let id = self
                        .send_single_chunk(&chunk, &message.chat_id)
                        .await
                        .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
                    last = Some(id);
                }
                last.ok_or_else(|| ChannelError::InvalidMessage("empty text".into()))?
            }
            OutgoingContent::Image { data, caption } => self
                .send_photo_bytes(&message.chat_id, data, caption)
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?,
        };

        Ok(message_id.to_string())
    }

    async fn edit(&self, chat_id: &str, message_id: &str, text: &str) -> ChannelResult<()> {
        let message_id: i64 = message_id
            .parse()
            .map_err(|_| ChannelError::InvalidMessage(format!("bad message id: {message_id}")))?;

        self.edit_message_text(chat_id, message_id, text)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn download(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        self.download_file(file_id)
            .await
            .map_err(|e| ChannelError::DownloadFailed(e.to_string()))
    }

    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"]
            });

            let resp = match self.client.post(self.api_url("getUpdates")).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ChannelError::Auth("bot token rejected".into()));
            }

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(status = status.as_u16(), "Telegram parse error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let ok = data.get("ok").and_then(serde_json::Value::as_bool) == Some(true);
            let results = data.get("result").and_then(serde_json::Value::as_array);
            let Some(results) = results.filter(|_| ok && status.is_success()) else {
                let delay = retry_delay(&data);
                tracing::warn!(
                    status = status.as_u16(),
                    retry_in_secs = delay.as_secs(),
                    "Telegram getUpdates failed: {}",
                    data.get("description")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("no description")
                );
                tokio::time::sleep(delay).await;
                continue;
            };

            for update in results {
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(msg) = self.parse_update(update) else {
                    continue;
                };

                tracing::info!(
                    channel = "telegram",
                    trace_id = %msg.trace_id,
                    message_id = %msg.id,
                    user_id = %msg.user_id,
                    chat_id = %msg.chat_id,
                    "Telegram message received"
                );

                if tx.send(msg).await.is_err() {
                    tracing::info!("Message receiver closed, stopping Telegram listener");
                    return Ok(());
                }
            }
        }
    }

}
