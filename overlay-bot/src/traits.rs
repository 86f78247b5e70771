//! Channel trait implemented by chat transports.

use crate::message::{ChannelMessage, OutgoingMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Chat transport.
///
/// The workflow only talks to the user through this trait, so tests drive
/// it with an in-process fake.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Initialize the channel (verify credentials etc.).
    async fn init(&self) -> ChannelResult<()>;

    /// Send a message; returns the id of the created message.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String>;

    /// Replace the text of a previously sent message.
    async fn edit(&self, chat_id: &str, message_id: &str, text: &str) -> ChannelResult<()>;

    /// Download a file referenced by an incoming message.
    async fn download(&self, file_id: &str) -> ChannelResult<Vec<u8>>;

    /// Receive incoming messages until the channel shuts down or `tx` closes.
    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()>;
}
