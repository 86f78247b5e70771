//! Message types for channel communication.

use serde::{Deserialize, Serialize};

/// Incoming message in a channel-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID (channel-specific)
    pub id: String,
    /// Chat the reply goes to
    pub chat_id: String,
    /// User identifier; sessions are keyed by this
    pub user_id: String,
    /// Message content
    pub content: MessageContent,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
    /// Trace id assigned on receipt
    pub trace_id: String,
}

/// Message content types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    /// Bot command such as `/start`, without the slash.
    Command { name: String, args: String },
    /// Plain text message
    Text { text: String },
    /// Photo; `file_id` is the largest size offered.
    Photo {
        file_id: String,
        file_size: Option<u64>,
    },
    /// File/document message
    Document {
        file_id: String,
        file_name: Option<String>,
        mime_type: Option<String>,
        file_size: Option<u64>,
    },
}

impl MessageContent {
    /// Split `/name@bot args` into a command, or return plain text.
    pub fn from_text(text: &str) -> Self {
        let Some(rest) = text.strip_prefix('/') else {
            return Self::Text {
                text: text.to_string(),
            };
        };

        let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let name = head.split('@').next().unwrap_or(head).to_lowercase();

        Self::Command {
            name,
            args: args.trim().to_string(),
        }
    }
}

impl ChannelMessage {
    /// Get the text content if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Check if this message carries an image (photo or image document).
    pub fn is_image(&self) -> bool {
        match &self.content {
            MessageContent::Photo { .. } => true,
            MessageContent::Document { mime_type, .. } => is_image_mime(mime_type.as_deref()),
            _ => false,
        }
    }
}

/// Check whether a MIME type denotes an image.
pub fn is_image_mime(mime_type: Option<&str>) -> bool {
    mime_type.is_some_and(|m| m.to_ascii_lowercase().starts_with("image/"))
}

/// Outgoing message to send to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target chat ID
    pub chat_id: String,
    /// Message content
    pub content: OutgoingContent,
}

impl OutgoingMessage {
    /// Plain text reply.
    pub fn text(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: OutgoingContent::Text { text: text.into() },
        }
    }

    /// Photo reply.
    pub fn image(chat_id: impl Into<String>, data: Vec<u8>, caption: Option<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: OutgoingContent::Image { data, caption },
        }
    }
}

/// Outgoing message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingContent {
    /// Plain text
    Text { text: String },
    /// Image, sent as a photo
    Image {
        data: Vec<u8>,
        caption: Option<String>,
    },
}
