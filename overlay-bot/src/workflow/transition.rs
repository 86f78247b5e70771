//! The conversation transition table.

use crate::message::{is_image_mime, ChannelMessage, MessageContent};
use crate::session::SessionState;

/// An image the user sent, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub file_id: String,
    pub file_size: Option<u64>,
}

/// What the user did, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    /// Photo, or a document with an image MIME type.
    Image(ImageRef),
    /// Any other document.
    Document { mime_type: Option<String> },
    /// Trimmed and lower-cased text.
    Text(String),
}

impl Event {
    /// Classify an incoming message. Commands other than `/start` count as text.
    pub fn from_message(msg: &ChannelMessage) -> Self {
        match &msg.content {
            MessageContent::Command { name, .. } if name == "start" => Self::Start,
            MessageContent::Command { name, args } => {
                Self::Text(format!("/{name} {args}").trim().to_lowercase())
            }
            MessageContent::Text { text } => Self::Text(text.trim().to_lowercase()),
            MessageContent::Photo { file_id, file_size } => Self::Image(ImageRef {
                file_id: file_id.clone(),
                file_size: *file_size,
            }),
            MessageContent::Document {
                file_id,
                mime_type,
                file_size,
                ..
            } => {
                if is_image_mime(mime_type.as_deref()) {
                    Self::Image(ImageRef {
                        file_id: file_id.clone(),
                        file_size: *file_size,
                    })
                } else {
                    Self::Document {
                        mime_type: mime_type.clone(),
                    }
                }
            }
        }
    }
}

/// Fixed replies that leave the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    StartFirst,
    ImagesOnly,
    Idle,
}

/// What the workflow must do for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Clear the session and welcome the user. Next: `WaitingForTemplate`.
    Reset,
    /// Next: `TemplateSet`.
    StoreTemplate(ImageRef),
    /// Validate and append. Next: `CollectingImages`.
    AddProduct(ImageRef),
    /// Next: `WaitingForDimensions`, or `TemplateSet` if nothing is pending.
    FinishCollecting,
    /// Parse and run the batch. Next: `TemplateSet` on success.
    ApplyDimensions(String),
    Reply(Reply),
}

/// Decide the effect of `event` in `state`.
pub fn transition(state: SessionState, event: &Event) -> Effect {
    use SessionState::*;

    match (event, state) {
        (Event::Start, _) => Effect::Reset,

        (Event::Image(image), Uninitialized | WaitingForTemplate) => {
            Effect::StoreTemplate(image.clone())
        }
        (Event::Image(image), TemplateSet | CollectingImages) => Effect::AddProduct(image.clone()),
        (Event::Image(_), WaitingForDimensions) => Effect::Reply(Reply::StartFirst),

        (Event::Document { .. }, _) => Effect::Reply(Reply::ImagesOnly),

        (Event::Text(text), CollectingImages) if text == "done" => Effect::FinishCollecting,
        (Event::Text(text), WaitingForDimensions) => Effect::ApplyDimensions(text.clone()),
        (Event::Text(_), Uninitialized | WaitingForTemplate | TemplateSet | CollectingImages) => {
            Effect::Reply(Reply::Idle)
        }
    }
}
