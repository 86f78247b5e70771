//! Conversation workflow.
//!
//! Each incoming message is turned into an [`Event`], matched against the
//! stored [`SessionState`] by [`transition`], and the resulting [`Effect`]
//! is carried out against the store, the channel and the compositor. No
//! session data lives in the workflow between messages.

mod batch;
mod dimensions;
pub mod replies;
mod transition;

pub use batch::BatchReport;
pub use dimensions::{parse_dimensions, DimensionError, DimensionLimits};
pub use transition::{transition, Effect, Event, ImageRef, Reply};

use crate::assets::TempAssets;
use crate::compositor::Compositor;
use crate::dispatcher::MessageHandler;
use crate::message::{ChannelMessage, OutgoingMessage};
use crate::session::{SessionState, SessionStore};
use crate::traits::Channel;
use anyhow::Context;
use async_trait::async_trait;
use overlay_common::ImageConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

/// Drives one user's conversation step by step.
pub struct Workflow {
    store: Arc<dyn SessionStore>,
    channel: Arc<dyn Channel>,
    compositor: Arc<dyn Compositor>,
    assets: TempAssets,
    limits: DimensionLimits,
    max_file_size: u64,
    max_file_size_mb: u64,
}

impl Workflow {
    pub fn new(
        store: Arc<dyn SessionStore>,
        channel: Arc<dyn Channel>,
        compositor: Arc<dyn Compositor>,
        assets: TempAssets,
        images: &ImageConfig,
    ) -> Self {
        Self {
            store,
            channel,
            compositor,
            assets,
            limits: DimensionLimits::from_config(images),
            max_file_size: images.max_file_size_bytes(),
            max_file_size_mb: images.max_file_size_mb,
        }
    }

    /// Handle one message, replying with a generic error if it fails.
    pub async fn process(&self, msg: &ChannelMessage) -> anyhow::Result<()> {
        let span = tracing::info_span!(
            "workflow",
            user_id = %msg.user_id,
            trace_id = %msg.trace_id,
        );

        async {
            let result = self.step(msg).await;
            if result.is_err() {
                if let Err(e) = self.reply(&msg.chat_id, replies::GENERIC_ERROR).await {
                    tracing::warn!("Failed to send error reply: {e:#}");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn step(&self, msg: &ChannelMessage) -> anyhow::Result<()> {
        let user = msg.user_id.as_str();
        let chat = msg.chat_id.as_str();

        let event = Event::from_message(msg);
        let state = self
            .store
            .get_state(user)
            .await
            .context("loading session state")?;
        let effect = transition(state, &event);
        tracing::debug!(%state, ?effect, "Handling message");

        match effect {
            Effect::Reset => self.reset(user, chat).await,
            Effect::StoreTemplate(image) => self.store_template(user, chat, &image).await,
            Effect::AddProduct(image) => self.add_product(user, chat, &image).await,
            Effect::FinishCollecting => self.finish_collecting(user, chat).await,
            Effect::ApplyDimensions(text) => self.apply_dimensions(user, chat, &text).await,
            Effect::Reply(reply) => self.reply(chat, reply.text()).await.map(drop),
        }
    }

    async fn reset(&self, user: &str, chat: &str) -> anyhow::Result<()> {
        tracing::info!("Processing /start");
        self.store
            .reset_session(user)
            .await
            .context("resetting session")?;
        self.store
            .set_state(user, SessionState::WaitingForTemplate)
            .await
            .context("saving state")?;
        self.reply(chat, replies::WELCOME).await?;
        Ok(())
    }

    async fn store_template(&self, user: &str, chat: &str, image: &ImageRef) -> anyhow::Result<()> {
        if !self.check_size(chat, image).await? {
            return Ok(());
        }

        let progress = self.reply(chat, replies::DOWNLOADING_TEMPLATE).await?;

        let data = match self.channel.download(&image.file_id).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Error handling template upload: {e}");
                return self.edit(chat, &progress, replies::TEMPLATE_ERROR).await;
            }
        };

        let compositor = Arc::clone(&self.compositor);
        let (data, validation) = tokio::task::spawn_blocking(move || {
            let validation = compositor.validate_bytes(&data);
            (data, validation)
        })
        .await
        .context("template validation task")?;
        if let Err(e) = validation {
            tracing::info!("Rejected template: {e}");
            return self.edit(chat, &progress, replies::INVALID_IMAGE).await;
        }

        self.store
            .set_template(user, &data)
            .await
            .context("storing template")?;
        self.store
            .set_state(user, SessionState::TemplateSet)
            .await
            .context("saving state")?;

        tracing::info!(bytes = data.len(), "Template set");
        self.edit(chat, &progress, replies::TEMPLATE_SET).await
    }

    async fn add_product(&self, user: &str, chat: &str, image: &ImageRef) -> anyhow::Result<()> {
        if !self.check_size(chat, image).await? {
            return Ok(());
        }

        let progress = self.reply(chat, replies::DOWNLOADING_PRODUCT).await?;

        let path = match self.save_product(user, image).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Error handling product image: {e:#}");
                return self.edit(chat, &progress, replies::PRODUCT_ERROR).await;
            }
        };

        let compositor = Arc::clone(&self.compositor);
        let check = path.clone();
        let validation = tokio::task::spawn_blocking(move || compositor.validate(&check)).await;
        match validation {
            Ok(Ok(info)) => tracing::debug!(
                format = ?info.format,
                width = info.width,
                height = info.height,
                "Product validated"
            ),
            Ok(Err(e)) => {
                tracing::info!("Rejected product image: {e}");
                self.assets.remove(&path).await;
                return self.edit(chat, &progress, replies::INVALID_IMAGE).await;
            }
            Err(e) => {
                self.assets.remove(&path).await;
                return Err(e).context("product validation task");
            }
        }

        let image_ref = path.to_string_lossy();
        let count = match self.store.add_pending_image(user, &image_ref).await {
            Ok(count) => count,
            Err(e) => {
                self.assets.remove(&path).await;
                return Err(e).context("appending pending image");
            }
        };
        self.store
            .set_state(user, SessionState::CollectingImages)
            .await
            .context("saving state")?;

        tracing::info!(count, "Product image queued");
        self.edit(chat, &progress, &replies::product_received(count)).await
    }

    async fn save_product(&self, user: &str, image: &ImageRef) -> anyhow::Result<PathBuf> {
        let data = self.channel.download(&image.file_id).await?;
        let path = self.assets.write_product(user, &data).await?;
        Ok(path)
    }

    async fn finish_collecting(&self, user: &str, chat: &str) -> anyhow::Result<()> {
        let pending = self
            .store
            .get_pending_images(user)
            .await
            .context("loading pending images")?;

        if pending.is_empty() {
            self.store
                .set_state(user, SessionState::TemplateSet)
                .await
                .context("saving state")?;
            self.reply(chat, replies::NO_IMAGES).await?;
            return Ok(());
        }

        self.store
            .set_state(user, SessionState::WaitingForDimensions)
            .await
            .context("saving state")?;
        self.reply(chat, &replies::ask_dimensions(pending.len())).await?;
        Ok(())
    }

    async fn apply_dimensions(&self, user: &str, chat: &str, text: &str) -> anyhow::Result<()> {
        let dimensions = match parse_dimensions(text, &self.limits) {
            Ok(dimensions) => dimensions,
            Err(DimensionError::Format) => {
                self.reply(chat, replies::INVALID_DIMENSIONS).await?;
                return Ok(());
            }
            Err(DimensionError::OutOfRange) => {
                self.reply(chat, &replies::out_of_range(&self.limits)).await?;
                return Ok(());
            }
        };

        self.store
            .set_dimensions(user, dimensions)
            .await
            .context("saving dimensions")?;
        self.run_batch(user, chat, dimensions).await.map(drop)
    }

    /// Reject images above the upload limit. Returns whether to go on.
    async fn check_size(&self, chat: &str, image: &ImageRef) -> anyhow::Result<bool> {
        match image.file_size {
            Some(size) if size > self.max_file_size => {
                tracing::info!(size, limit = self.max_file_size, "Rejected oversized upload");
                self.reply(chat, &replies::file_too_large(self.max_file_size_mb))
                    .await?;
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    /// Send a text and return its message id.
    async fn reply(&self, chat: &str, text: &str) -> anyhow::Result<String> {
        self.channel
            .send(OutgoingMessage::text(chat, text))
            .await
            .context("sending reply")
    }

    async fn edit(&self, chat: &str, message_id: &str, text: &str) -> anyhow::Result<()> {
        self.channel
            .edit(chat, message_id, text)
            .await
            .context("editing reply")
    }
}

#[async_trait]
impl MessageHandler for Workflow {
    async fn handle(&self, msg: ChannelMessage) -> anyhow::Result<()> {
        self.process(&msg).await
    }
}
