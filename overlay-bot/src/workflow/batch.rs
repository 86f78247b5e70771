//! The batch run that turns pending products into composites.

use super::{replies, Workflow};
use crate::compositor::CompositeJob;
use crate::message::OutgoingMessage;
use crate::session::Dimensions;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl Workflow {
    /// Composite every pending image in order and deliver the results.
    ///
    /// Item failures are counted, never propagated. Each product file is
    /// deleted after its item, and the session is settled before any summary
    /// is sent. Returns `None` when there was nothing to run.
    pub(crate) async fn run_batch(
        &self,
        user: &str,
        chat: &str,
        dimensions: Dimensions,
    ) -> anyhow::Result<Option<BatchReport>> {
        let pending = self
            .store
            .get_pending_images(user)
            .await
            .context("loading pending images")?;
        let template = self
            .store
            .get_template(user)
            .await
            .context("loading template")?;

        let template: Arc<[u8]> = match template {
            Some(data) if !pending.is_empty() => data.into(),
            _ => {
                self.reply(chat, replies::MISSING_INPUTS).await?;
                return Ok(None);
            }
        };

        let total = pending.len();
        tracing::info!(total, size = %dimensions, "Starting batch");
        let progress = self.reply(chat, &replies::progress(0, total)).await?;

        let mut report = BatchReport::default();
        for (index, image_ref) in pending.iter().enumerate() {
            let position = index + 1;
            if let Err(e) = self
                .edit(chat, &progress, &replies::progress(position, total))
                .await
            {
                tracing::warn!("Failed to update progress: {e:#}");
            }

            match self
                .process_item(chat, image_ref, &template, dimensions, position)
                .await
            {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    tracing::error!(index = position, "Failed to process image: {e:#}");
                    report.failed += 1;
                }
            }

            self.assets.remove(image_ref).await;
        }

        let finished = self
            .store
            .complete_batch(user, &pending)
            .await
            .context("completing batch")?;
        if !finished {
            tracing::info!("Session changed during batch, leaving it as is");
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch complete"
        );

        let summary = replies::summary(report.succeeded, report.failed);
        if let Err(e) = self.edit(chat, &progress, &summary).await {
            tracing::warn!("Failed to post summary in place, sending it instead: {e:#}");
            if let Err(e) = self.reply(chat, &summary).await {
                tracing::warn!("Failed to send summary: {e:#}");
            }
        }
        if let Err(e) = self.reply(chat, replies::FOLLOW_UP).await {
            tracing::warn!("Failed to send follow-up: {e:#}");
        }
        Ok(Some(report))
    }

    async fn process_item(
        &self,
        chat: &str,
        image_ref: &str,
        template: &Arc<[u8]>,
        dimensions: Dimensions,
        index: usize,
    ) -> anyhow::Result<()> {
        let compositor = Arc::clone(&self.compositor);
        let template = Arc::clone(template);
        let product = PathBuf::from(image_ref);

        let output = tokio::task::spawn_blocking(move || {
            compositor.composite(&CompositeJob {
                product,
                template: &template,
                dimensions,
                index,
            })
        })
        .await
        .context("compositing task")??;

        self.channel
            .send(OutgoingMessage::image(chat, output, None))
            .await
            .context("delivering composite")?;
        Ok(())
    }
}
