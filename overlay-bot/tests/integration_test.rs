//! Integration tests for the overlay bot workflow.
//!
//! These drive [`Workflow`] end to end over the in-memory session store, a
//! channel that records everything sent to the user and a compositor whose
//! results are scripted by the product bytes.

use async_trait::async_trait;
use image::ImageFormat;
use overlay_bot::{
    Channel, ChannelError, ChannelMessage, ChannelResult, CompositeError, CompositeJob,
    Compositor, Dimensions, Dispatcher, ImageInfo, InMemorySessionStore, MessageContent,
    OutgoingContent, OutgoingMessage, SessionState, SessionStore, StoreError, TempAssets,
    Workflow,
};
use overlay_common::ImageConfig;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const USER: &str = "4242";

// ============================================================================
// Fakes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text(String),
    Image(Vec<u8>),
    Edit(String),
}

#[derive(Default)]
struct RecordingChannel {
    files: Mutex<HashMap<String, Vec<u8>>>,
    log: Mutex<Vec<Sent>>,
    next_id: AtomicUsize,
    fail_on: Mutex<Option<String>>,
}

impl RecordingChannel {
    fn add_file(&self, file_id: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(file_id.to_string(), data.to_vec());
    }

    fn log(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    /// Texts the user can currently see: sends and edits, in order.
    fn texts(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(t) | Sent::Edit(t) => Some(t),
                Sent::Image(_) => None,
            })
            .collect()
    }

    fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }

    fn images(&self) -> Vec<Vec<u8>> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Image(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Make every text send or edit containing `needle` fail.
    fn fail_texts_containing(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    fn check_text(&self, text: &str) -> ChannelResult<()> {
        match self.fail_on.lock().unwrap().as_deref() {
            Some(needle) if text.contains(needle) => {
                Err(ChannelError::SendFailed("scripted outage".into()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn init(&self) -> ChannelResult<()> {
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let entry = match message.content {
            OutgoingContent::Text { text } => {
                self.check_text(&text)?;
                Sent::Text(text)
            }
            OutgoingContent::Image { data, .. } => Sent::Image(data),
        };
        self.log.lock().unwrap().push(entry);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn edit(&self, _chat_id: &str, _message_id: &str, text: &str) -> ChannelResult<()> {
        self.check_text(text)?;
        self.log.lock().unwrap().push(Sent::Edit(text.to_string()));
        Ok(())
    }

    async fn download(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| ChannelError::DownloadFailed(format!("no such file: {file_id}")))
    }

    async fn listen(&self, _tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()> {
        Ok(())
    }
}

/// Bytes starting with `bad` fail validation, a product reading `fail`
/// fails compositing, everything else composites to `out:<product>`.
#[derive(Default)]
struct ScriptedCompositor {
    on_composite: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ScriptedCompositor {
    fn check(data: &[u8]) -> Result<ImageInfo, CompositeError> {
        if data.starts_with(b"bad") {
            return Err(CompositeError::Decode("scripted".into()));
        }
        Ok(ImageInfo {
            format: ImageFormat::Png,
            width: 10,
            height: 10,
        })
    }
}

impl Compositor for ScriptedCompositor {
    fn validate(&self, path: &Path) -> Result<ImageInfo, CompositeError> {
        Self::check(&std::fs::read(path)?)
    }

    fn validate_bytes(&self, data: &[u8]) -> Result<ImageInfo, CompositeError> {
        Self::check(data)
    }

    fn composite(&self, job: &CompositeJob<'_>) -> Result<Vec<u8>, CompositeError> {
        if let Some(hook) = &self.on_composite {
            hook();
        }
        let product = std::fs::read(&job.product)?;
        if product == b"fail" {
            return Err(CompositeError::Encode("scripted".into()));
        }
        let mut out = b"out:".to_vec();
        out.extend_from_slice(&product);
        Ok(out)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    store: Arc<InMemorySessionStore>,
    channel: Arc<RecordingChannel>,
    workflow: Arc<Workflow>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_compositor(ScriptedCompositor::default(), Arc::new(InMemorySessionStore::new()))
    }

    fn with_compositor(compositor: ScriptedCompositor, store: Arc<InMemorySessionStore>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(RecordingChannel::default());
        let assets = TempAssets::new(dir.path()).unwrap();
        let images = ImageConfig {
            max_file_size_mb: 1,
            ..ImageConfig::default()
        };
        let workflow = Arc::new(Workflow::new(
            store.clone(),
            channel.clone(),
            Arc::new(compositor),
            assets,
            &images,
        ));
        Self {
            store,
            channel,
            workflow,
            dir,
        }
    }

    async fn send(&self, content: MessageContent) {
        self.workflow.process(&message(content)).await.unwrap();
    }

    async fn text(&self, text: &str) {
        self.send(MessageContent::from_text(text)).await;
    }

    async fn photo(&self, file_id: &str, data: &[u8]) {
        self.channel.add_file(file_id, data);
        self.send(MessageContent::Photo {
            file_id: file_id.to_string(),
            file_size: Some(data.len() as u64),
        })
        .await;
    }

    async fn state(&self) -> SessionState {
        self.store.get_state(USER).await.unwrap()
    }

    async fn pending(&self) -> Vec<String> {
        self.store.get_pending_images(USER).await.unwrap()
    }

    fn temp_files(&self) -> usize {
        std::fs::read_dir(self.dir.path()).unwrap().count()
    }

    /// `/start`, template, then the given products.
    async fn collect(&self, products: &[&[u8]]) {
        self.text("/start").await;
        self.photo("template", b"template-bytes").await;
        for (i, data) in products.iter().enumerate() {
            self.photo(&format!("product-{i}"), data).await;
        }
    }
}

fn message(content: MessageContent) -> ChannelMessage {
    ChannelMessage {
        id: "1".into(),
        chat_id: USER.into(),
        user_id: USER.into(),
        content,
        timestamp: 0,
        trace_id: "test-trace".into(),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_full_scenario() {
    let h = Harness::new();

    h.text("/start").await;
    assert_eq!(h.state().await, SessionState::WaitingForTemplate);
    assert!(h.last_text_contains("Welcome"));

    h.photo("template", b"template-bytes").await;
    assert_eq!(h.state().await, SessionState::TemplateSet);
    assert!(h.last_text_contains("Template set successfully"));

    h.photo("p1", b"first").await;
    assert!(h.last_text_contains("Product image 1 received"));
    h.photo("p2", b"second").await;
    assert!(h.last_text_contains("Product image 2 received"));
    assert_eq!(h.state().await, SessionState::CollectingImages);
    assert_eq!(h.pending().await.len(), 2);

    h.text("done").await;
    assert_eq!(h.state().await, SessionState::WaitingForDimensions);
    assert!(h.last_text_contains("Format: width x height"));

    h.channel.clear();
    h.text("500 x 500").await;

    assert_eq!(
        h.channel.images(),
        vec![b"out:first".to_vec(), b"out:second".to_vec()]
    );
    let texts = h.channel.texts();
    assert!(texts.contains(&"⚙️ Processing 2 images... (0/2)".to_string()));
    assert!(texts.contains(&"⚙️ Processing 2 images... (2/2)".to_string()));
    assert!(texts.iter().any(|t| t.contains("Success: 2, ❌ Failed: 0")));
    assert!(h.last_text_contains("Send more product images"));

    assert_eq!(h.state().await, SessionState::TemplateSet);
    assert!(h.pending().await.is_empty());
    assert!(h.store.get_dimensions(USER).await.unwrap().is_none());
    assert_eq!(h.temp_files(), 0);
}

#[tokio::test]
async fn test_failing_item_does_not_abort_batch() {
    let h = Harness::new();
    h.collect(&[b"one", b"fail", b"three"]).await;
    h.text("done").await;
    h.text("400x600").await;

    assert_eq!(
        h.channel.images(),
        vec![b"out:one".to_vec(), b"out:three".to_vec()]
    );
    assert!(h
        .channel
        .texts()
        .iter()
        .any(|t| t.contains("Success: 2, ❌ Failed: 1")));
    assert_eq!(h.state().await, SessionState::TemplateSet);
    assert!(h.pending().await.is_empty());
    assert_eq!(h.temp_files(), 0);
}

#[tokio::test]
async fn test_done_without_images_reverts() {
    let h = Harness::new();
    h.collect(&[]).await;
    // Only reachable if the pending list was emptied behind our back
    h.store
        .set_state(USER, SessionState::CollectingImages)
        .await
        .unwrap();

    h.text("done").await;

    assert_eq!(
        h.channel.last_text(),
        "❌ No images to process. Please send product images first."
    );
    assert_eq!(h.state().await, SessionState::TemplateSet);
}

#[tokio::test]
async fn test_image_while_waiting_for_template_is_template() {
    let h = Harness::new();
    h.text("/start").await;
    h.photo("t", b"the-template").await;

    assert_eq!(
        h.store.get_template(USER).await.unwrap(),
        Some(b"the-template".to_vec())
    );
    assert!(h.pending().await.is_empty());
    assert_eq!(h.state().await, SessionState::TemplateSet);
}

#[tokio::test]
async fn test_image_before_start_is_template() {
    let h = Harness::new();
    h.photo("t", b"early-template").await;

    assert_eq!(h.state().await, SessionState::TemplateSet);
    assert_eq!(
        h.store.get_template(USER).await.unwrap(),
        Some(b"early-template".to_vec())
    );
}

#[tokio::test]
async fn test_start_discards_previous_session() {
    let h = Harness::new();
    h.collect(&[b"one"]).await;
    h.text("/start").await;

    assert_eq!(h.state().await, SessionState::WaitingForTemplate);
    assert!(h.store.get_template(USER).await.unwrap().is_none());
    assert!(h.pending().await.is_empty());
}

#[tokio::test]
async fn test_invalid_product_is_not_queued() {
    let h = Harness::new();
    h.collect(&[b"good"]).await;
    h.photo("broken", b"bad-bytes").await;

    assert_eq!(h.channel.last_text(), "❌ Invalid image format.");
    assert_eq!(h.pending().await.len(), 1);
    assert_eq!(h.temp_files(), 1);
}

#[tokio::test]
async fn test_invalid_template_is_rejected() {
    let h = Harness::new();
    h.text("/start").await;
    h.photo("t", b"bad-template").await;

    assert_eq!(h.channel.last_text(), "❌ Invalid image format.");
    assert_eq!(h.state().await, SessionState::WaitingForTemplate);
    assert!(h.store.get_template(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let h = Harness::new();
    h.text("/start").await;
    h.send(MessageContent::Photo {
        file_id: "huge".into(),
        file_size: Some(2 * 1024 * 1024),
    })
    .await;

    assert_eq!(
        h.channel.last_text(),
        "❌ File too large. Please send an image smaller than 1MB."
    );
    assert_eq!(h.state().await, SessionState::WaitingForTemplate);
}

#[tokio::test]
async fn test_download_failure_reports_template_error() {
    let h = Harness::new();
    h.text("/start").await;
    h.send(MessageContent::Photo {
        file_id: "missing".into(),
        file_size: None,
    })
    .await;

    assert_eq!(
        h.channel.last_text(),
        "❌ Error processing template. Please try again."
    );
    assert_eq!(h.state().await, SessionState::WaitingForTemplate);
}

#[tokio::test]
async fn test_non_image_document_is_rejected() {
    let h = Harness::new();
    h.collect(&[b"one"]).await;
    h.send(MessageContent::Document {
        file_id: "doc".into(),
        file_name: Some("notes.pdf".into()),
        mime_type: Some("application/pdf".into()),
        file_size: Some(100),
    })
    .await;

    assert_eq!(h.channel.last_text(), "Please send only image files.");
    assert_eq!(h.state().await, SessionState::CollectingImages);
}

#[tokio::test]
async fn test_image_document_is_a_product() {
    let h = Harness::new();
    h.collect(&[]).await;
    h.channel.add_file("doc", b"png-bytes");
    h.send(MessageContent::Document {
        file_id: "doc".into(),
        file_name: Some("shoe.png".into()),
        mime_type: Some("image/png".into()),
        file_size: Some(9),
    })
    .await;

    assert_eq!(h.pending().await.len(), 1);
    assert_eq!(h.state().await, SessionState::CollectingImages);
}

#[tokio::test]
async fn test_image_while_waiting_for_dimensions_is_rejected() {
    let h = Harness::new();
    h.collect(&[b"one"]).await;
    h.text("done").await;
    h.photo("late", b"late").await;

    assert_eq!(h.channel.last_text(), "Please use /start command first.");
    assert_eq!(h.state().await, SessionState::WaitingForDimensions);
    assert_eq!(h.pending().await.len(), 1);
}

#[tokio::test]
async fn test_bad_dimensions_keep_waiting() {
    let h = Harness::new();
    h.collect(&[b"one"]).await;
    h.text("done").await;

    h.text("big please").await;
    assert_eq!(
        h.channel.last_text(),
        "❌ Invalid format. Please use: width x height (e.g., 500x500)"
    );

    h.text("10 x 5000").await;
    assert_eq!(
        h.channel.last_text(),
        "❌ Dimensions must be between 50x50 and 2048x2048."
    );

    assert_eq!(h.state().await, SessionState::WaitingForDimensions);
    assert!(h.channel.images().is_empty());

    h.text("50X2048").await;
    assert_eq!(h.channel.images().len(), 1);
    assert_eq!(h.state().await, SessionState::TemplateSet);
}

#[tokio::test]
async fn test_other_text_gets_generic_reply() {
    let h = Harness::new();
    h.text("hello").await;
    assert_eq!(
        h.channel.last_text(),
        "I'm waiting for an image or a specific command. Use /start to begin."
    );
    assert_eq!(h.state().await, SessionState::Uninitialized);
}

#[tokio::test]
async fn test_reset_during_batch_wins() {
    let store = Arc::new(InMemorySessionStore::new());
    let hook_store = store.clone();
    let compositor = ScriptedCompositor {
        on_composite: Some(Box::new(move || {
            // The user sends /start while the first item is compositing
            let store = hook_store.clone();
            tokio::runtime::Handle::current().block_on(async move {
                store.reset_session(USER).await.unwrap();
                store
                    .set_state(USER, SessionState::WaitingForTemplate)
                    .await
                    .unwrap();
            });
        })),
    };
    let h = Harness::with_compositor(compositor, store);

    h.collect(&[b"one", b"two"]).await;
    h.text("done").await;
    h.text("500x500").await;

    assert_eq!(h.channel.images().len(), 2);
    assert_eq!(h.state().await, SessionState::WaitingForTemplate);
    assert!(h.pending().await.is_empty());
    assert_eq!(h.temp_files(), 0);
}

#[tokio::test]
async fn test_lost_summary_still_settles_session() {
    let h = Harness::new();
    h.collect(&[b"one"]).await;
    h.text("done").await;

    h.channel.fail_texts_containing("Processing Complete");
    h.text("500x500").await;

    assert_eq!(h.channel.images(), vec![b"out:one".to_vec()]);
    assert_eq!(h.state().await, SessionState::TemplateSet);
    assert!(h.pending().await.is_empty());
    assert!(h.store.get_dimensions(USER).await.unwrap().is_none());
    assert_eq!(h.temp_files(), 0);
    assert!(h.last_text_contains("Send more product images"));
}

// ============================================================================
// Failures and dispatch
// ============================================================================

struct DownStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::Connection("connection refused".into()))
}

#[async_trait]
impl SessionStore for DownStore {
    async fn reset_session(&self, _: &str) -> Result<(), StoreError> {
        down()
    }
    async fn get_state(&self, _: &str) -> Result<SessionState, StoreError> {
        down()
    }
    async fn set_state(&self, _: &str, _: SessionState) -> Result<(), StoreError> {
        down()
    }
    async fn set_template(&self, _: &str, _: &[u8]) -> Result<(), StoreError> {
        down()
    }
    async fn get_template(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
        down()
    }
    async fn add_pending_image(&self, _: &str, _: &str) -> Result<usize, StoreError> {
        down()
    }
    async fn get_pending_images(&self, _: &str) -> Result<Vec<String>, StoreError> {
        down()
    }
    async fn clear_pending_images(&self, _: &str) -> Result<(), StoreError> {
        down()
    }
    async fn set_dimensions(&self, _: &str, _: Dimensions) -> Result<(), StoreError> {
        down()
    }
    async fn get_dimensions(&self, _: &str) -> Result<Option<Dimensions>, StoreError> {
        down()
    }
    async fn complete_batch(&self, _: &str, _: &[String]) -> Result<bool, StoreError> {
        down()
    }
    async fn is_healthy(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_store_failure_gets_generic_reply() {
    let dir = tempfile::tempdir().unwrap();
    let channel = Arc::new(RecordingChannel::default());
    let workflow = Workflow::new(
        Arc::new(DownStore),
        channel.clone(),
        Arc::new(ScriptedCompositor::default()),
        TempAssets::new(dir.path()).unwrap(),
        &ImageConfig::default(),
    );

    let result = workflow.process(&message(MessageContent::from_text("/start"))).await;

    assert!(result.is_err());
    assert_eq!(
        channel.last_text(),
        "❌ An error occurred while processing your request. Please try again."
    );
}

#[tokio::test]
async fn test_dispatcher_drives_workflow_in_order() {
    let h = Harness::new();
    h.channel.add_file("template", b"template-bytes");
    h.channel.add_file("p1", b"first");
    h.channel.add_file("p2", b"second");

    let dispatcher = Dispatcher::new(h.workflow.clone(), Duration::from_secs(5), 16);
    let (tx, rx) = mpsc::channel(16);
    let run = tokio::spawn(dispatcher.run(rx));

    let photo = |id: &str| MessageContent::Photo {
        file_id: id.to_string(),
        file_size: None,
    };
    for content in [
        MessageContent::from_text("/start"),
        photo("template"),
        photo("p1"),
        photo("p2"),
        MessageContent::from_text("done"),
        MessageContent::from_text("500 x 500"),
    ] {
        tx.send(message(content)).await.unwrap();
    }
    drop(tx);
    run.await.unwrap();

    assert_eq!(h.channel.images().len(), 2);
    assert_eq!(h.state().await, SessionState::TemplateSet);
}

impl Harness {
    fn last_text_contains(&self, needle: &str) -> bool {
        self.channel.last_text().contains(needle)
    }
}
