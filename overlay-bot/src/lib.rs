//! Overlay Bot - a Telegram bot that composites product photos onto templates.
//!
//! ## Architecture
//!
//! The bot long-polls Telegram, hands every update to a per-user worker and
//! lets the workflow advance that user's session, which lives entirely in
//! the session store.
//!
//! ```text
//! Telegram → listen → Dispatcher → Workflow ⇄ SessionStore (Redis)
//!                                     ↓
//! User ←── send/edit ←── Channel ← Compositor
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod assets;
pub mod compositor;
pub mod dispatcher;
pub mod message;
pub mod routes;
pub mod session;
pub mod telegram;
pub mod traits;
pub mod workflow;

// Re-export commonly used types
pub use assets::TempAssets;
pub use compositor::{
    BackgroundRemover, BorderKeyRemover, CompositeError, CompositeJob, Compositor,
    ImageCompositor, ImageInfo,
};
pub use dispatcher::{Dispatcher, MessageHandler};
pub use message::{ChannelMessage, MessageContent, OutgoingContent, OutgoingMessage};
pub use routes::{build_router, HealthState};
pub use session::{
    create_store, Dimensions, InMemorySessionStore, RedisSessionStore, SessionState,
    SessionStore, StoreError,
};
pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelError, ChannelResult};
pub use workflow::{BatchReport, Workflow};

use anyhow::Context;
use overlay_common::config::Config;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the queue between the poller and the dispatcher.
const INBOUND_QUEUE: usize = 256;

/// Run the poller until it stops, keeping `alive` in sync.
pub fn spawn_poller(
    channel: Arc<dyn Channel>,
    tx: mpsc::Sender<ChannelMessage>,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    alive.store(true, Ordering::SeqCst);
    tokio::spawn(async move {
        match channel.listen(tx).await {
            Ok(()) => tracing::info!(channel = channel.name(), "Listener stopped"),
            Err(e) => tracing::error!(channel = channel.name(), "Listener failed: {e}"),
        }
        alive.store(false, Ordering::SeqCst);
    })
}

/// Connect everything and serve until interrupted.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.health.host.parse::<std::net::IpAddr>()?,
        config.health.port,
    ));

    let store = create_store(&config.store)
        .await
        .context("connecting to session store")?;

    let token = config.bot_token().context("bot token is not configured")?;
    let telegram = TelegramChannel::new(token.to_string(), config.bot.allowed_users.clone())
        .with_poll_timeout(config.bot.poll_timeout_secs);
    telegram.init().await.context("verifying bot token")?;
    let channel: Arc<dyn Channel> = Arc::new(telegram);

    let assets = TempAssets::new(config.images.temp_dir_path())?;
    let compositor: Arc<dyn Compositor> = Arc::new(ImageCompositor::new(&config.images));
    let workflow = Arc::new(Workflow::new(
        Arc::clone(&store),
        Arc::clone(&channel),
        compositor,
        assets,
        &config.images,
    ));

    let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
    let dispatcher = Dispatcher::new(
        workflow,
        Duration::from_secs(config.bot.worker_idle_secs),
        config.bot.backlog_warning,
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(rx));

    let bot_alive = Arc::new(AtomicBool::new(false));
    let poller_handle = spawn_poller(Arc::clone(&channel), tx, Arc::clone(&bot_alive));

    let router = build_router(HealthState::new(bot_alive, store));

    tracing::info!("Starting Overlay Bot health server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop polling; the dispatcher drains once the sender is gone
    poller_handle.abort();
    if let Err(e) = dispatcher_handle.await {
        tracing::error!("Dispatcher task failed: {e}");
    }

    tracing::info!("Overlay Bot stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
