//! Per-user ordered message dispatch.
//!
//! Every user with recent traffic owns a worker task fed by its own queue,
//! so one user's messages are handled strictly in arrival order while
//! different users proceed in parallel. Per-user queues never drop: a
//! backlog past the warning threshold is only logged, and overall
//! backpressure comes from the bounded inbound queue feeding [`Dispatcher::run`].
//! A worker that stays idle closes its queue, drains what is left and
//! exits; the next message for that user starts a fresh worker which first
//! waits for the old one.

use crate::message::ChannelMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Something that handles one incoming message at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, msg: ChannelMessage) -> anyhow::Result<()>;
}

struct Worker {
    tx: mpsc::UnboundedSender<ChannelMessage>,
    backlog: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Queue `msg`, handing it back if the worker has retired.
    fn push(&self, msg: ChannelMessage) -> Result<usize, ChannelMessage> {
        let queued = self.backlog.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send(msg).map(|()| queued).map_err(|e| {
            self.backlog.fetch_sub(1, Ordering::SeqCst);
            e.0
        })
    }
}

/// Routes messages to per-user workers.
pub struct Dispatcher<H> {
    handler: Arc<H>,
    idle_timeout: Duration,
    backlog_warning: usize,
}

impl<H: MessageHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, idle_timeout: Duration, backlog_warning: usize) -> Self {
        Self {
            handler,
            idle_timeout,
            backlog_warning: backlog_warning.max(1),
        }
    }

    /// Dispatch until `rx` closes, then wait for all workers to finish.
    pub async fn run(self, mut rx: mpsc::Receiver<ChannelMessage>) {
        let mut workers: HashMap<String, Worker> = HashMap::new();

        while let Some(msg) = rx.recv().await {
            let user = msg.user_id.clone();
            let trace_id = msg.trace_id.clone();

            let msg = match workers.get(&user) {
                Some(worker) => match worker.push(msg) {
                    Ok(queued) => {
                        self.note_backlog(&user, &trace_id, queued);
                        continue;
                    }
                    Err(msg) => msg,
                },
                None => msg,
            };

            // Retired or missing worker: start a new one behind the old
            let previous = workers.remove(&user).map(|w| w.handle);
            workers.retain(|_, w| !w.handle.is_finished());

            let worker = self.spawn_worker(&user, previous);
            if worker.push(msg).is_err() {
                tracing::error!(user_id = %user, %trace_id, "Fresh worker rejected message");
            }
            workers.insert(user, worker);
        }

        tracing::info!(workers = workers.len(), "Inbound stream closed, draining workers");
        for (_, worker) in workers {
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                tracing::error!("Worker task failed: {e}");
            }
        }
    }

    fn note_backlog(&self, user: &str, trace_id: &str, queued: usize) {
        if queued > self.backlog_warning {
            tracing::warn!(
                user_id = %user,
                %trace_id,
                queued,
                threshold = self.backlog_warning,
                "User backlog is growing"
            );
        }
    }

    fn spawn_worker(&self, user: &str, previous: Option<JoinHandle<()>>) -> Worker {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let handler = Arc::clone(&self.handler);
        let idle_timeout = self.idle_timeout;
        let user = user.to_string();
        let counter = Arc::clone(&backlog);

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::error!(user_id = %user, "Previous worker failed: {e}");
                }
            }
            tracing::debug!(user_id = %user, "Worker started");
            worker_loop(handler, rx, counter, idle_timeout).await;
            tracing::debug!(user_id = %user, "Worker stopped");
        });

        Worker {
            tx,
            backlog,
            handle,
        }
    }
}

async fn worker_loop<H: MessageHandler>(
    handler: Arc<H>,
    mut rx: mpsc::UnboundedReceiver<ChannelMessage>,
    backlog: Arc<AtomicUsize>,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(msg)) => handle_one(handler.as_ref(), &backlog, msg).await,
            Ok(None) => return,
            Err(_) => {
                rx.close();
                while let Some(msg) = rx.recv().await {
                    handle_one(handler.as_ref(), &backlog, msg).await;
                }
                return;
            }
        }
    }
}

async fn handle_one<H: MessageHandler>(handler: &H, backlog: &AtomicUsize, msg: ChannelMessage) {
    backlog.fetch_sub(1, Ordering::SeqCst);
    let user_id = msg.user_id.clone();
    let trace_id = msg.trace_id.clone();
    if let Err(e) = handler.handle(msg).await {
        tracing::error!(%user_id, %trace_id, "Failed to handle message: {e:#}");
    }
}
