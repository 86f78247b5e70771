//! Per-user session persistence.
//!
//! A session is four pieces of state keyed by user id: the conversation
//! state, the template image, the ordered list of pending product images
//! and the (single-use) output dimensions. The store owns them; the
//! workflow reads and writes through [`SessionStore`] on every event and
//! keeps nothing in memory between events.
//!
//! ```text
//! user:<id>                 hash   { state, dimensions }
//! user:<id>:pending_images  list   [ ref, ref, ... ]
//! template:<id>             string <raw image bytes>
//! ```

mod memory;
mod redis_store;

pub use memory::InMemorySessionStore;
pub use redis_store::RedisSessionStore;

use async_trait::async_trait;
use overlay_common::config::{StoreBackend, StoreConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Data model
// ============================================================================

/// Conversation state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session stored yet.
    #[default]
    Uninitialized,
    WaitingForTemplate,
    TemplateSet,
    CollectingImages,
    WaitingForDimensions,
}

impl SessionState {
    /// Every state, in workflow order.
    pub const ALL: [Self; 5] = [
        Self::Uninitialized,
        Self::WaitingForTemplate,
        Self::TemplateSet,
        Self::CollectingImages,
        Self::WaitingForDimensions,
    ];

    /// Stored string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::WaitingForTemplate => "waiting_for_template",
            Self::TemplateSet => "template_set",
            Self::CollectingImages => "collecting_images",
            Self::WaitingForDimensions => "waiting_for_dimensions",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown session state: {s}")))
    }
}

/// Target size of a composited product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Key layout for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Hash holding `state` and `dimensions`.
    pub fields: String,
    /// Ordered list of pending image references.
    pub pending: String,
    /// Binary template blob.
    pub template: String,
}

impl SessionKeys {
    pub fn new(prefix: &str, user: &str) -> Self {
        Self {
            fields: format!("{prefix}user:{user}"),
            pending: format!("{prefix}user:{user}:pending_images"),
            template: format!("{prefix}template:{user}"),
        }
    }
}

/// Hash field names.
pub(crate) const FIELD_STATE: &str = "state";
pub(crate) const FIELD_DIMENSIONS: &str = "dimensions";

// ============================================================================
// Errors
// ============================================================================

/// Session store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Corrupt session data: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            Self::Connection(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Store trait
// ============================================================================

/// Durable per-user session state.
///
/// Safe to call concurrently for different users. Calls for one user are
/// serialized by the dispatcher; each individual operation is atomic.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Delete every key of the user in one transaction.
    async fn reset_session(&self, user: &str) -> StoreResult<()>;

    /// Current state; `Uninitialized` when nothing is stored.
    async fn get_state(&self, user: &str) -> StoreResult<SessionState>;

    async fn set_state(&self, user: &str, state: SessionState) -> StoreResult<()>;

    async fn set_template(&self, user: &str, data: &[u8]) -> StoreResult<()>;

    async fn get_template(&self, user: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Append a reference; returns the new list length.
    async fn add_pending_image(&self, user: &str, image_ref: &str) -> StoreResult<usize>;

    /// Pending references in insertion order.
    async fn get_pending_images(&self, user: &str) -> StoreResult<Vec<String>>;

    async fn clear_pending_images(&self, user: &str) -> StoreResult<()>;

    async fn set_dimensions(&self, user: &str, dimensions: Dimensions) -> StoreResult<()>;

    async fn get_dimensions(&self, user: &str) -> StoreResult<Option<Dimensions>>;

    /// Finish a batch run atomically.
    ///
    /// Removes exactly `processed` from the pending list. If the state is
    /// still `WaitingForDimensions` it becomes `TemplateSet` and the
    /// dimensions are dropped; returns whether that happened. A session
    /// reset while the batch ran is left untouched.
    async fn complete_batch(&self, user: &str, processed: &[String]) -> StoreResult<bool>;

    /// Check if the backing store is reachable.
    async fn is_healthy(&self) -> bool;
}

/// Create the configured store. Fails if the backend is unreachable.
pub async fn create_store(config: &StoreConfig) -> StoreResult<Arc<dyn SessionStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let url = config
                .url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| StoreError::Connection("store.url is not configured".into()))?;
            let store = RedisSessionStore::connect(url, &config.key_prefix, config.timeout_secs)
                .await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory session store; sessions are lost on restart");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
    }
}
