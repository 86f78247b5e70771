//! Process-local session store.

use super::{Dimensions, SessionState, SessionStore, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct SessionFields {
    state: Option<SessionState>,
    dimensions: Option<Dimensions>,
}

/// Both namespaces under one lock so a reset is never observed half done.
#[derive(Debug, Default)]
struct Inner {
    fields: HashMap<String, SessionFields>,
    pending: HashMap<String, Vec<String>>,
    templates: HashMap<String, Vec<u8>>,
}

/// In-memory session store for tests and single-process development.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<Inner>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with any stored key.
    pub async fn session_count(&self) -> usize {
        let inner = self.inner.read().await;
        let mut users: Vec<&String> = inner
            .fields
            .keys()
            .chain(inner.pending.keys())
            .chain(inner.templates.keys())
            .collect();
        users.sort();
        users.dedup();
        users.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn reset_session(&self, user: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.fields.remove(user);
        inner.pending.remove(user);
        inner.templates.remove(user);
        tracing::info!(user_id = %user, "Session reset");
        Ok(())
    }

    async fn get_state(&self, user: &str) -> StoreResult<SessionState> {
        let inner = self.inner.read().await;
        Ok(inner
            .fields
            .get(user)
            .and_then(|f| f.state)
            .unwrap_or_default())
    }

    async fn set_state(&self, user: &str, state: SessionState) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.fields.entry(user.to_string()).or_default().state = Some(state);
        Ok(())
    }

    async fn set_template(&self, user: &str, data: &[u8]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.templates.insert(user.to_string(), data.to_vec());
        Ok(())
    }

    async fn get_template(&self, user: &str) -> StoreResult<Option<Vec<u8>>> {
        let inner = self.inner.read().await;
        Ok(inner.templates.get(user).cloned())
    }

    async fn add_pending_image(&self, user: &str, image_ref: &str) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let list = inner.pending.entry(user.to_string()).or_default();
        list.push(image_ref.to_string());
        Ok(list.len())
    }

    async fn get_pending_images(&self, user: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner.pending.get(user).cloned().unwrap_or_default())
    }

    async fn clear_pending_images(&self, user: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.pending.remove(user);
        Ok(())
    }

    async fn set_dimensions(&self, user: &str, dimensions: Dimensions) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.fields.entry(user.to_string()).or_default().dimensions = Some(dimensions);
        Ok(())
    }

    async fn get_dimensions(&self, user: &str) -> StoreResult<Option<Dimensions>> {
        let inner = self.inner.read().await;
        Ok(inner.fields.get(user).and_then(|f| f.dimensions))
    }

    async fn complete_batch(&self, user: &str, processed: &[String]) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;

        if let Some(list) = inner.pending.get_mut(user) {
            list.retain(|r| !processed.contains(r));
            if list.is_empty() {
                inner.pending.remove(user);
            }
        }

        match inner.fields.get_mut(user) {
            Some(fields) if fields.state == Some(SessionState::WaitingForDimensions) => {
                fields.state = Some(SessionState::TemplateSet);
                fields.dimensions = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
