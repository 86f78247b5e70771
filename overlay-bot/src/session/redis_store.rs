//! Redis-backed session store.

use super::{
    Dimensions, SessionKeys, SessionState, SessionStore, StoreError, StoreResult,
    FIELD_DIMENSIONS, FIELD_STATE,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Removes processed refs and moves the session back to `template_set`
/// only if it is still waiting for dimensions.
///
/// KEYS: fields hash, pending list. ARGV: expected state, next state, refs...
const COMPLETE_BATCH_SCRIPT: &str = r"
for i = 3, #ARGV do
    redis.call('LREM', KEYS[2], 0, ARGV[i])
end
if redis.call('HGET', KEYS[1], 'state') == ARGV[1] then
    redis.call('HSET', KEYS[1], 'state', ARGV[2])
    redis.call('HDEL', KEYS[1], 'dimensions')
    return 1
end
return 0
";

/// Session store on a Redis connection manager.
///
/// One connection serves both namespaces; template blobs are read as raw
/// bytes and hash fields as UTF-8, so no second decoding client is needed.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    key_prefix: String,
    complete_batch: redis::Script,
}

impl RedisSessionStore {
    /// Connect and verify the server answers PING.
    pub async fn connect(url: &str, key_prefix: &str, timeout_secs: u64) -> StoreResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let connect = client.get_connection_manager();
        let mut conn = tokio::time::timeout(Duration::from_secs(timeout_secs.max(1)), connect)
            .await
            .map_err(|_| StoreError::Connection(format!("timed out connecting to {url}")))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if pong != "PONG" {
            return Err(StoreError::Connection(format!("unexpected PING reply: {pong}")));
        }

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            complete_batch: redis::Script::new(COMPLETE_BATCH_SCRIPT),
        })
    }

    fn keys(&self, user: &str) -> SessionKeys {
        SessionKeys::new(&self.key_prefix, user)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn reset_session(&self, user: &str) -> StoreResult<()> {
        let keys = self.keys(user);
        let mut conn = self.conn();

        let _: () = redis::pipe()
            .atomic()
            .del(&keys.fields)
            .ignore()
            .del(&keys.pending)
            .ignore()
            .del(&keys.template)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::info!(user_id = %user, "Session reset");
        Ok(())
    }

    async fn get_state(&self, user: &str) -> StoreResult<SessionState> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.hget(self.keys(user).fields, FIELD_STATE).await?;
        raw.map_or(Ok(SessionState::Uninitialized), |s| s.parse())
    }

    async fn set_state(&self, user: &str, state: SessionState) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = conn
            .hset(self.keys(user).fields, FIELD_STATE, state.as_str())
            .await?;
        Ok(())
    }

    async fn set_template(&self, user: &str, data: &[u8]) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = conn.set(self.keys(user).template, data).await?;
        Ok(())
    }

    async fn get_template(&self, user: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        let data: Option<Vec<u8>> = conn.get(self.keys(user).template).await?;
        Ok(data)
    }

    async fn add_pending_image(&self, user: &str, image_ref: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        let len: usize = conn.rpush(self.keys(user).pending, image_ref).await?;
        Ok(len)
    }

    async fn get_pending_images(&self, user: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let refs: Vec<String> = conn.lrange(self.keys(user).pending, 0, -1).await?;
        Ok(refs)
    }

    async fn clear_pending_images(&self, user: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = conn.del(self.keys(user).pending).await?;
        Ok(())
    }

    async fn set_dimensions(&self, user: &str, dimensions: Dimensions) -> StoreResult<()> {
        let encoded = serde_json::to_string(&dimensions)?;
        let mut conn = self.conn();
        let _: () = conn
            .hset(self.keys(user).fields, FIELD_DIMENSIONS, encoded)
            .await?;
        Ok(())
    }

    async fn get_dimensions(&self, user: &str) -> StoreResult<Option<Dimensions>> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.hget(self.keys(user).fields, FIELD_DIMENSIONS).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    async fn complete_batch(&self, user: &str, processed: &[String]) -> StoreResult<bool> {
        let keys = self.keys(user);
        let mut conn = self.conn();

        let mut invocation = self.complete_batch.key(&keys.fields);
        invocation
            .key(&keys.pending)
            .arg(SessionState::WaitingForDimensions.as_str())
            .arg(SessionState::TemplateSet.as_str());
        for image_ref in processed {
            invocation.arg(image_ref);
        }

        let transitioned: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(transitioned == 1)
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.conn();
        matches!(
            redis::cmd("PING").query_async::<String>(&mut conn).await,
            Ok(ref response) if response == "PONG"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_unreachable_server_fails() {
        // Port 1 is never a Redis server
        let result = RedisSessionStore::connect("redis://127.0.0.1:1/", "", 1).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    async fn invalid_url_is_a_connection_error() {
        let result = RedisSessionStore::connect("not a url", "", 1).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    // The tests below need a live server.
    // Run with: REDIS_URL=redis://127.0.0.1/ cargo test -p overlay-bot -- --ignored

    /// Store under a fresh key prefix so runs never see each other's keys.
    async fn live_store() -> RedisSessionStore {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL not set");
        let prefix = format!("overlay-test:{}:", uuid::Uuid::new_v4().simple());
        RedisSessionStore::connect(&url, &prefix, 5).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn live_reset_clears_every_namespace() {
        let store = live_store().await;
        store.set_state("1", SessionState::CollectingImages).await.unwrap();
        store.set_template("1", b"tmpl").await.unwrap();
        store.add_pending_image("1", "/tmp/a.img").await.unwrap();
        store.set_dimensions("1", Dimensions::new(100, 100)).await.unwrap();
        store.set_state("2", SessionState::TemplateSet).await.unwrap();

        store.reset_session("1").await.unwrap();

        assert_eq!(store.get_state("1").await.unwrap(), SessionState::Uninitialized);
        assert!(store.get_template("1").await.unwrap().is_none());
        assert!(store.get_pending_images("1").await.unwrap().is_empty());
        assert!(store.get_dimensions("1").await.unwrap().is_none());
        assert_eq!(store.get_state("2").await.unwrap(), SessionState::TemplateSet);

        store.reset_session("2").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn live_template_round_trips_raw_bytes() {
        let store = live_store().await;
        let data = vec![0u8, 0xff, b'\r', b'\n', 0, 0x80, 0xfe];
        store.set_template("1", &data).await.unwrap();
        assert_eq!(store.get_template("1").await.unwrap(), Some(data));

        store.reset_session("1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn live_pending_images_keep_order() {
        let store = live_store().await;
        assert_eq!(store.add_pending_image("1", "c").await.unwrap(), 1);
        assert_eq!(store.add_pending_image("1", "a").await.unwrap(), 2);
        assert_eq!(store.add_pending_image("1", "b").await.unwrap(), 3);
        assert_eq!(
            store.get_pending_images("1").await.unwrap(),
            vec!["c".to_string(), "a".into(), "b".into()]
        );

        store.clear_pending_images("1").await.unwrap();
        assert!(store.get_pending_images("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn live_complete_batch_finishes_waiting_session() {
        let store = live_store().await;
        store.set_state("1", SessionState::WaitingForDimensions).await.unwrap();
        store.set_dimensions("1", Dimensions::new(500, 500)).await.unwrap();
        store.add_pending_image("1", "a").await.unwrap();
        store.add_pending_image("1", "b").await.unwrap();

        let done = store
            .complete_batch("1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert!(done);
        assert_eq!(store.get_state("1").await.unwrap(), SessionState::TemplateSet);
        assert!(store.get_pending_images("1").await.unwrap().is_empty());
        assert!(store.get_dimensions("1").await.unwrap().is_none());

        store.reset_session("1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn live_complete_batch_after_reset_keeps_new_session() {
        let store = live_store().await;
        store.set_state("1", SessionState::WaitingForDimensions).await.unwrap();
        store.set_dimensions("1", Dimensions::new(500, 500)).await.unwrap();
        store.add_pending_image("1", "old").await.unwrap();

        // User restarts while the batch is still running
        store.reset_session("1").await.unwrap();
        store.set_state("1", SessionState::CollectingImages).await.unwrap();
        store.add_pending_image("1", "new").await.unwrap();

        let done = store.complete_batch("1", &["old".to_string()]).await.unwrap();

        assert!(!done);
        assert_eq!(store.get_state("1").await.unwrap(), SessionState::CollectingImages);
        assert_eq!(store.get_pending_images("1").await.unwrap(), vec!["new".to_string()]);

        store.reset_session("1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn live_health_check_pings() {
        let store = live_store().await;
        assert!(store.is_healthy().await);
    }
}
