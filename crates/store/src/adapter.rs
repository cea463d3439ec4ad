//! Typed, namespaced access to the key-value store.
//!
//! All reads and writes from the rest of the system go through this
//! adapter: it owns the key layout, the per-namespace TTLs, JSON
//! (de)serialization, and the transient-error retry policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sy_domain::collab::ConversationState;
use sy_domain::config::StoreConfig;
use sy_domain::{Error, Result};

use crate::kv::KeyValueStore;

/// Backoff schedule for transient store failures.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(400),
    Duration::from_millis(1600),
];

/// The `session:data:<id>` record seeded by `initiate` and checked by
/// the stream subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub prompt: String,
    pub models: [String; 2],
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub struct StoreAdapter {
    store: Arc<dyn KeyValueStore>,
    config: StoreConfig,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        Self { store, config }
    }

    // ── key layout ──────────────────────────────────────────────────

    fn conversation_key(session_id: &str) -> String {
        format!("conversation:state:{session_id}")
    }

    fn session_key(session_id: &str) -> String {
        format!("session:data:{session_id}")
    }

    fn query_cache_key(hash: &str) -> String {
        format!("query:cache:{hash}")
    }

    fn analytics_key(digest: &str) -> String {
        format!("llm-analytics:{digest}")
    }

    fn lock_key(session_id: &str) -> String {
        format!("temp:lock:{session_id}")
    }

    // ── retry plumbing ──────────────────────────────────────────────

    /// Run `op` with the transient-failure retry schedule. Non-transient
    /// errors surface immediately.
    async fn with_retry<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < RETRY_BACKOFF.len() => {
                    let delay = RETRY_BACKOFF[attempt];
                    attempt += 1;
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ── JSON primitives ─────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.with_retry("get", || self.store.get(key)).await?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .map_err(|e| Error::StateStore(format!("corrupt record at {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.with_retry("set", || self.store.set(key, &raw, Some(ttl)))
            .await
    }

    // ── conversation state ──────────────────────────────────────────

    pub async fn load_conversation(&self, session_id: &str) -> Result<Option<ConversationState>> {
        self.get_json(&Self::conversation_key(session_id)).await
    }

    /// Atomic replacement of the whole conversation record.
    pub async fn save_conversation(&self, state: &ConversationState) -> Result<()> {
        self.put_json(
            &Self::conversation_key(&state.session_id),
            state,
            Duration::from_secs(self.config.conversation_ttl_secs),
        )
        .await
    }

    pub async fn delete_conversation(&self, session_id: &str) -> Result<()> {
        let key = Self::conversation_key(session_id);
        self.with_retry("delete", || self.store.delete(&key)).await
    }

    // ── session seed record ─────────────────────────────────────────

    pub async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.get_json(&Self::session_key(session_id)).await
    }

    pub async fn save_session(&self, session_id: &str, record: &SessionRecord) -> Result<()> {
        self.put_json(
            &Self::session_key(session_id),
            record,
            Duration::from_secs(self.config.session_ttl_secs),
        )
        .await
    }

    // ── caches ──────────────────────────────────────────────────────

    pub async fn analytics_cache_get(&self, digest: &str) -> Result<Option<String>> {
        let key = Self::analytics_key(digest);
        self.with_retry("get", || self.store.get(&key)).await
    }

    pub async fn analytics_cache_put(&self, digest: &str, value: &str) -> Result<()> {
        let key = Self::analytics_key(digest);
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        self.with_retry("set", || self.store.set(&key, value, Some(ttl)))
            .await
    }

    pub async fn query_cache_get(&self, hash: &str) -> Result<Option<String>> {
        let key = Self::query_cache_key(hash);
        self.with_retry("get", || self.store.get(&key)).await
    }

    pub async fn query_cache_put(&self, hash: &str, value: &str) -> Result<()> {
        let key = Self::query_cache_key(hash);
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        self.with_retry("set", || self.store.set(&key, value, Some(ttl)))
            .await
    }

    // ── advisory session lock ───────────────────────────────────────

    /// Claim the cross-process advisory lock for a session. The lock
    /// self-expires, so a crashed owner cannot wedge the session.
    pub async fn try_lock(&self, session_id: &str) -> Result<bool> {
        let key = Self::lock_key(session_id);
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        self.with_retry("set_nx", || self.store.set_nx(&key, "held", Some(ttl)))
            .await
    }

    pub async fn unlock(&self, session_id: &str) -> Result<()> {
        let key = Self::lock_key(session_id);
        self.with_retry("delete", || self.store.delete(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use parking_lot::Mutex;

    fn adapter() -> StoreAdapter {
        StoreAdapter::new(Arc::new(MemoryStore::new()), StoreConfig::default())
    }

    #[tokio::test]
    async fn conversation_round_trip() {
        let adapter = adapter();
        let state = ConversationState::new("s1", "what is 15 x 17?", vec!["a".into(), "b".into()]);
        adapter.save_conversation(&state).await.unwrap();

        let loaded = adapter.load_conversation("s1").await.unwrap().unwrap();
        assert_eq!(loaded.original_query, "what is 15 x 17?");
        assert_eq!(loaded.participants, vec!["a", "b"]);

        assert!(adapter.load_conversation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn advisory_lock_is_exclusive() {
        let adapter = adapter();
        assert!(adapter.try_lock("s1").await.unwrap());
        assert!(!adapter.try_lock("s1").await.unwrap());
        adapter.unlock("s1").await.unwrap();
        assert!(adapter.try_lock("s1").await.unwrap());
    }

    /// A store that fails the first N calls with a transient error.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: Mutex<usize>,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures_left: Mutex::new(failures),
            }
        }

        fn trip(&self) -> Result<()> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(Error::StateStore("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.trip()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
            self.trip()?;
            self.inner.set(key, value, ttl).await
        }
        async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
            self.trip()?;
            self.inner.set_nx(key, value, ttl).await
        }
        async fn append(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
            self.trip()?;
            self.inner.append(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.trip()?;
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let adapter = StoreAdapter::new(Arc::new(FlakyStore::new(2)), StoreConfig::default());
        let state = ConversationState::new("s1", "q", vec!["a".into(), "b".into()]);
        // First two set attempts fail; the third succeeds.
        adapter.save_conversation(&state).await.unwrap();
        assert!(adapter.load_conversation("s1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let adapter = StoreAdapter::new(Arc::new(FlakyStore::new(10)), StoreConfig::default());
        let state = ConversationState::new("s1", "q", vec!["a".into(), "b".into()]);
        let err = adapter.save_conversation(&state).await.unwrap_err();
        assert!(matches!(err, Error::StateStore(_)));
    }
}
