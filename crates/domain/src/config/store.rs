use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Key-value store settings. The store itself is external; host/port
/// describe the production Redis deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "d_redis_host")]
    pub redis_host: String,
    #[serde(default = "d_redis_port")]
    pub redis_port: u16,
    /// TTL for `conversation:state:<id>` records.
    #[serde(default = "d_conversation_ttl")]
    pub conversation_ttl_secs: u64,
    /// TTL for `session:data:<id>` records.
    #[serde(default = "d_session_ttl")]
    pub session_ttl_secs: u64,
    /// TTL for `query:cache:<hash>` and `llm-analytics:<sha256>` records.
    #[serde(default = "d_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// TTL for `temp:lock:<id>` advisory locks.
    #[serde(default = "d_lock_ttl")]
    pub lock_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_host: d_redis_host(),
            redis_port: d_redis_port(),
            conversation_ttl_secs: d_conversation_ttl(),
            session_ttl_secs: d_session_ttl(),
            cache_ttl_secs: d_cache_ttl(),
            lock_ttl_secs: d_lock_ttl(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_redis_host() -> String {
    "127.0.0.1".into()
}
fn d_redis_port() -> u16 {
    6379
}
fn d_conversation_ttl() -> u64 {
    86_400 // 24 h
}
fn d_session_ttl() -> u64 {
    7_200 // 2 h
}
fn d_cache_ttl() -> u64 {
    3_600 // 1 h
}
fn d_lock_ttl() -> u64 {
    30
}
