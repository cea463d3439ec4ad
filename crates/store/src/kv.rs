//! The key-value store boundary.

use std::time::Duration;

use sy_domain::Result;

/// Trait that every key-value backend must implement.
///
/// Semantics expected of implementations: linearizable per key, TTL
/// expiry removes the key, `set_nx` is atomic set-if-absent.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value. `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, replacing any previous one. `ttl = None` persists
    /// until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomic set-if-absent. Returns `true` when the key was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Append to a value, creating it when absent. The TTL applies only
    /// on creation.
    async fn append(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
