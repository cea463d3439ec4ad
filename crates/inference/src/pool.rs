//! Bounded per-model pools of inference contexts.
//!
//! Each pool hands out at most `max_size` concurrent [`ContextLease`]s.
//! Waiters queue FIFO on a fair semaphore and fail with `ContextTimeout`
//! on expiry. A lease returns its slot on drop, so release happens on
//! every exit path, cancellation included. Slots whose context entered
//! an unrecoverable state are marked poisoned and rebuilt lazily on the
//! next acquire.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use sy_domain::config::ModelsConfig;
use sy_domain::{Error, Result};

use crate::registry::ModelSpec;
use crate::traits::{InferenceSession, ModelBackend};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub model_path: PathBuf,
    pub context_size: u32,
    pub batch_size: u32,
    pub threads: u32,
    pub gpu_layers: u32,
}

impl PoolConfig {
    pub fn for_model(models: &ModelsConfig, spec: &ModelSpec) -> Self {
        Self {
            max_size: models.contexts_per_model,
            model_path: spec.path.clone(),
            context_size: spec.context_size,
            batch_size: models.batch_size,
            threads: models.threads,
            gpu_layers: models.gpu_layers,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Slot {
    index: usize,
    /// `None` after a poisoned release; rebuilt on next acquire.
    session: Option<Arc<dyn InferenceSession>>,
}

pub struct ContextPool {
    model_id: String,
    spec: ModelSpec,
    backend: Arc<dyn ModelBackend>,
    semaphore: Arc<Semaphore>,
    free: Mutex<Vec<Slot>>,
    max_size: usize,
    in_use: AtomicUsize,
    shut_down: AtomicBool,
}

impl ContextPool {
    pub fn new(backend: Arc<dyn ModelBackend>, spec: ModelSpec, config: PoolConfig) -> Self {
        let free = (0..config.max_size)
            .map(|index| Slot {
                index,
                session: None,
            })
            .collect();
        Self {
            model_id: spec.id.clone(),
            spec,
            backend,
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            free: Mutex::new(free),
            max_size: config.max_size,
            in_use: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Build every slot's context up front.
    ///
    /// All leases are held until the last acquire so each distinct slot
    /// gets visited; releasing earlier would hand the same slot back.
    /// On failure the empty slot stays lazy and the next acquire
    /// retries it.
    pub async fn warm(self: &Arc<Self>) -> Result<()> {
        let mut leases = Vec::with_capacity(self.max_size);
        for _ in 0..self.max_size {
            leases.push(self.acquire(Duration::from_secs(5)).await?);
        }
        Ok(())
    }

    /// Acquire an exclusive context lease.
    ///
    /// Returns immediately when a context is free, else queues FIFO
    /// behind earlier waiters until one is released or `timeout` elapses.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<ContextLease> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::Other(format!(
                "context pool for {} is shut down",
                self.model_id
            )));
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // Semaphore closed: shutdown drained the waiters.
            Ok(Err(_)) => {
                return Err(Error::Other(format!(
                    "context pool for {} shut down while waiting",
                    self.model_id
                )))
            }
            Err(_) => {
                return Err(Error::ContextTimeout {
                    model: self.model_id.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        };

        let mut slot = match self.free.lock().pop() {
            Some(slot) => slot,
            None => {
                return Err(Error::Other(format!(
                    "context pool for {} has a permit without a slot",
                    self.model_id
                )))
            }
        };

        let session = match slot.session.take() {
            Some(session) => session,
            None => match self.backend.open_session(&self.spec).await {
                Ok(session) => {
                    tracing::info!(
                        model_id = %self.model_id,
                        slot = slot.index,
                        "inference context built"
                    );
                    Arc::from(session)
                }
                Err(e) => {
                    // Return the empty slot; the permit drop wakes the
                    // next waiter.
                    self.free.lock().push(slot);
                    drop(permit);
                    return Err(e);
                }
            },
        };

        self.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(ContextLease {
            pool: Arc::clone(self),
            slot_index: slot.index,
            session,
            _permit: Some(permit),
            poisoned: false,
        })
    }

    /// Drain waiters with failure and dispose all contexts.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.semaphore.close();
        self.free.lock().clear();
        tracing::info!(model_id = %self.model_id, "context pool shut down");
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Leases currently held (monitoring).
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn return_slot(&self, index: usize, session: Option<Arc<dyn InferenceSession>>) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if self.shut_down.load(Ordering::Acquire) {
            // Pool is gone; dispose rather than re-home.
            return;
        }
        self.free.lock().push(Slot { index, session });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lease
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exclusive use of one inference context. The slot returns to the pool
/// on drop, on every exit path including cancellation, and the permit
/// release wakes the next FIFO waiter.
pub struct ContextLease {
    pool: Arc<ContextPool>,
    slot_index: usize,
    session: Arc<dyn InferenceSession>,
    _permit: Option<OwnedSemaphorePermit>,
    poisoned: bool,
}

impl std::fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("slot_index", &self.slot_index)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl ContextLease {
    pub fn session(&self) -> &Arc<dyn InferenceSession> {
        &self.session
    }

    /// Mark the underlying context unrecoverable. On release the slot is
    /// disposed and rebuilt lazily by the next acquire.
    pub fn mark_poisoned(&mut self) {
        self.poisoned = true;
    }

    /// Explicit release; equivalent to dropping the lease.
    pub fn release(self) {}
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let session = if self.poisoned {
            tracing::warn!(
                model_id = %self.pool.model_id,
                slot = self.slot_index,
                "poisoned context disposed; slot rebuilds on next acquire"
            );
            None
        } else {
            Some(Arc::clone(&self.session))
        };
        self.pool.return_slot(self.slot_index, session);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One pool per model, created on first use.
pub struct PoolManager {
    backend: Arc<dyn ModelBackend>,
    config: ModelsConfig,
    pools: RwLock<HashMap<String, Arc<ContextPool>>>,
}

impl PoolManager {
    pub fn new(backend: Arc<dyn ModelBackend>, config: ModelsConfig) -> Self {
        Self {
            backend,
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool_for(&self, spec: &ModelSpec) -> Arc<ContextPool> {
        if let Some(pool) = self.pools.read().get(&spec.id) {
            return pool.clone();
        }
        let mut pools = self.pools.write();
        pools
            .entry(spec.id.clone())
            .or_insert_with(|| {
                tracing::info!(
                    model_id = %spec.id,
                    max_size = self.config.contexts_per_model,
                    "context pool created"
                );
                Arc::new(ContextPool::new(
                    self.backend.clone(),
                    spec.clone(),
                    PoolConfig::for_model(&self.config, spec),
                ))
            })
            .clone()
    }

    pub fn shutdown_all(&self) {
        for pool in self.pools.read().values() {
            pool.shutdown();
        }
    }

    /// `(model_id, in_use, capacity)` per pool, for the health endpoint.
    pub fn snapshot(&self) -> Vec<(String, usize, usize)> {
        self.pools
            .read()
            .values()
            .map(|p| (p.model_id().to_owned(), p.in_use(), p.capacity()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::TemplateFamily;
    use crate::registry::{ModelSettings, ModelSpec};
    use crate::traits::GenerationRequest;
    use sy_domain::events::BoxStream;

    struct TestBackend {
        opened: AtomicUsize,
    }

    impl TestBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
            })
        }
    }

    struct TestSession;

    #[async_trait::async_trait]
    impl InferenceSession for TestSession {
        async fn generate(
            &self,
            _req: GenerationRequest,
        ) -> Result<BoxStream<'static, Result<String>>> {
            Ok(Box::pin(futures_util::stream::empty()))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0])
        }
    }

    #[async_trait::async_trait]
    impl ModelBackend for TestBackend {
        async fn open_session(&self, _spec: &ModelSpec) -> Result<Box<dyn InferenceSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestSession))
        }
    }

    fn spec() -> ModelSpec {
        ModelSpec {
            id: "test-model".into(),
            name: "Test Model".into(),
            path: PathBuf::from("test-model.gguf"),
            context_size: 4096,
            template: TemplateFamily::ChatMl,
            settings: ModelSettings::default(),
        }
    }

    fn pool(backend: Arc<TestBackend>, max_size: usize) -> Arc<ContextPool> {
        let config = PoolConfig {
            max_size,
            model_path: PathBuf::from("test-model.gguf"),
            context_size: 4096,
            batch_size: 512,
            threads: 4,
            gpu_layers: 0,
        };
        Arc::new(ContextPool::new(backend, spec(), config))
    }

    #[tokio::test]
    async fn concurrent_holders_bounded_by_max_size() {
        let pool = pool(TestBackend::new(), 2);

        let l1 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let l2 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(pool.in_use(), 2);

        // Third acquire times out while both are held.
        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::ContextTimeout { .. }));

        drop(l1);
        let l3 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(pool.in_use(), 2);
        drop(l2);
        drop(l3);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn zero_timeout_returns_immediately() {
        let pool = pool(TestBackend::new(), 1);
        let lease = pool.acquire(Duration::ZERO).await.unwrap();

        let err = pool.acquire(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::ContextTimeout { .. }));
        drop(lease);
    }

    #[tokio::test]
    async fn warm_builds_every_distinct_slot() {
        let backend = TestBackend::new();
        let pool = pool(backend.clone(), 3);

        pool.warm().await.unwrap();
        assert_eq!(backend.opened.load(Ordering::SeqCst), 3);
        assert_eq!(pool.in_use(), 0);

        // A second warm finds every slot already built.
        pool.warm().await.unwrap();
        assert_eq!(backend.opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sessions_are_reused_across_leases() {
        let backend = TestBackend::new();
        let pool = pool(backend.clone(), 1);

        for _ in 0..3 {
            let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();
            drop(lease);
        }
        assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poisoned_slot_rebuilds_on_next_acquire() {
        let backend = TestBackend::new();
        let pool = pool(backend.clone(), 1);

        let mut lease = pool.acquire(Duration::from_secs(1)).await.unwrap();
        lease.mark_poisoned();
        drop(lease);

        let _lease = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn release_happens_when_holder_task_is_cancelled() {
        let pool = pool(TestBackend::new(), 1);

        let held = pool.clone();
        let task = tokio::spawn(async move {
            let _lease = held.acquire(Duration::from_secs(1)).await.unwrap();
            // Hold the lease until the task is aborted.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        let _ = task.await;

        // The aborted task's lease must have been released.
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();
        drop(lease);
    }

    #[tokio::test]
    async fn shutdown_drains_waiters_with_failure() {
        let pool = pool(TestBackend::new(), 1);
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let waiter = pool.clone();
        let task = tokio::spawn(async move {
            waiter.acquire(Duration::from_secs(30)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.shutdown();
        let result = task.await.unwrap();
        assert!(result.is_err());

        // New acquires fail immediately after shutdown.
        assert!(pool.acquire(Duration::from_secs(1)).await.is_err());
        drop(lease);
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_order() {
        let pool = pool(TestBackend::new(), 1);
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for i in 0..3 {
            let pool = pool.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let lease = pool.acquire(Duration::from_secs(5)).await.unwrap();
                order.lock().push(i);
                drop(lease);
            }));
            // Stagger arrivals so the queue order is deterministic.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(lease);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
