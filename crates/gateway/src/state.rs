use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use sy_domain::config::Config;
use sy_engine::{AgreementAnalyzer, AnalyticsEngine, Compressor, Curator, PhaseMachine};
use sy_inference::{ModelBackend, ModelRegistry, PoolManager};
use sy_sessions::{ConversationStateManager, SessionLockMap};
use sy_store::{MemoryStore, StoreAdapter};

use crate::runtime::cancel::CancelMap;
use crate::runtime::stream_hub::StreamHub;

/// The curator-backed analysis services. Absent when no models were
/// discovered; `initiate` pre-flights on this.
#[derive(Clone)]
pub struct EngineBundle {
    pub curator: Arc<Curator>,
    pub analytics: Arc<AnalyticsEngine>,
    pub compressor: Arc<Compressor>,
    pub agreement: Arc<AgreementAnalyzer>,
}

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, store, model registry, pools
/// - **Session management** — conversation state, locks, cancellation
/// - **Analysis** — the curator-backed engine bundle
/// - **Streaming** — the per-session SSE fan-out
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<StoreAdapter>,
    /// The in-process key-value backend, kept for TTL sweeps and health.
    pub kv: Arc<MemoryStore>,
    pub registry: Arc<ModelRegistry>,
    pub pools: Arc<PoolManager>,

    // ── Session management ────────────────────────────────────────────
    pub conversations: Arc<ConversationStateManager>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
    /// Sessions currently orchestrating (admission gate).
    pub active_sessions: Arc<AtomicUsize>,

    // ── Analysis ──────────────────────────────────────────────────────
    pub engine: Option<EngineBundle>,
    pub phase_machine: Arc<PhaseMachine>,

    // ── Streaming ─────────────────────────────────────────────────────
    pub streams: Arc<StreamHub>,
}

/// Wire up the full application state from its roots. `main` calls this
/// with the llama.cpp backend; integration tests inject scripted
/// backends and a fresh in-memory store.
pub fn build_state(
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn ModelBackend>,
    kv: Arc<MemoryStore>,
) -> AppState {
    let store = Arc::new(StoreAdapter::new(kv.clone(), config.store.clone()));
    let pools = Arc::new(PoolManager::new(backend, config.models.clone()));
    let conversations = Arc::new(ConversationStateManager::new(store.clone()));

    let acquire_timeout = Duration::from_secs(config.collab.acquire_timeout_secs);
    let curator_spec = config
        .models
        .curator
        .as_deref()
        .and_then(|id| registry.get(id))
        .or_else(|| registry.list().first())
        .cloned();

    let engine = curator_spec.map(|spec| {
        let curator = Arc::new(Curator::new(
            pools.pool_for(&spec),
            &spec,
            acquire_timeout,
        ));
        tracing::info!(curator = %spec.id, "curator model selected");
        EngineBundle {
            analytics: Arc::new(AnalyticsEngine::new(curator.clone(), store.clone())),
            compressor: Arc::new(Compressor::new(
                curator.clone(),
                config.collab.compression_min_tokens,
            )),
            agreement: Arc::new(AgreementAnalyzer::new(
                curator.clone(),
                config.collab.clone(),
            )),
            curator,
        }
    });
    if engine.is_none() {
        tracing::warn!("no models discovered — collaboration endpoints will refuse requests");
    }

    AppState {
        phase_machine: Arc::new(PhaseMachine::new(config.collab.max_rounds_per_phase)),
        streams: Arc::new(StreamHub::new(
            Duration::from_secs(config.collab.slow_consumer_secs),
        )),
        config,
        store,
        kv,
        registry,
        pools,
        conversations,
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        active_sessions: Arc::new(AtomicUsize::new(0)),
        engine,
    }
}
