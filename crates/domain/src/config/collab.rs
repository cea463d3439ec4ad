use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaboration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabConfig {
    /// Cap on sessions orchestrated concurrently.
    #[serde(default = "d_max_sessions")]
    pub max_concurrent_sessions: usize,
    /// Rounds allowed per phase before forced advance (each round is one
    /// turn from each participant).
    #[serde(default = "d_max_rounds")]
    pub max_rounds_per_phase: u32,
    /// Context-pool acquisition timeout.
    #[serde(default = "d_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// Ceiling on total context-window usage (history + generation +
    /// system) as a fraction of the model window.
    #[serde(default = "d_max_usage")]
    pub max_context_usage: f32,
    /// Stage 1 short-circuit: both answers explicit, equal, and at least
    /// this confident.
    #[serde(default = "d_fast_path")]
    pub fast_path_confidence_threshold: f32,
    /// Stage 2: overall similarity at or above this is STRONG_AGREEMENT.
    #[serde(default = "d_semantic")]
    pub semantic_similarity_threshold: f32,
    /// Stage 2: overall similarity at or below this escalates to the
    /// arbiter.
    #[serde(default = "d_escalation")]
    pub arbiter_escalation_threshold: f32,
    /// Minimum recommendation confidence for a jump to CONSENSUS.
    #[serde(default = "d_jump")]
    pub consensus_jump_threshold: f32,
    /// Turns shorter than this bypass compression.
    #[serde(default = "d_compress_min")]
    pub compression_min_tokens: u32,
    /// Heartbeat interval on the SSE stream.
    #[serde(default = "d_heartbeat")]
    pub heartbeat_secs: u64,
    /// Maximum session age when the stream subscription is opened.
    #[serde(default = "d_max_age_dev")]
    pub max_session_age_dev_secs: u64,
    #[serde(default = "d_max_age_prod")]
    pub max_session_age_prod_secs: u64,
    /// A subscriber slower than this on a single event write gets the
    /// session cancelled.
    #[serde(default = "d_slow_consumer")]
    pub slow_consumer_secs: u64,
    /// Tokens batched per TOKEN_CHUNK frame.
    #[serde(default = "d_chunk")]
    pub token_chunk_size: usize,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: d_max_sessions(),
            max_rounds_per_phase: d_max_rounds(),
            acquire_timeout_secs: d_acquire_timeout(),
            max_context_usage: d_max_usage(),
            fast_path_confidence_threshold: d_fast_path(),
            semantic_similarity_threshold: d_semantic(),
            arbiter_escalation_threshold: d_escalation(),
            consensus_jump_threshold: d_jump(),
            compression_min_tokens: d_compress_min(),
            heartbeat_secs: d_heartbeat(),
            max_session_age_dev_secs: d_max_age_dev(),
            max_session_age_prod_secs: d_max_age_prod(),
            slow_consumer_secs: d_slow_consumer(),
            token_chunk_size: d_chunk(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_sessions() -> usize {
    10
}
fn d_max_rounds() -> u32 {
    3
}
fn d_acquire_timeout() -> u64 {
    30
}
fn d_max_usage() -> f32 {
    0.7
}
fn d_fast_path() -> f32 {
    0.85
}
fn d_semantic() -> f32 {
    0.85
}
fn d_escalation() -> f32 {
    0.4
}
fn d_jump() -> f32 {
    0.9
}
fn d_compress_min() -> u32 {
    200
}
fn d_heartbeat() -> u64 {
    30
}
fn d_max_age_dev() -> u64 {
    60
}
fn d_max_age_prod() -> u64 {
    300
}
fn d_slow_consumer() -> u64 {
    5
}
fn d_chunk() -> usize {
    8
}
