use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local model runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory scanned for `*.gguf` weight files.
    #[serde(default = "d_models_dir")]
    pub dir: PathBuf,
    /// Context window handed to each inference context.
    #[serde(default = "d_ctx")]
    pub context_size: u32,
    #[serde(default = "d_batch")]
    pub batch_size: u32,
    #[serde(default = "d_threads")]
    pub threads: u32,
    #[serde(default = "d_gpu_layers")]
    pub gpu_layers: u32,
    /// Bounded pool size per model: how many inference contexts are kept
    /// loaded against the same weights.
    #[serde(default = "d_contexts")]
    pub contexts_per_model: usize,
    /// Model id designated as the curator (compression, analytics,
    /// arbitration). Falls back to the first participant when unset.
    #[serde(default)]
    pub curator: Option<String>,
    /// Per-model inference-server endpoints (model id → base URL).
    /// Models without an entry use `default_server`.
    #[serde(default)]
    pub servers: HashMap<String, String>,
    #[serde(default = "d_server")]
    pub default_server: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: d_models_dir(),
            context_size: d_ctx(),
            batch_size: d_batch(),
            threads: d_threads(),
            gpu_layers: d_gpu_layers(),
            contexts_per_model: d_contexts(),
            curator: None,
            servers: HashMap::new(),
            default_server: d_server(),
        }
    }
}

impl ModelsConfig {
    pub fn server_for(&self, model_id: &str) -> &str {
        self.servers
            .get(model_id)
            .map(String::as_str)
            .unwrap_or(&self.default_server)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_models_dir() -> PathBuf {
    PathBuf::from("./models")
}
fn d_ctx() -> u32 {
    8192
}
fn d_batch() -> u32 {
    512
}
fn d_threads() -> u32 {
    8
}
fn d_gpu_layers() -> u32 {
    35
}
fn d_contexts() -> usize {
    2
}
fn d_server() -> String {
    "http://127.0.0.1:8080".into()
}
