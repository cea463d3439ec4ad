use sy_domain::events::BoxStream;
use sy_domain::Result;

use crate::registry::ModelSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One generation call against an inference context. The prompt is the
/// fully rendered chat-template string.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Stop strings; generation halts before emitting any of them.
    pub stop: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One inference context: a loaded-weights slot that serves one
/// generation at a time. Handed out exclusively by the context pool.
#[async_trait::async_trait]
pub trait InferenceSession: Send + Sync {
    /// Stream generated tokens in production order.
    ///
    /// Dropping the returned stream interrupts in-flight generation.
    async fn generate(&self, req: GenerationRequest) -> Result<BoxStream<'static, Result<String>>>;

    /// Embed a text. Errors when the runtime has no embedding support;
    /// callers fall back to lexical similarity.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// The native inference runtime boundary: loads model weights and
/// allocates inference contexts against them.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    async fn open_session(&self, spec: &ModelSpec) -> Result<Box<dyn InferenceSession>>;
}
