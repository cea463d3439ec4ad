//! Local-model inference: the backend seam, the llama.cpp server shim,
//! the bounded per-model context pool, the prompt formatter, and the
//! GGUF model registry.

pub mod formatter;
pub mod local;
pub mod pool;
pub mod registry;
mod sse;
pub mod traits;

pub use pool::{ContextLease, ContextPool, PoolManager};
pub use registry::{ModelRegistry, ModelSpec};
pub use traits::{GenerationRequest, InferenceSession, ModelBackend};
