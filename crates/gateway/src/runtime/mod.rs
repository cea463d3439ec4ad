//! Session runtime: the collaboration orchestrator, per-session
//! cancellation, and the SSE fan-out.

pub mod cancel;
pub mod orchestrator;
pub mod stream_hub;

pub use orchestrator::{spawn_collaboration, CollaborationInput};
