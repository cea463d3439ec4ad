//! Shared domain types for the Synergize collaboration service.
//!
//! Everything that crosses a crate boundary lives here: the error type,
//! configuration, collaboration phases and session records, agreement
//! analysis results, the SSE event envelope, and token accounting.

pub mod agreement;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod phase;
pub mod tokens;

pub use error::{Error, Result};
pub use events::BoxStream;
pub use phase::CollaborationPhase;
