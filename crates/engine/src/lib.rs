//! The curator-powered analysis layer: analytics, compression, the
//! agreement funnel, and the phase state machine.

pub mod agreement;
pub mod analytics;
pub mod compress;
pub mod curator;
mod json;
pub mod phase;

pub use agreement::AgreementAnalyzer;
pub use analytics::AnalyticsEngine;
pub use compress::{CompressionResult, Compressor};
pub use curator::Curator;
pub use phase::{PhaseDecision, PhaseMachine};
