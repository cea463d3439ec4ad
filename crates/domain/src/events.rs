//! The SSE event envelope delivered to the session subscriber.
//!
//! Wire format: `data: {"type":"<TYPE>","payload":{...}}\n\n`.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::agreement::{AgreementLevel, AnalysisStage};
use crate::collab::SessionStatus;
use crate::phase::CollaborationPhase;

/// A boxed async stream, used for token streaming from the inference
/// backend.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelActivity {
    Queued,
    Generating,
    Complete,
    Failed,
}

/// Events emitted over a session's SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SynergyEvent {
    #[serde(rename = "CONNECTION", rename_all = "camelCase")]
    Connection { session_id: String, message: String },

    #[serde(rename = "PHASE_UPDATE", rename_all = "camelCase")]
    PhaseUpdate {
        phase: CollaborationPhase,
        message: String,
    },

    /// A batch of generated tokens. `is_complete` marks the final frame
    /// of one model's turn.
    #[serde(rename = "TOKEN_CHUNK", rename_all = "camelCase")]
    TokenChunk {
        model_id: String,
        phase: CollaborationPhase,
        tokens: Vec<String>,
        is_complete: bool,
    },

    #[serde(rename = "MODEL_STATUS", rename_all = "camelCase")]
    ModelStatus {
        model_id: String,
        status: ModelActivity,
    },

    #[serde(rename = "SYNTHESIS_UPDATE", rename_all = "camelCase")]
    SynthesisUpdate { content: String },

    #[serde(rename = "AGREEMENT_ANALYSIS", rename_all = "camelCase")]
    AgreementAnalysis {
        phase: CollaborationPhase,
        agreement_level: AgreementLevel,
        stage_used: AnalysisStage,
        next_phase: CollaborationPhase,
        confidence: f32,
        is_phase_jump: bool,
        reasoning: String,
    },

    #[serde(rename = "COLLABORATION_COMPLETE", rename_all = "camelCase")]
    CollaborationComplete {
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_answer: Option<String>,
        duration_ms: u64,
    },

    #[serde(rename = "ERROR", rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<CollaborationPhase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_id: Option<String>,
    },
}

impl SynergyEvent {
    /// The event's wire type tag, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION",
            Self::PhaseUpdate { .. } => "PHASE_UPDATE",
            Self::TokenChunk { .. } => "TOKEN_CHUNK",
            Self::ModelStatus { .. } => "MODEL_STATUS",
            Self::SynthesisUpdate { .. } => "SYNTHESIS_UPDATE",
            Self::AgreementAnalysis { .. } => "AGREEMENT_ANALYSIS",
            Self::CollaborationComplete { .. } => "COLLABORATION_COMPLETE",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Serialize to the full `data: ...\n\n` SSE frame.
    pub fn sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        format!("data: {json}\n\n")
    }
}
