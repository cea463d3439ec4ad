//! Agreement-analysis result types.
//!
//! The funnel runs up to three stages: deterministic extraction, semantic
//! similarity, and an LLM arbiter. One immutable
//! [`AgreementAnalysisResult`] is produced per completed phase pair.

use serde::{Deserialize, Serialize};

use crate::phase::CollaborationPhase;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Levels and stages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementLevel {
    PerfectConsensus,
    StrongAgreement,
    PartialAgreement,
    MethodologicalAgreement,
    Conflicted,
    InsufficientData,
}

/// Which stage of the funnel produced the final classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStage {
    FastPath,
    Semantic,
    LlmArbiter,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 1 — structured extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerLocation {
    FinalLine,
    Inline,
    Absent,
}

/// Deterministic extraction from a single turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerExtraction {
    pub final_answer: Option<String>,
    pub confidence_score: f32,
    pub confidence_keywords: Vec<String>,
    pub reasoning_steps: Vec<String>,
    pub error_flags: Vec<String>,
    pub has_explicit_answer: bool,
    pub answer_location: AnswerLocation,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 2 — semantic analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMethod {
    Embedding,
    Jaccard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticAnalysis {
    /// Overall content similarity in [0,1].
    pub overall_similarity: f32,
    /// Pairwise similarity of aligned reasoning steps.
    pub step_similarities: Vec<f32>,
    /// High-content terms shared by both turns.
    pub topic_clusters: Vec<String>,
    pub method: SimilarityMethod,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 3 — LLM arbiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerAgreement {
    ExactMatch,
    Equivalent,
    Partial,
    Disagree,
    Unclear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    BothCorrect,
    ACorrect,
    BCorrect,
    BothIncorrect,
    InsufficientInfo,
}

/// The arbiter's constrained JSON output. Parsed strictly: missing
/// required fields or out-of-enum values fail the parse, and the funnel
/// reports INSUFFICIENT_DATA.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmArbiterResult {
    pub answer_agreement: AnswerAgreement,
    /// string | number | null in the schema.
    pub extracted_answer_a: Option<serde_json::Value>,
    pub extracted_answer_b: Option<serde_json::Value>,
    pub confidence_a: f32,
    pub confidence_b: f32,
    pub verification_status: VerificationStatus,
    pub critical_errors: Vec<String>,
    pub reasoning: String,
    pub recommended_phase: CollaborationPhase,
    pub is_high_confidence_jump: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Final result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalRecommendation {
    pub next_phase: CollaborationPhase,
    pub reasoning: String,
    pub confidence: f32,
    pub is_phase_jump: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump_reason: Option<String>,
}

/// Immutable analysis result for one completed phase pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementAnalysisResult {
    pub extraction_a: AnswerExtraction,
    pub extraction_b: AnswerExtraction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbiter: Option<LlmArbiterResult>,
    pub agreement_level: AgreementLevel,
    pub final_recommendation: FinalRecommendation,
    pub stage_used: AnalysisStage,
}
