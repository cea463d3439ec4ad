//! The three-stage agreement funnel.
//!
//! Stage 1 extracts structured answers deterministically and
//! short-circuits on identical high-confidence answers. Stage 2 scores
//! semantic similarity. Stage 3, reached only for genuinely divergent
//! pairs, asks the curator to arbitrate under a strict JSON schema.

pub mod arbiter;
pub mod extraction;
pub mod semantic;

use std::sync::Arc;

use sy_domain::agreement::{
    AgreementAnalysisResult, AgreementLevel, AnalysisStage, AnswerAgreement, FinalRecommendation,
};
use sy_domain::config::CollabConfig;
use sy_domain::CollaborationPhase;

use crate::curator::Curator;

/// Step-similarity mean above which reasoning counts as convergent.
const CONVERGENCE_THRESHOLD: f32 = 0.5;

pub struct AgreementAnalyzer {
    curator: Arc<Curator>,
    config: CollabConfig,
}

impl AgreementAnalyzer {
    pub fn new(curator: Arc<Curator>, config: CollabConfig) -> Self {
        Self { curator, config }
    }

    /// Analyze one completed phase pair.
    pub async fn analyze(
        &self,
        original_query: &str,
        phase: CollaborationPhase,
        content_a: &str,
        content_b: &str,
    ) -> AgreementAnalysisResult {
        let extraction_a = extraction::extract(content_a);
        let extraction_b = extraction::extract(content_b);

        // ── Stage 1: fast path ──────────────────────────────────────
        let answers_equal = match (&extraction_a.final_answer, &extraction_b.final_answer) {
            (Some(a), Some(b)) => extraction::answers_match(a, b),
            _ => false,
        };
        let threshold = self.config.fast_path_confidence_threshold;
        if extraction_a.has_explicit_answer
            && extraction_b.has_explicit_answer
            && extraction_a.confidence_score >= threshold
            && extraction_b.confidence_score >= threshold
            && answers_equal
        {
            let confidence = extraction_a.confidence_score.min(extraction_b.confidence_score);
            let recommendation = self.recommend(
                phase,
                AgreementLevel::PerfectConsensus,
                confidence,
                true,
                Some("identical high-confidence answers"),
                None,
            );
            tracing::info!(phase = %phase, confidence, "fast-path consensus");
            return AgreementAnalysisResult {
                extraction_a,
                extraction_b,
                semantic: None,
                arbiter: None,
                agreement_level: AgreementLevel::PerfectConsensus,
                final_recommendation: recommendation,
                stage_used: AnalysisStage::FastPath,
            };
        }

        // ── Stage 2: semantic ───────────────────────────────────────
        let analysis = semantic::analyze(
            &self.curator,
            content_a,
            content_b,
            &extraction_a.reasoning_steps,
            &extraction_b.reasoning_steps,
        )
        .await;
        let similarity = analysis.overall_similarity;

        if similarity >= self.config.semantic_similarity_threshold {
            let recommendation = self.recommend(
                phase,
                AgreementLevel::StrongAgreement,
                similarity,
                answers_equal,
                answers_equal.then(|| "matching answers with convergent content"),
                None,
            );
            return AgreementAnalysisResult {
                extraction_a,
                extraction_b,
                semantic: Some(analysis),
                arbiter: None,
                agreement_level: AgreementLevel::StrongAgreement,
                final_recommendation: recommendation,
                stage_used: AnalysisStage::Semantic,
            };
        }

        if similarity <= self.config.arbiter_escalation_threshold {
            // ── Stage 3: LLM arbiter ────────────────────────────────
            return match arbiter::arbitrate(
                &self.curator,
                original_query,
                phase,
                content_a,
                content_b,
            )
            .await
            {
                Ok(result) => {
                    let level = level_from_arbiter(result.answer_agreement);
                    let confidence = (result.confidence_a + result.confidence_b) / 2.0;
                    let recommendation = self.recommend(
                        phase,
                        level,
                        confidence,
                        result.is_high_confidence_jump,
                        Some("arbiter verdict"),
                        Some(result.recommended_phase),
                    );
                    AgreementAnalysisResult {
                        extraction_a,
                        extraction_b,
                        semantic: Some(analysis),
                        arbiter: Some(result),
                        agreement_level: level,
                        final_recommendation: recommendation,
                        stage_used: AnalysisStage::LlmArbiter,
                    }
                }
                Err(e) => {
                    tracing::warn!(phase = %phase, error = %e, "arbiter unusable");
                    let recommendation = self.recommend(
                        phase,
                        AgreementLevel::InsufficientData,
                        0.0,
                        false,
                        None,
                        None,
                    );
                    AgreementAnalysisResult {
                        extraction_a,
                        extraction_b,
                        semantic: Some(analysis),
                        arbiter: None,
                        agreement_level: AgreementLevel::InsufficientData,
                        final_recommendation: recommendation,
                        stage_used: AnalysisStage::LlmArbiter,
                    }
                }
            };
        }

        // ── Middle band: partial vs methodological ──────────────────
        let converges = semantic::reasoning_convergence(&analysis) >= CONVERGENCE_THRESHOLD;
        let level = if !answers_equal && converges {
            AgreementLevel::MethodologicalAgreement
        } else {
            AgreementLevel::PartialAgreement
        };
        let recommendation = self.recommend(phase, level, similarity, false, None, None);
        AgreementAnalysisResult {
            extraction_a,
            extraction_b,
            semantic: Some(analysis),
            arbiter: None,
            agreement_level: level,
            final_recommendation: recommendation,
            stage_used: AnalysisStage::Semantic,
        }
    }

    /// Build the next-phase recommendation, applying the jump rule and
    /// the no-backward-jump constraint.
    fn recommend(
        &self,
        current: CollaborationPhase,
        level: AgreementLevel,
        confidence: f32,
        high_confidence_jump: bool,
        jump_reason: Option<&str>,
        proposed: Option<CollaborationPhase>,
    ) -> FinalRecommendation {
        let jump_eligible = high_confidence_jump
            && matches!(
                level,
                AgreementLevel::PerfectConsensus | AgreementLevel::StrongAgreement
            )
            && confidence >= self.config.consensus_jump_threshold;

        if jump_eligible {
            let target = if current == CollaborationPhase::Consensus {
                CollaborationPhase::Complete
            } else {
                CollaborationPhase::Consensus
            };
            let is_phase_jump = target != current.next_in_order();
            return FinalRecommendation {
                next_phase: target,
                reasoning: format!("{level:?} at confidence {confidence:.2}"),
                confidence,
                is_phase_jump,
                jump_reason: jump_reason.map(str::to_owned),
            };
        }

        // Conflicted pairs repeat the phase; the round cap forces
        // advance eventually.
        let default_next = if level == AgreementLevel::Conflicted {
            current
        } else {
            current.next_in_order()
        };
        let next_phase = match proposed {
            Some(p) => sanitize_proposed(current, p),
            None => default_next,
        };

        FinalRecommendation {
            next_phase,
            reasoning: format!("{level:?} at confidence {confidence:.2}"),
            confidence,
            is_phase_jump: false,
            jump_reason: None,
        }
    }
}

fn level_from_arbiter(agreement: AnswerAgreement) -> AgreementLevel {
    match agreement {
        AnswerAgreement::ExactMatch => AgreementLevel::PerfectConsensus,
        AnswerAgreement::Equivalent => AgreementLevel::StrongAgreement,
        AnswerAgreement::Partial => AgreementLevel::PartialAgreement,
        AnswerAgreement::Disagree => AgreementLevel::Conflicted,
        AnswerAgreement::Unclear => AgreementLevel::InsufficientData,
    }
}

/// Constrain an arbiter-proposed phase: repeating and stepping forward
/// are allowed; the only legal skips are to CONSENSUS (or COMPLETE from
/// CONSENSUS); anything backward or otherwise becomes the ordered next.
fn sanitize_proposed(
    current: CollaborationPhase,
    proposed: CollaborationPhase,
) -> CollaborationPhase {
    if proposed == current || proposed == current.next_in_order() {
        return proposed;
    }
    if proposed == CollaborationPhase::Consensus && proposed.ordinal() > current.ordinal() {
        return CollaborationPhase::Consensus;
    }
    if proposed == CollaborationPhase::Complete {
        // COMPLETE is only reachable directly from CONSENSUS.
        return if current == CollaborationPhase::Consensus {
            CollaborationPhase::Complete
        } else {
            CollaborationPhase::Consensus
        };
    }
    current.next_in_order()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use sy_domain::events::BoxStream;
    use sy_domain::Result;
    use sy_inference::formatter::TemplateFamily;
    use sy_inference::pool::{ContextPool, PoolConfig};
    use sy_inference::registry::{ModelSettings, ModelSpec};
    use sy_inference::{GenerationRequest, InferenceSession, ModelBackend};

    struct ScriptBackend {
        reply: String,
    }

    struct ScriptSession {
        reply: String,
    }

    #[async_trait::async_trait]
    impl InferenceSession for ScriptSession {
        async fn generate(
            &self,
            _req: GenerationRequest,
        ) -> Result<BoxStream<'static, Result<String>>> {
            let reply = self.reply.clone();
            Ok(Box::pin(futures_util::stream::once(async move { Ok(reply) })))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            // No embedding support; stage 2 degrades to Jaccard.
            Err(sy_domain::Error::inference("script", "no embeddings"))
        }
    }

    #[async_trait::async_trait]
    impl ModelBackend for ScriptBackend {
        async fn open_session(&self, _spec: &ModelSpec) -> Result<Box<dyn InferenceSession>> {
            Ok(Box::new(ScriptSession {
                reply: self.reply.clone(),
            }))
        }
    }

    fn analyzer(arbiter_reply: &str) -> AgreementAnalyzer {
        let spec = ModelSpec {
            id: "curator".into(),
            name: "curator".into(),
            path: PathBuf::from("curator.gguf"),
            context_size: 4096,
            template: TemplateFamily::ChatMl,
            settings: ModelSettings::default(),
        };
        let pool = Arc::new(ContextPool::new(
            Arc::new(ScriptBackend {
                reply: arbiter_reply.to_owned(),
            }),
            spec.clone(),
            PoolConfig {
                max_size: 1,
                model_path: PathBuf::from("curator.gguf"),
                context_size: 4096,
                batch_size: 512,
                threads: 4,
                gpu_layers: 0,
            },
        ));
        let curator = Arc::new(Curator::new(pool, &spec, Duration::from_secs(5)));
        AgreementAnalyzer::new(curator, CollabConfig::default())
    }

    #[tokio::test]
    async fn identical_high_confidence_answers_short_circuit() {
        let analyzer = analyzer("unused");
        let content = "The answer is 42. Definitely correct, verified.";
        let result = analyzer
            .analyze("q", CollaborationPhase::Brainstorm, content, content)
            .await;

        assert_eq!(result.stage_used, AnalysisStage::FastPath);
        assert_eq!(result.agreement_level, AgreementLevel::PerfectConsensus);
        assert!(result.semantic.is_none(), "stage 2 must not run");
        assert!(result.arbiter.is_none(), "stage 3 must not run");
        // Jump straight to consensus, skipping critique and revise.
        assert_eq!(
            result.final_recommendation.next_phase,
            CollaborationPhase::Consensus
        );
        assert!(result.final_recommendation.is_phase_jump);
    }

    #[tokio::test]
    async fn near_identical_content_is_strong_agreement() {
        let analyzer = analyzer("unused");
        let a = "Multiply fifteen by seventeen using decomposition to reach the result.";
        let result = analyzer
            .analyze("q", CollaborationPhase::Critique, a, a)
            .await;

        assert_eq!(result.stage_used, AnalysisStage::Semantic);
        assert_eq!(result.agreement_level, AgreementLevel::StrongAgreement);
        assert_eq!(
            result.final_recommendation.next_phase,
            CollaborationPhase::Revise
        );
    }

    #[tokio::test]
    async fn divergent_content_escalates_to_arbiter() {
        let analyzer = analyzer(
            r#"{
                "answerAgreement": "DISAGREE",
                "extractedAnswerA": 255,
                "extractedAnswerB": 265,
                "confidenceA": 0.8,
                "confidenceB": 0.3,
                "verificationStatus": "A_CORRECT",
                "criticalErrors": [],
                "reasoning": "arithmetic conflict",
                "recommendedPhase": "CRITIQUE",
                "isHighConfidenceJump": false
            }"#,
        );
        let result = analyzer
            .analyze(
                "q",
                CollaborationPhase::Critique,
                "alpha beta gamma delta",
                "omega sigma theta lambda",
            )
            .await;

        assert_eq!(result.stage_used, AnalysisStage::LlmArbiter);
        assert_eq!(result.agreement_level, AgreementLevel::Conflicted);
        assert!(result.arbiter.is_some());
        // Arbiter proposed repeating CRITIQUE; that is legal.
        assert_eq!(
            result.final_recommendation.next_phase,
            CollaborationPhase::Critique
        );
    }

    #[tokio::test]
    async fn arbiter_garbage_means_insufficient_data() {
        let analyzer = analyzer("I cannot produce JSON today, sorry.");
        let result = analyzer
            .analyze(
                "q",
                CollaborationPhase::Revise,
                "alpha beta gamma delta",
                "omega sigma theta lambda",
            )
            .await;

        assert_eq!(result.agreement_level, AgreementLevel::InsufficientData);
        assert!(result.arbiter.is_none());
        assert_eq!(
            result.final_recommendation.next_phase,
            CollaborationPhase::Synthesize
        );
    }

    #[tokio::test]
    async fn differing_answers_with_convergent_steps_are_methodological() {
        let analyzer = analyzer("unused");
        let a = "1. compute product fifteen times seventeen\nAnswer: 255";
        let b = "1. compute product fifteen times seventeen\nAnswer: 265";
        let result = analyzer
            .analyze("q", CollaborationPhase::Brainstorm, a, b)
            .await;

        assert_eq!(result.stage_used, AnalysisStage::Semantic);
        assert_eq!(
            result.agreement_level,
            AgreementLevel::MethodologicalAgreement
        );
    }

    #[test]
    fn backward_and_skip_proposals_are_sanitized() {
        use CollaborationPhase::*;
        assert_eq!(sanitize_proposed(Revise, Brainstorm), Synthesize);
        assert_eq!(sanitize_proposed(Brainstorm, Synthesize), Critique);
        assert_eq!(sanitize_proposed(Brainstorm, Consensus), Consensus);
        assert_eq!(sanitize_proposed(Brainstorm, Complete), Consensus);
        assert_eq!(sanitize_proposed(Consensus, Complete), Complete);
        assert_eq!(sanitize_proposed(Critique, Critique), Critique);
    }
}
