//! Stage 3: the LLM arbiter.
//!
//! Invoked only when the cheaper stages cannot classify. The curator is
//! asked for a single JSON object against a fixed schema; the parse is
//! strict and a failure means INSUFFICIENT_DATA upstream.

use sy_domain::agreement::LlmArbiterResult;
use sy_domain::{CollaborationPhase, Result};

use crate::curator::Curator;
use crate::json::parse_first_json;

/// Sampling temperature for arbitration.
const ARBITER_TEMPERATURE: f32 = 0.2;

const SCHEMA_INSTRUCTIONS: &str = r#"Respond with only one JSON object, no prose:
{
  "answerAgreement": "EXACT_MATCH" | "EQUIVALENT" | "PARTIAL" | "DISAGREE" | "UNCLEAR",
  "extractedAnswerA": string | number | null,
  "extractedAnswerB": string | number | null,
  "confidenceA": number between 0 and 1,
  "confidenceB": number between 0 and 1,
  "verificationStatus": "BOTH_CORRECT" | "A_CORRECT" | "B_CORRECT" | "BOTH_INCORRECT" | "INSUFFICIENT_INFO",
  "criticalErrors": [string],
  "reasoning": string,
  "recommendedPhase": "BRAINSTORM" | "CRITIQUE" | "REVISE" | "SYNTHESIZE" | "CONSENSUS" | "COMPLETE",
  "isHighConfidenceJump": boolean
}"#;

/// Ask the curator to arbitrate a pair of turns.
pub async fn arbitrate(
    curator: &Curator,
    original_query: &str,
    phase: CollaborationPhase,
    content_a: &str,
    content_b: &str,
) -> Result<LlmArbiterResult> {
    let user = format!(
        "Original question: {original_query}\nCurrent phase: {phase}\n\n\
         Response A:\n{content_a}\n\nResponse B:\n{content_b}\n\n\
         Judge whether the two responses agree, extract each one's final \
         answer, verify correctness where you can, and recommend the next \
         phase.\n\n{SCHEMA_INSTRUCTIONS}"
    );

    let text = curator
        .complete(
            "You arbitrate between two model responses.",
            &user,
            512,
            ARBITER_TEMPERATURE,
        )
        .await?;

    parse_first_json::<LlmArbiterResult>(&text)
}
