//! Phase-aware turn compression.
//!
//! Before a turn re-enters another model's context window it is
//! summarized by the curator toward a per-phase target ratio. Short
//! turns pass through untouched; key points are always lifted from the
//! original so nothing the models itemized gets lost.

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};

use sy_domain::tokens::estimate_tokens;
use sy_domain::{CollaborationPhase, Result};

use crate::curator::Curator;

/// Sampling temperature for compression calls.
const COMPRESSION_TEMPERATURE: f32 = 0.3;
/// Turns compressed concurrently in a batch.
const BATCH_CONCURRENCY: usize = 2;
/// Key points lifted per turn.
const MAX_KEY_POINTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub compressed: String,
    pub original: String,
    /// `compressed_tokens / original_tokens`; exactly 1.0 on bypass.
    pub compression_ratio: f32,
    pub preserved_key_points: Vec<String>,
}

/// Target `compressed/original` ratio per phase. Later phases compress
/// harder: their turns restate more of what came before.
fn target_ratio(phase: CollaborationPhase) -> f32 {
    match phase {
        CollaborationPhase::Brainstorm => 0.6,
        CollaborationPhase::Critique => 0.5,
        CollaborationPhase::Revise => 0.4,
        CollaborationPhase::Synthesize => 0.3,
        CollaborationPhase::Consensus => 0.4,
        CollaborationPhase::Complete => 0.3,
        CollaborationPhase::Idle => 0.5,
    }
}

pub struct Compressor {
    curator: Arc<Curator>,
    /// Turns at or under this many tokens bypass compression.
    min_tokens: u32,
}

impl Compressor {
    pub fn new(curator: Arc<Curator>, min_tokens: u32) -> Self {
        Self { curator, min_tokens }
    }

    /// Compress one turn's content for future history inclusion.
    pub async fn compress_turn(
        &self,
        content: &str,
        phase: CollaborationPhase,
    ) -> Result<CompressionResult> {
        let original_tokens = estimate_tokens(content);
        let key_points = extract_key_points(content);

        if original_tokens <= self.min_tokens {
            return Ok(CompressionResult {
                compressed: content.to_owned(),
                original: content.to_owned(),
                compression_ratio: 1.0,
                preserved_key_points: key_points,
            });
        }

        let ratio = target_ratio(phase);
        let target_tokens = ((original_tokens as f32) * ratio) as u32;
        let user = format!(
            "Summarize the response below to about {target_tokens} tokens. \
             Keep every number, every conclusion, and every explicit claim. \
             Drop repetition and filler.\n\nResponse:\n{content}"
        );

        let compressed = self
            .curator
            .complete(
                "You compress technical text without losing substance.",
                &user,
                target_tokens + target_tokens / 4,
                COMPRESSION_TEMPERATURE,
            )
            .await?;

        let compressed_tokens = estimate_tokens(&compressed);
        let achieved = if original_tokens == 0 {
            1.0
        } else {
            compressed_tokens as f32 / original_tokens as f32
        };
        tracing::debug!(
            phase = %phase,
            original_tokens,
            compressed_tokens,
            ratio = achieved,
            "turn compressed"
        );

        Ok(CompressionResult {
            compressed,
            original: content.to_owned(),
            compression_ratio: achieved,
            preserved_key_points: key_points,
        })
    }

    /// Compress several turns with bounded concurrency, preserving
    /// input order in the output.
    pub async fn compress_batch(
        &self,
        items: Vec<(String, CollaborationPhase)>,
    ) -> Vec<Result<CompressionResult>> {
        stream::iter(items)
            .map(|(content, phase)| async move { self.compress_turn(&content, phase).await })
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await
    }
}

/// Lift itemized statements out of a turn: bulleted lines, numbered
/// lines, and "key …:" sentences, capped at [`MAX_KEY_POINTS`].
pub fn extract_key_points(content: &str) -> Vec<String> {
    let bullet = Regex::new(r"^\s*[*\-•]\s+(.+)$").expect("static regex");
    let numbered = Regex::new(r"^\s*\d+[.)]\s+(.+)$").expect("static regex");
    let keyed = Regex::new(r"(?i)^\s*key\b[^:\n]*:\s*(.+)$").expect("static regex");

    let mut points = Vec::new();
    for line in content.lines() {
        let captured = bullet
            .captures(line)
            .or_else(|| numbered.captures(line))
            .or_else(|| keyed.captures(line));
        if let Some(cap) = captured {
            let point = cap[1].trim().to_owned();
            if !point.is_empty() {
                points.push(point);
            }
        }
        if points.len() >= MAX_KEY_POINTS {
            break;
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use sy_domain::events::BoxStream;
    use sy_domain::Result;
    use sy_inference::formatter::TemplateFamily;
    use sy_inference::pool::{ContextPool, PoolConfig};
    use sy_inference::registry::{ModelSettings, ModelSpec};
    use sy_inference::{GenerationRequest, InferenceSession, ModelBackend};

    struct EchoBackend;
    struct EchoSession;

    #[async_trait::async_trait]
    impl InferenceSession for EchoSession {
        async fn generate(
            &self,
            _req: GenerationRequest,
        ) -> Result<BoxStream<'static, Result<String>>> {
            Ok(Box::pin(futures_util::stream::once(async {
                Ok("condensed summary".to_string())
            })))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(sy_domain::Error::inference("echo", "no embeddings"))
        }
    }

    #[async_trait::async_trait]
    impl ModelBackend for EchoBackend {
        async fn open_session(&self, _spec: &ModelSpec) -> Result<Box<dyn InferenceSession>> {
            Ok(Box::new(EchoSession))
        }
    }

    fn compressor(min_tokens: u32) -> Compressor {
        let spec = ModelSpec {
            id: "curator".into(),
            name: "curator".into(),
            path: PathBuf::from("curator.gguf"),
            context_size: 4096,
            template: TemplateFamily::ChatMl,
            settings: ModelSettings::default(),
        };
        let pool = Arc::new(ContextPool::new(
            Arc::new(EchoBackend),
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
        Compressor::new(curator, min_tokens)
    }

    #[tokio::test]
    async fn short_turns_bypass_compression() {
        let compressor = compressor(200);
        // Exactly 200 estimated tokens (800 chars) still bypasses.
        let content = "* keep this point\n".to_string() + &"x".repeat(782);
        assert!(sy_domain::tokens::estimate_tokens(&content) <= 200);

        let result = compressor
            .compress_turn(&content, CollaborationPhase::Critique)
            .await
            .unwrap();
        assert_eq!(result.compression_ratio, 1.0);
        assert_eq!(result.compressed, result.original);
        assert_eq!(result.preserved_key_points, vec!["keep this point"]);
    }

    #[tokio::test]
    async fn long_turns_are_summarized_with_key_points_preserved() {
        let compressor = compressor(200);
        let content = format!("- the product is 255\n{}", "filler sentence. ".repeat(100));

        let result = compressor
            .compress_turn(&content, CollaborationPhase::Revise)
            .await
            .unwrap();
        assert_eq!(result.compressed, "condensed summary");
        assert!(result.compression_ratio < 1.0);
        assert_eq!(result.original, content);
        // Key points come from the original, not the summary.
        assert_eq!(result.preserved_key_points, vec!["the product is 255"]);
    }

    #[test]
    fn key_points_cover_every_pattern() {
        let content = "\
Intro line.
* first bullet
- second bullet
• third bullet
1. first numbered
2) second numbered
Key insight: the product is 255
";
        let points = extract_key_points(content);
        assert_eq!(points.len(), MAX_KEY_POINTS);
        assert_eq!(points[0], "first bullet");
        assert_eq!(points[3], "first numbered");
    }

    #[test]
    fn key_insight_line_is_captured() {
        let points = extract_key_points("Key observation: both agree\nplain text");
        assert_eq!(points, vec!["both agree"]);
    }

    #[test]
    fn plain_prose_has_no_key_points() {
        assert!(extract_key_points("Just two sentences. Nothing itemized.").is_empty());
    }

    #[test]
    fn ratio_table_matches_phases() {
        assert!((target_ratio(CollaborationPhase::Brainstorm) - 0.6).abs() < f32::EPSILON);
        assert!((target_ratio(CollaborationPhase::Synthesize) - 0.3).abs() < f32::EPSILON);
        assert!((target_ratio(CollaborationPhase::Consensus) - 0.4).abs() < f32::EPSILON);
    }
}
