//! LLM-powered analytics: hypothetical documents, document re-ranking,
//! shared-context extraction, and synthesis summaries.
//!
//! Every operation is cached under a content-addressed digest of its
//! canonical inputs; two identical requests return byte-identical
//! results for the cache TTL. Parse failures never surface: each
//! operation has a local fallback.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sy_domain::collab::{ConversationTurn, SharedContextDelta};
use sy_domain::{CollaborationPhase, Result};
use sy_store::StoreAdapter;

use crate::curator::Curator;
use crate::json::parse_first_json;

/// Sampling temperature for analytics calls.
const ANALYTICS_TEMPERATURE: f32 = 0.3;
/// Documents re-ranked per curator call.
const RERANK_BATCH: usize = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A document offered for re-ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedInput {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDoc {
    pub id: String,
    /// Relevance in [0,1].
    pub score: f32,
    pub reason: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnalyticsEngine {
    curator: Arc<Curator>,
    store: Arc<StoreAdapter>,
}

impl AnalyticsEngine {
    pub fn new(curator: Arc<Curator>, store: Arc<StoreAdapter>) -> Self {
        Self { curator, store }
    }

    // ── caching ─────────────────────────────────────────────────────

    /// SHA-256 over the operation name and its canonical inputs, with a
    /// field separator so adjacent inputs cannot collide.
    fn digest(operation: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        for part in parts {
            hasher.update([0x1f]);
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    async fn cached<T, F, Fut>(&self, operation: &str, parts: &[&str], compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let digest = Self::digest(operation, parts);

        if let Ok(Some(raw)) = self.store.analytics_cache_get(&digest).await {
            if let Ok(value) = serde_json::from_str(&raw) {
                return Ok(value);
            }
        }
        tracing::debug!(operation, digest = %digest[..12], "analytics cache miss");

        let value = compute().await?;
        let raw = serde_json::to_string(&value)?;
        if let Err(e) = self.store.analytics_cache_put(&digest, &raw).await {
            tracing::warn!(operation, error = %e, "analytics cache write failed");
        }
        Ok(value)
    }

    // ── hypothetical document ───────────────────────────────────────

    /// A 150–200-word "ideal answer" used for vector-search query
    /// expansion. Cached under the query-cache namespace.
    pub async fn hypothetical_document(
        &self,
        query: &str,
        context: Option<&str>,
        phase: Option<CollaborationPhase>,
    ) -> Result<String> {
        let phase_str = phase.map(|p| p.to_string()).unwrap_or_default();
        let context_str = context.unwrap_or_default();
        let digest = Self::digest("hypothetical-document", &[query, context_str, &phase_str]);

        if let Ok(Some(document)) = self.store.query_cache_get(&digest).await {
            return Ok(document);
        }
        tracing::debug!(digest = %&digest[..12], "query cache miss");

        let mut user = format!(
            "Question: {query}\n\nWrite the ideal answer document for this \
             question in 150-200 words. Write it as settled fact, the way a \
             reference text would. No hedging, no meta-commentary."
        );
        if !context_str.is_empty() {
            user.push_str(&format!("\n\nRelevant context:\n{context_str}"));
        }
        if let Some(phase) = phase {
            user.push_str(&format!("\n\nCollaboration phase: {phase}"));
        }
        let document = self
            .curator
            .complete(
                "You write dense reference passages.",
                &user,
                320,
                ANALYTICS_TEMPERATURE,
            )
            .await?;

        if let Err(e) = self.store.query_cache_put(&digest, &document).await {
            tracing::warn!(error = %e, "query cache write failed");
        }
        Ok(document)
    }

    // ── document re-ranking ─────────────────────────────────────────

    /// Score documents for relevance to `query`, descending. Processed
    /// in batches of [`RERANK_BATCH`]; a batch whose output fails to
    /// parse falls back to positional decay scores.
    pub async fn rerank(
        &self,
        query: &str,
        docs: &[RankedInput],
        top_k: usize,
    ) -> Result<Vec<RankedDoc>> {
        let canonical: Vec<String> = docs
            .iter()
            .map(|d| format!("{}\x1e{}", d.id, d.content))
            .collect();
        let mut parts: Vec<&str> = vec![query];
        parts.extend(canonical.iter().map(String::as_str));
        let top_k_str = top_k.to_string();
        parts.push(&top_k_str);

        self.cached("rerank", &parts, || async {
            let mut ranked = Vec::with_capacity(docs.len());
            for (batch_index, batch) in docs.chunks(RERANK_BATCH).enumerate() {
                ranked.extend(self.rerank_batch(query, batch, batch_index).await);
            }
            ranked.sort_by(|a: &RankedDoc, b: &RankedDoc| {
                b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
            });
            ranked.truncate(top_k);
            Ok(ranked)
        })
        .await
    }

    async fn rerank_batch(
        &self,
        query: &str,
        batch: &[RankedInput],
        batch_index: usize,
    ) -> Vec<RankedDoc> {
        let mut listing = String::new();
        for doc in batch {
            listing.push_str(&format!("[{}]\n{}\n\n", doc.id, doc.content));
        }
        let user = format!(
            "Query: {query}\n\nDocuments:\n{listing}\
             Score each document's relevance to the query. Respond with only a \
             JSON array: [{{\"id\": \"...\", \"score\": 0.0, \"reason\": \"...\"}}]. \
             Scores are in [0,1]."
        );

        let response = self
            .curator
            .complete("You rank documents by relevance.", &user, 512, ANALYTICS_TEMPERATURE)
            .await;

        match response.and_then(|text| parse_first_json::<Vec<RankedDoc>>(&text)) {
            Ok(mut scored) => {
                // Keep only ids we actually offered, clamped to [0,1].
                scored.retain(|d| batch.iter().any(|b| b.id == d.id));
                for doc in &mut scored {
                    doc.score = doc.score.clamp(0.0, 1.0);
                }
                scored
            }
            Err(e) => {
                tracing::warn!(batch_index, error = %e, "rerank batch fell back to decay scoring");
                decay_scores(batch, batch_index)
            }
        }
    }

    // ── shared-context extraction ───────────────────────────────────

    /// Extract joint findings from a pair of turns. A parse failure
    /// yields an empty delta, never an error.
    pub async fn extract_shared_context(
        &self,
        turn_a: &ConversationTurn,
        turn_b: &ConversationTurn,
    ) -> Result<SharedContextDelta> {
        self.cached(
            "shared-context",
            &[&turn_a.content, &turn_b.content],
            || async {
                let user = format!(
                    "Two models answered the same question.\n\n\
                     Response A ({}):\n{}\n\nResponse B ({}):\n{}\n\n\
                     Extract their joint findings. Respond with only a JSON object: \
                     {{\"agreements\": [], \"disagreements\": [], \
                     \"newQuestions\": [], \"keyInsights\": []}}. \
                     Keep each entry to one sentence.",
                    turn_a.model_id, turn_a.content, turn_b.model_id, turn_b.content
                );
                let response = self
                    .curator
                    .complete(
                        "You compare technical responses.",
                        &user,
                        512,
                        ANALYTICS_TEMPERATURE,
                    )
                    .await;

                match response.and_then(|text| parse_first_json::<SharedContextDelta>(&text)) {
                    Ok(delta) => Ok(delta),
                    Err(e) => {
                        tracing::warn!(error = %e, "shared-context extraction fell back to empty");
                        Ok(SharedContextDelta::default())
                    }
                }
            },
        )
        .await
    }

    // ── synthesis summary ───────────────────────────────────────────

    /// Condense prior turns into one dense passage of roughly
    /// `target_tokens`, feeding the synthesis phase. The fallback is a
    /// concatenation of turn snippets.
    pub async fn synthesis_summary(
        &self,
        turns: &[ConversationTurn],
        original_query: &str,
        target_tokens: u32,
    ) -> Result<String> {
        let canonical: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        let mut parts = vec![original_query];
        parts.extend(canonical);
        let target_str = target_tokens.to_string();
        parts.push(&target_str);

        self.cached("synthesis-summary", &parts, || async {
            let mut listing = String::new();
            for turn in turns {
                listing.push_str(&format!(
                    "--- {} ({}) ---\n{}\n\n",
                    turn.model_id, turn.phase, turn.content
                ));
            }
            let user = format!(
                "Original question: {original_query}\n\nTurns so far:\n{listing}\
                 Condense everything above into a single dense summary of about \
                 {target_tokens} tokens. Keep every number, every conclusion, and \
                 every unresolved disagreement."
            );
            let max_tokens = target_tokens + target_tokens / 4;

            match self
                .curator
                .complete(
                    "You condense technical discussions.",
                    &user,
                    max_tokens,
                    ANALYTICS_TEMPERATURE,
                )
                .await
            {
                Ok(summary) if !summary.is_empty() => Ok(summary),
                Ok(_) | Err(_) => {
                    tracing::warn!("synthesis summary fell back to concatenated snippets");
                    Ok(snippet_fallback(turns, target_tokens))
                }
            }
        })
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fallbacks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Positional decay: earlier documents score higher, batches later in
/// the input decay further.
fn decay_scores(batch: &[RankedInput], batch_index: usize) -> Vec<RankedDoc> {
    batch
        .iter()
        .enumerate()
        .map(|(i, doc)| RankedDoc {
            id: doc.id.clone(),
            score: 1.0 / (1.0 + (batch_index * RERANK_BATCH + i) as f32),
            reason: "decay fallback".into(),
        })
        .collect()
}

fn snippet_fallback(turns: &[ConversationTurn], target_tokens: u32) -> String {
    let budget_chars = (target_tokens as usize) * 4;
    let per_turn = (budget_chars / turns.len().max(1)).max(80);
    let mut out = String::new();
    for turn in turns {
        let snippet: String = turn.content.chars().take(per_turn).collect();
        out.push_str(&format!("{}: {}\n", turn.model_id, snippet.trim()));
    }
    out
}
