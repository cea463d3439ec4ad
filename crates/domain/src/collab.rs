//! Session, turn, and conversation-state records.
//!
//! `ConversationState` is the authoritative per-session record; it lives
//! in the external key-value store and is mutated only by the
//! orchestrator owning the session, under the per-session lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::CollaborationPhase;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

/// A collaboration session as seeded by `initiate`.
///
/// Destroyed on TTL expiry in the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationSession {
    pub id: String,
    pub original_query: String,
    pub participant_model_ids: [String; 2],
    pub current_phase: CollaborationPhase,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    /// Highest fraction of any model's context window used so far.
    pub peak_context_usage: f32,
    pub last_update: DateTime<Utc>,
}

impl CollaborationSession {
    pub fn new(id: &str, query: &str, models: [String; 2]) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_owned(),
            original_query: query.to_owned(),
            participant_model_ids: models,
            current_phase: CollaborationPhase::Idle,
            status: SessionStatus::Active,
            start_time: now,
            peak_context_usage: 0.0,
            last_update: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    pub token_count: u32,
    pub processing_time_ms: u64,
    /// Fraction of the model's context window occupied by the rendered prompt.
    pub context_used: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_solution: Option<String>,
    #[serde(default)]
    pub is_compressed: bool,
    /// Compressed rendition used for future history assembly. The
    /// original stays in `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_final_answer: bool,
    #[serde(default)]
    pub is_verification: bool,
}

/// One model response. Append-only within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: String,
    pub session_id: String,
    pub model_id: String,
    pub phase: CollaborationPhase,
    pub turn_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to_turn_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: TurnMetadata,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Union-merged findings across turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContext {
    pub key_points: Vec<String>,
    pub agreements: Vec<String>,
    pub disagreements: Vec<String>,
    pub working_hypotheses: Vec<String>,
    pub next_steps: Vec<String>,
}

/// Findings extracted from one pair of turns, to be absorbed into
/// [`SharedContext`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContextDelta {
    #[serde(default)]
    pub agreements: Vec<String>,
    #[serde(default)]
    pub disagreements: Vec<String>,
    #[serde(default)]
    pub new_questions: Vec<String>,
    #[serde(default)]
    pub key_insights: Vec<String>,
}

impl SharedContext {
    /// Union-merge a delta into this context: de-duplicate by
    /// case-insensitive exact match, keep the most recent `cap` entries
    /// per category (oldest dropped).
    ///
    /// Key insights feed `key_points`; open questions feed `next_steps`.
    pub fn absorb(&mut self, delta: &SharedContextDelta, cap: usize) {
        merge_category(&mut self.agreements, &delta.agreements, cap);
        merge_category(&mut self.disagreements, &delta.disagreements, cap);
        merge_category(&mut self.key_points, &delta.key_insights, cap);
        merge_category(&mut self.next_steps, &delta.new_questions, cap);
    }

    /// Add a working hypothesis with the same de-dup and cap rules.
    pub fn add_hypothesis(&mut self, hypothesis: &str, cap: usize) {
        merge_category(
            &mut self.working_hypotheses,
            std::slice::from_ref(&hypothesis.to_owned()),
            cap,
        );
    }

    pub fn is_empty(&self) -> bool {
        self.key_points.is_empty()
            && self.agreements.is_empty()
            && self.disagreements.is_empty()
            && self.working_hypotheses.is_empty()
            && self.next_steps.is_empty()
    }

    /// Render the context as a compact digest for prompt inclusion.
    pub fn digest(&self) -> String {
        let mut out = String::new();
        let mut section = |label: &str, items: &[String]| {
            if items.is_empty() {
                return;
            }
            out.push_str(label);
            out.push('\n');
            for item in items {
                out.push_str("- ");
                out.push_str(item);
                out.push('\n');
            }
        };
        section("Key points:", &self.key_points);
        section("Agreements:", &self.agreements);
        section("Disagreements:", &self.disagreements);
        section("Working hypotheses:", &self.working_hypotheses);
        section("Next steps:", &self.next_steps);
        out
    }
}

fn merge_category(target: &mut Vec<String>, incoming: &[String], cap: usize) {
    for item in incoming {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        if target.iter().any(|e| e.to_lowercase() == lowered) {
            continue;
        }
        target.push(trimmed.to_owned());
    }
    if target.len() > cap {
        let excess = target.len() - cap;
        target.drain(..excess);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseOutcome {
    pub completed: bool,
    pub outcome: String,
    /// Consensus score in [0,1] at the time the phase concluded.
    pub consensus: f32,
    pub timestamp: DateTime<Utc>,
}

/// The full per-session conversation record.
///
/// Invariants: `turns` sorted by ascending `turn_number` with no gaps;
/// each turn's phase equals `current_phase` at creation time;
/// `phase_history` lists phases in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub session_id: String,
    pub original_query: String,
    pub current_phase: CollaborationPhase,
    pub participants: Vec<String>,
    pub turns: Vec<ConversationTurn>,
    pub shared_context: SharedContext,
    pub phase_progress: HashMap<CollaborationPhase, PhaseOutcome>,
    pub phase_history: Vec<CollaborationPhase>,
    pub peak_context_usage: f32,
    pub last_update: DateTime<Utc>,
    pub status: SessionStatus,
}

impl ConversationState {
    pub fn new(session_id: &str, query: &str, participants: Vec<String>) -> Self {
        Self {
            session_id: session_id.to_owned(),
            original_query: query.to_owned(),
            current_phase: CollaborationPhase::Idle,
            participants,
            turns: Vec::new(),
            shared_context: SharedContext::default(),
            phase_progress: HashMap::new(),
            phase_history: Vec::new(),
            peak_context_usage: 0.0,
            last_update: Utc::now(),
            status: SessionStatus::Active,
        }
    }

    /// The most recent turn produced by `model_id`, if any.
    pub fn latest_turn_for(&self, model_id: &str) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.model_id == model_id)
    }

    /// Turns produced in `phase`, in order.
    pub fn turns_in_phase(&self, phase: CollaborationPhase) -> Vec<&ConversationTurn> {
        self.turns.iter().filter(|t| t.phase == phase).collect()
    }

    /// The two most recent turns of `phase`, one per participant, if both
    /// participants have contributed.
    pub fn latest_pair_in_phase(
        &self,
        phase: CollaborationPhase,
    ) -> Option<(&ConversationTurn, &ConversationTurn)> {
        let first = self.participants.first()?;
        let second = self.participants.get(1)?;
        let a = self
            .turns
            .iter()
            .rev()
            .find(|t| t.phase == phase && t.model_id == *first)?;
        let b = self
            .turns
            .iter()
            .rev()
            .find(|t| t.phase == phase && t.model_id == *second)?;
        Some((a, b))
    }

    pub fn next_turn_number(&self) -> u32 {
        self.turns.len() as u32
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token allocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A split of a model's context window into history, generation, and
/// reserved-system budgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAllocation {
    pub context_budget_tokens: u32,
    pub generation_budget_tokens: u32,
    pub reserved_system_tokens: u32,
}

impl TokenAllocation {
    pub fn total(&self) -> u32 {
        self.context_budget_tokens + self.generation_budget_tokens + self.reserved_system_tokens
    }

    /// The §safety invariant: total usage never exceeds
    /// `model_context_size × max_usage`.
    pub fn within_limit(&self, model_context_size: u32, max_usage: f32) -> bool {
        (self.total() as f32) <= (model_context_size as f32) * max_usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(model: &str, phase: CollaborationPhase, n: u32) -> ConversationTurn {
        ConversationTurn {
            id: format!("t{n}"),
            session_id: "s1".into(),
            model_id: model.into(),
            phase,
            turn_number: n,
            response_to_turn_id: None,
            content: format!("content {n}"),
            timestamp: Utc::now(),
            metadata: TurnMetadata::default(),
        }
    }

    #[test]
    fn shared_context_dedup_is_case_insensitive() {
        let mut ctx = SharedContext::default();
        let delta = SharedContextDelta {
            agreements: vec!["The answer is 255".into(), "the ANSWER is 255".into()],
            ..Default::default()
        };
        ctx.absorb(&delta, 20);
        assert_eq!(ctx.agreements.len(), 1);
    }

    #[test]
    fn shared_context_caps_at_most_recent() {
        let mut ctx = SharedContext::default();
        for i in 0..25 {
            let delta = SharedContextDelta {
                key_insights: vec![format!("insight {i}")],
                ..Default::default()
            };
            ctx.absorb(&delta, 20);
        }
        assert_eq!(ctx.key_points.len(), 20);
        // Oldest dropped, newest kept.
        assert_eq!(ctx.key_points.first().unwrap(), "insight 5");
        assert_eq!(ctx.key_points.last().unwrap(), "insight 24");
    }

    #[test]
    fn latest_pair_requires_both_participants() {
        let mut state =
            ConversationState::new("s1", "q", vec!["gemma".into(), "qwen".into()]);
        state
            .turns
            .push(turn("gemma", CollaborationPhase::Brainstorm, 0));
        assert!(state
            .latest_pair_in_phase(CollaborationPhase::Brainstorm)
            .is_none());

        state
            .turns
            .push(turn("qwen", CollaborationPhase::Brainstorm, 1));
        let (a, b) = state
            .latest_pair_in_phase(CollaborationPhase::Brainstorm)
            .unwrap();
        assert_eq!(a.model_id, "gemma");
        assert_eq!(b.model_id, "qwen");
    }

    #[test]
    fn allocation_limit_check() {
        let alloc = TokenAllocation {
            context_budget_tokens: 1000,
            generation_budget_tokens: 1500,
            reserved_system_tokens: 300,
        };
        assert!(alloc.within_limit(4096, 0.7));
        assert!(!alloc.within_limit(4096, 0.6));
    }

    #[test]
    fn wire_casing_is_camel_case() {
        let session = CollaborationSession::new("s1", "q", ["a".into(), "b".into()]);
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("originalQuery").is_some());
        assert!(json.get("participantModelIds").is_some());
        assert!(json.get("peakContextUsage").is_some());
    }
}
