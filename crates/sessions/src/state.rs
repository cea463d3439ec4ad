//! Authority over each session's `ConversationState`.
//!
//! All reads and mutations go through the store adapter; writes replace
//! the whole record atomically under the session key. Callers hold the
//! per-session lock (see [`crate::lock`]) across a read-modify-write.

use std::sync::Arc;

use chrono::Utc;

use sy_domain::collab::{
    ConversationState, ConversationTurn, PhaseOutcome, SharedContextDelta,
};
use sy_domain::{CollaborationPhase, Error, Result};
use sy_store::StoreAdapter;

/// Most recent entries kept per shared-context category.
const SHARED_CONTEXT_CAP: usize = 20;

pub struct ConversationStateManager {
    store: Arc<StoreAdapter>,
}

impl ConversationStateManager {
    pub fn new(store: Arc<StoreAdapter>) -> Self {
        Self { store }
    }

    /// Create and persist a fresh conversation record.
    pub async fn create(
        &self,
        session_id: &str,
        query: &str,
        participants: Vec<String>,
    ) -> Result<ConversationState> {
        let state = ConversationState::new(session_id, query, participants);
        self.store.save_conversation(&state).await?;
        tracing::info!(session_id, "conversation state created");
        Ok(state)
    }

    pub async fn load(&self, session_id: &str) -> Result<ConversationState> {
        self.store
            .load_conversation(session_id)
            .await?
            .ok_or_else(|| Error::SessionExpired(session_id.to_owned()))
    }

    pub async fn save(&self, state: &mut ConversationState) -> Result<()> {
        state.last_update = Utc::now();
        self.store.save_conversation(state).await
    }

    /// Append a turn. The turn number must equal the current turn count;
    /// anything else is rejected and the state is left unchanged.
    pub async fn append_turn(
        &self,
        state: &mut ConversationState,
        turn: ConversationTurn,
    ) -> Result<()> {
        let expected = state.next_turn_number();
        if turn.turn_number != expected {
            return Err(Error::OutOfOrderTurn {
                expected,
                got: turn.turn_number,
            });
        }
        state.turns.push(turn);
        self.save(state).await
    }

    /// Record a brainstorm hypothesis in the shared context.
    pub async fn add_working_hypothesis(
        &self,
        state: &mut ConversationState,
        hypothesis: &str,
    ) -> Result<()> {
        state
            .shared_context
            .add_hypothesis(hypothesis, SHARED_CONTEXT_CAP);
        self.save(state).await
    }

    /// Union-merge extracted findings into the shared context.
    pub async fn update_shared_context(
        &self,
        state: &mut ConversationState,
        delta: &SharedContextDelta,
    ) -> Result<()> {
        state.shared_context.absorb(delta, SHARED_CONTEXT_CAP);
        self.save(state).await
    }

    /// Record a phase conclusion: appends to the history and upserts the
    /// per-phase outcome.
    pub async fn record_phase_outcome(
        &self,
        state: &mut ConversationState,
        phase: CollaborationPhase,
        outcome: &str,
        consensus: f32,
    ) -> Result<()> {
        state.phase_history.push(phase);
        state.phase_progress.insert(
            phase,
            PhaseOutcome {
                completed: true,
                outcome: outcome.to_owned(),
                consensus,
                timestamp: Utc::now(),
            },
        );
        self.save(state).await
    }
}
