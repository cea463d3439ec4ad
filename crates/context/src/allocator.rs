//! Phase-sensitive split of a model's context window.

use sy_domain::collab::TokenAllocation;
use sy_domain::CollaborationPhase;

/// Floor kept for generation when the clamp has to shrink budgets.
const GENERATION_FLOOR: u32 = 64;

/// Per-phase `(context_pct, generation_pct)` of the model window.
///
/// Early phases favor generation room (divergent output), later phases
/// favor history (the models must read each other).
fn phase_split(phase: CollaborationPhase) -> (f32, f32) {
    match phase {
        CollaborationPhase::Brainstorm => (0.15, 0.35),
        CollaborationPhase::Critique => (0.25, 0.25),
        CollaborationPhase::Revise => (0.30, 0.20),
        CollaborationPhase::Synthesize => (0.20, 0.30),
        CollaborationPhase::Consensus => (0.25, 0.25),
        CollaborationPhase::Idle | CollaborationPhase::Complete => (0.20, 0.30),
    }
}

/// Compute the token allocation for one model invocation.
///
/// The returned allocation always satisfies
/// `total ≤ model_context_size × max_usage`: history is shrunk first,
/// then generation down to [`GENERATION_FLOOR`], then whatever remains.
pub fn allocate(
    model_context_size: u32,
    phase: CollaborationPhase,
    approx_history_tokens: u32,
    approx_system_tokens: u32,
    max_usage: f32,
) -> TokenAllocation {
    let (context_pct, generation_pct) = phase_split(phase);
    let window = model_context_size as f32;
    let cap = (window * max_usage) as u32;

    let mut context_budget = (window * context_pct) as u32;
    let mut generation_budget = (window * generation_pct) as u32;
    let mut reserved_system = approx_system_tokens;

    // History never needs more than it has.
    context_budget = context_budget.min(approx_history_tokens.max(1));

    let mut total = context_budget + generation_budget + reserved_system;
    if total > cap {
        let over = total - cap;
        let shrink = over.min(context_budget);
        context_budget -= shrink;
        total -= shrink;
    }
    if total > cap {
        let over = total - cap;
        let shrinkable = generation_budget.saturating_sub(GENERATION_FLOOR);
        let shrink = over.min(shrinkable);
        generation_budget -= shrink;
        total -= shrink;
    }
    if total > cap {
        // System prompt alone exceeds the usable window. Keep minimal
        // generation room and clamp the reservation to what fits; the
        // call will truncate its system prompt against this.
        generation_budget = GENERATION_FLOOR.min(cap);
        reserved_system = cap.saturating_sub(context_budget + generation_budget);
        tracing::warn!(
            model_context_size,
            approx_system_tokens,
            phase = %phase,
            "system prompt exceeds the usable window; reservation clamped"
        );
    }

    TokenAllocation {
        context_budget_tokens: context_budget,
        generation_budget_tokens: generation_budget,
        reserved_system_tokens: reserved_system,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_follow_phase_table() {
        let alloc = allocate(8192, CollaborationPhase::Brainstorm, 100_000, 200, 0.7);
        // 15% of 8192 = 1228, 35% = 2867.
        assert_eq!(alloc.context_budget_tokens, 1228);
        assert_eq!(alloc.generation_budget_tokens, 2867);
        assert_eq!(alloc.reserved_system_tokens, 200);
    }

    #[test]
    fn invariant_holds_for_every_phase() {
        let phases = [
            CollaborationPhase::Brainstorm,
            CollaborationPhase::Critique,
            CollaborationPhase::Revise,
            CollaborationPhase::Synthesize,
            CollaborationPhase::Consensus,
            CollaborationPhase::Complete,
        ];
        for phase in phases {
            for system in [0u32, 200, 2000, 6000] {
                let alloc = allocate(8192, phase, 100_000, system, 0.7);
                assert!(
                    alloc.within_limit(8192, 0.7),
                    "phase {phase} system {system}: total {} over cap",
                    alloc.total()
                );
            }
        }
    }

    #[test]
    fn small_history_is_not_over_allocated() {
        let alloc = allocate(8192, CollaborationPhase::Revise, 50, 100, 0.7);
        assert_eq!(alloc.context_budget_tokens, 50);
    }

    #[test]
    fn oversized_system_prompt_shrinks_history_first() {
        // 70% of 4096 = 2867 cap. System 2000 + critique budgets
        // (1024 + 1024) overflows; history gives way before generation.
        let alloc = allocate(4096, CollaborationPhase::Critique, 100_000, 2000, 0.7);
        assert!(alloc.within_limit(4096, 0.7));
        assert!(alloc.generation_budget_tokens >= GENERATION_FLOOR);
        assert!(alloc.context_budget_tokens < 1024);
    }

    #[test]
    fn generation_keeps_floor_under_pressure() {
        let alloc = allocate(1024, CollaborationPhase::Consensus, 100_000, 500, 0.7);
        assert!(alloc.within_limit(1024, 0.7));
        assert!(alloc.generation_budget_tokens >= GENERATION_FLOOR);
    }
}
