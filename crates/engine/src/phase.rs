//! Deterministic phase transitions.
//!
//! Evaluated after both models have contributed in the current phase.
//! Honors the agreement recommendation, enforces the no-backward rule,
//! caps repeats per phase, and turns a cancel signal into a terminal
//! halt.

use sy_domain::agreement::FinalRecommendation;
use sy_domain::CollaborationPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDecision {
    /// Move to (or repeat) a phase. `forced` marks a round-cap advance.
    Continue {
        next: CollaborationPhase,
        forced: bool,
    },
    /// Cancelled: stop and report the session failed.
    Halt,
}

pub struct PhaseMachine {
    max_rounds_per_phase: u32,
}

impl PhaseMachine {
    pub fn new(max_rounds_per_phase: u32) -> Self {
        Self {
            max_rounds_per_phase: max_rounds_per_phase.max(1),
        }
    }

    /// Decide the phase that follows `current`.
    ///
    /// `rounds_completed` counts completed rounds of the current phase,
    /// this one included.
    pub fn next(
        &self,
        current: CollaborationPhase,
        recommendation: &FinalRecommendation,
        rounds_completed: u32,
        cancelled: bool,
    ) -> PhaseDecision {
        if cancelled {
            return PhaseDecision::Halt;
        }
        if current.is_terminal() {
            return PhaseDecision::Continue {
                next: CollaborationPhase::Complete,
                forced: false,
            };
        }

        let mut next = recommendation.next_phase;

        // Backward never; unknown skips become the ordered next. Jumps
        // to CONSENSUS (or COMPLETE out of CONSENSUS) pass through.
        let legal_jump = next == CollaborationPhase::Consensus
            || (next == CollaborationPhase::Complete && current == CollaborationPhase::Consensus);
        if next.ordinal() < current.ordinal()
            || (!legal_jump && next != current && next != current.next_in_order())
        {
            next = current.next_in_order();
        }

        // A phase may repeat only up to the round cap.
        if next == current && rounds_completed >= self.max_rounds_per_phase {
            tracing::info!(
                phase = %current,
                rounds_completed,
                "round cap reached, forcing phase advance"
            );
            return PhaseDecision::Continue {
                next: current.next_in_order(),
                forced: true,
            };
        }

        PhaseDecision::Continue {
            next,
            forced: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CollaborationPhase::*;

    fn rec(next: CollaborationPhase, is_jump: bool) -> FinalRecommendation {
        FinalRecommendation {
            next_phase: next,
            reasoning: String::new(),
            confidence: 0.8,
            is_phase_jump: is_jump,
            jump_reason: None,
        }
    }

    #[test]
    fn ordered_walk_follows_recommendations() {
        let machine = PhaseMachine::new(3);
        let mut phase = Brainstorm;
        let expected = [Critique, Revise, Synthesize, Consensus, Complete];
        for want in expected {
            match machine.next(phase, &rec(phase.next_in_order(), false), 1, false) {
                PhaseDecision::Continue { next, forced } => {
                    assert_eq!(next, want);
                    assert!(!forced);
                    phase = next;
                }
                PhaseDecision::Halt => panic!("unexpected halt"),
            }
        }
    }

    #[test]
    fn jump_to_consensus_is_honored() {
        let machine = PhaseMachine::new(3);
        let decision = machine.next(Brainstorm, &rec(Consensus, true), 1, false);
        assert_eq!(
            decision,
            PhaseDecision::Continue {
                next: Consensus,
                forced: false
            }
        );
    }

    #[test]
    fn backward_recommendation_is_overridden() {
        let machine = PhaseMachine::new(3);
        let decision = machine.next(Synthesize, &rec(Brainstorm, false), 1, false);
        assert_eq!(
            decision,
            PhaseDecision::Continue {
                next: Consensus,
                forced: false
            }
        );
    }

    #[test]
    fn complete_jump_only_from_consensus() {
        let machine = PhaseMachine::new(3);
        // From CRITIQUE a COMPLETE recommendation collapses to the
        // ordered next phase.
        let decision = machine.next(Critique, &rec(Complete, true), 1, false);
        assert_eq!(
            decision,
            PhaseDecision::Continue {
                next: Revise,
                forced: false
            }
        );

        let decision = machine.next(Consensus, &rec(Complete, false), 1, false);
        assert_eq!(
            decision,
            PhaseDecision::Continue {
                next: Complete,
                forced: false
            }
        );
    }

    #[test]
    fn repeat_allowed_until_round_cap() {
        let machine = PhaseMachine::new(3);

        let decision = machine.next(Critique, &rec(Critique, false), 2, false);
        assert_eq!(
            decision,
            PhaseDecision::Continue {
                next: Critique,
                forced: false
            }
        );

        let decision = machine.next(Critique, &rec(Critique, false), 3, false);
        assert_eq!(
            decision,
            PhaseDecision::Continue {
                next: Revise,
                forced: true
            }
        );
    }

    #[test]
    fn cancel_halts_from_any_phase() {
        let machine = PhaseMachine::new(3);
        for phase in [Brainstorm, Revise, Consensus] {
            assert_eq!(
                machine.next(phase, &rec(phase.next_in_order(), false), 1, true),
                PhaseDecision::Halt
            );
        }
    }
}
