use serde::{Deserialize, Serialize};
use std::fmt;

/// A labelled stage of the collaboration.
///
/// Each participant produces one turn per round under a phase-specific
/// instruction; the fixed forward order runs BRAINSTORM through
/// CONSENSUS, with jump edges to CONSENSUS/COMPLETE allowed from any
/// non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollaborationPhase {
    Idle,
    Brainstorm,
    Critique,
    Revise,
    Synthesize,
    Consensus,
    Complete,
}

impl CollaborationPhase {
    /// The next phase in the fixed forward order. COMPLETE is absorbing.
    pub fn next_in_order(self) -> Self {
        match self {
            Self::Idle => Self::Brainstorm,
            Self::Brainstorm => Self::Critique,
            Self::Critique => Self::Revise,
            Self::Revise => Self::Synthesize,
            Self::Synthesize => Self::Consensus,
            Self::Consensus | Self::Complete => Self::Complete,
        }
    }

    /// Position in the forward order. Used to reject backward jumps.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Brainstorm => 1,
            Self::Critique => 2,
            Self::Revise => 3,
            Self::Synthesize => 4,
            Self::Consensus => 5,
            Self::Complete => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Brainstorm => "BRAINSTORM",
            Self::Critique => "CRITIQUE",
            Self::Revise => "REVISE",
            Self::Synthesize => "SYNTHESIZE",
            Self::Consensus => "CONSENSUS",
            Self::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for CollaborationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
