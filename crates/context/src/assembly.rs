//! Fits candidate history sections into the allocated context budget.
//!
//! The original query and each model's most recent response are
//! unconditional; everything else is admitted in order until the budget
//! runs out, oldest-first among the droppable sections.

use sy_domain::tokens::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Always included, regardless of budget.
    OriginalQuery,
    /// The other model's most recent response. Always included.
    LatestResponse,
    SharedContext,
    PriorTurn,
}

impl SectionKind {
    fn is_unconditional(self) -> bool {
        matches!(self, Self::OriginalQuery | Self::LatestResponse)
    }
}

#[derive(Debug, Clone)]
pub struct HistorySection {
    pub kind: SectionKind,
    pub label: String,
    pub content: String,
}

impl HistorySection {
    pub fn new(kind: SectionKind, label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            content: content.into(),
        }
    }
}

/// The assembled history text plus accounting.
#[derive(Debug)]
pub struct AssembledHistory {
    pub text: String,
    pub tokens: u32,
    /// Droppable sections that did not fit.
    pub dropped: usize,
}

/// Fit `sections` (in priority order) into `budget_tokens`.
///
/// Candidate order is the caller's: unconditional sections wherever they
/// appear, then shared context, then prior turns newest-first. Droppable
/// sections are skipped once the running total would exceed the budget;
/// later, smaller sections may still fit.
pub fn assemble_history(sections: &[HistorySection], budget_tokens: u32) -> AssembledHistory {
    let mut parts: Vec<String> = Vec::new();
    let mut used: u32 = 0;
    let mut dropped = 0usize;

    for section in sections {
        let rendered = format!("{}:\n{}", section.label, section.content.trim());
        let cost = estimate_tokens(&rendered);
        if section.kind.is_unconditional() || used + cost <= budget_tokens {
            used += cost;
            parts.push(rendered);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, used, budget_tokens, "history sections dropped to fit budget");
    }

    AssembledHistory {
        text: parts.join("\n\n"),
        tokens: used,
        dropped,
    }
}
