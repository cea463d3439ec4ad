//! Phase-sensitive context-window budgeting and history assembly.
//!
//! Pure computation: the allocator splits a model's window into history,
//! generation, and reserved-system budgets per phase; assembly fits the
//! candidate history sections into the allocated budget.

pub mod allocator;
pub mod assembly;

pub use allocator::allocate;
pub use assembly::{assemble_history, HistorySection, SectionKind};
