//! Reconciliation of purchases against marketplace settlements.
//!
//! The [`matcher`] classifies purchases, the [`orchestrator`] posts the
//! resulting ledger entries and the [`pipeline`] streams a shop's open
//! candidates through both with bounded concurrency.

pub mod filter;
pub mod matcher;
pub mod orchestrator;
pub mod pipeline;
pub mod records;

pub use filter::*;
pub use matcher::*;
pub use orchestrator::*;
pub use pipeline::*;
pub use records::*;
