//! # Reconciliation Core
//!
//! Reconciles dropshipping purchases against marketplace settlements and
//! records the outcome as balanced double-entry ledger postings.
//!
//! ## Features
//!
//! - **Ledger store**: balanced, atomically inserted journal entries with a
//!   `(source_type, source_id)` idempotency key
//! - **Match engine**: classifies purchases as unmatched, candidate-matched,
//!   confirmed, returned or cancelled, and lists open candidates with typed filters
//! - **Orchestrator**: posts settled sales, return reversals and cancellations
//! - **Streaming pipeline**: chunked, bounded-concurrency reconciliation of a
//!   whole shop with memory back-pressure and a persistent failure ledger
//! - **Storage abstraction**: every collaborator is a trait; in-memory
//!   implementations live in [`utils`]
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{utils::MemoryStorage, AccountManager, Ledger};
//! use reconciliation_core::ledger::account::utils::create_marketplace_chart;
//! use std::sync::Arc;
//!
//! # async fn demo() -> reconciliation_core::LedgerResult<()> {
//! let storage = Arc::new(MemoryStorage::new());
//! create_marketplace_chart(&AccountManager::new(storage.clone())).await?;
//! let ledger = Ledger::new(storage);
//! # let _ = ledger;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;

// Re-export posting patterns for convenience
pub use ledger::transaction::patterns;
