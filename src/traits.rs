//! Traits for storage abstraction and the collaborators the core consumes

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::reconciliation::records::*;
use crate::types::*;

/// Storage abstraction for journal entries and the chart of accounts
///
/// Implementations back the ledger with any store (PostgreSQL, SQLite,
/// in-memory, etc.). `insert_entry` is the only contended mutation and must be
/// atomic: the `(source_type, source_id)` uniqueness check and the insert of the
/// header plus every line happen as one unit, or nothing is written.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Insert an entry and its lines atomically, failing with
    /// `DuplicateSource` if the entry's source already has an entry
    async fn insert_entry(&self, entry: &JournalEntry, lines: &[JournalLine]) -> LedgerResult<()>;

    async fn get_entry(&self, entry_id: Uuid) -> LedgerResult<Option<JournalEntry>>;

    async fn lines_for(&self, entry_id: Uuid) -> LedgerResult<Vec<JournalLine>>;

    /// Exact lookup on the idempotency key
    async fn find_by_source(&self, source: &SourceRef) -> LedgerResult<Option<JournalEntry>>;

    /// Entries whose source id equals `source_id` or starts with `source_id-`
    async fn entries_by_source(&self, source_id: &str) -> LedgerResult<Vec<JournalEntry>>;

    /// Lines of the shop's entries dated within `[from, to]` (`from` open when `None`)
    async fn lines_between(
        &self,
        shop: &str,
        from: Option<NaiveDate>,
        to: NaiveDate,
    ) -> LedgerResult<Vec<JournalLine>>;

    async fn save_account(&self, account: &Account) -> LedgerResult<()>;

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>>;

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>>;
}

/// Role based account resolution
#[async_trait]
pub trait ChartOfAccounts: Send + Sync {
    async fn resolve_account(&self, role: AccountRole) -> LedgerResult<String>;
}

/// Purchase records owned by the import subsystem
#[async_trait]
pub trait PurchaseSource: Send + Sync {
    async fn list_purchases_by_shop_and_date(
        &self,
        shop: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<PurchaseRecord>>;

    async fn get_purchase_by_invoice(&self, code: &str) -> LedgerResult<Option<PurchaseRecord>>;
}

/// Settlement and escrow adjustment records owned by the import subsystem
#[async_trait]
pub trait SettlementSource: Send + Sync {
    async fn get_settlement_by_order(&self, code: &str) -> LedgerResult<Option<SettlementRecord>>;

    async fn get_escrow_adjustments(&self, code: &str) -> LedgerResult<Vec<EscrowAdjustment>>;
}

/// Persistence of match decisions
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Replace the active decision for the purchase, if any
    async fn record_decision(&self, decision: &ReconciledTransaction) -> LedgerResult<()>;

    async fn get_decision(&self, purchase_id: Uuid) -> LedgerResult<Option<ReconciledTransaction>>;
}

/// Append-only failure ledger for per-record reconciliation failures
#[async_trait]
pub trait FailureStore: Send + Sync {
    async fn record_failure(&self, failure: &FailedReconciliation) -> LedgerResult<()>;

    /// Failures of a shop, oldest first; `pending_only` skips retried rows
    async fn list_failures(&self, shop: &str, pending_only: bool) -> LedgerResult<Vec<FailedReconciliation>>;

    async fn mark_retried(&self, failure_id: Uuid) -> LedgerResult<()>;
}

/// Batch/progress sink
#[async_trait]
pub trait BatchRunStore: Send + Sync {
    async fn create_run(&self, process_type: &str, shop: &str) -> LedgerResult<Uuid>;

    async fn update_run(&self, run_id: Uuid, counters: &RunCounters, status: BatchStatus) -> LedgerResult<()>;

    /// Persist final counters and histogram; a run is finalized exactly once
    async fn finalize_run(&self, run: &BatchRun) -> LedgerResult<()>;

    async fn get_run(&self, run_id: Uuid) -> LedgerResult<Option<BatchRun>>;
}
