//! In-memory stores for match decisions, failures and batch runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::reconciliation::records::*;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct RunTables {
    decisions: HashMap<Uuid, ReconciledTransaction>,
    failures: Vec<FailedReconciliation>,
    runs: HashMap<Uuid, BatchRun>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    tables: Arc<RwLock<RunTables>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, RunTables>> {
        self.tables
            .read()
            .map_err(|_| LedgerError::Storage("run store lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, RunTables>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::Storage("run store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ReconciliationStore for MemoryRunStore {
    async fn record_decision(&self, decision: &ReconciledTransaction) -> LedgerResult<()> {
        let purchase_id = decision.purchase_id.ok_or_else(|| {
            LedgerError::Validation("Reconciliation decision needs a purchase".to_string())
        })?;
        self.write()?.decisions.insert(purchase_id, decision.clone());
        Ok(())
    }

    async fn get_decision(&self, purchase_id: Uuid) -> LedgerResult<Option<ReconciledTransaction>> {
        Ok(self.read()?.decisions.get(&purchase_id).cloned())
    }
}

#[async_trait]
impl FailureStore for MemoryRunStore {
    async fn record_failure(&self, failure: &FailedReconciliation) -> LedgerResult<()> {
        self.write()?.failures.push(failure.clone());
        Ok(())
    }

    async fn list_failures(&self, shop: &str, pending_only: bool) -> LedgerResult<Vec<FailedReconciliation>> {
        Ok(self
            .read()?
            .failures
            .iter()
            .filter(|f| f.shop == shop && !(pending_only && f.retried))
            .cloned()
            .collect())
    }

    async fn mark_retried(&self, failure_id: Uuid) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let failure = tables
            .failures
            .iter_mut()
            .find(|f| f.id == failure_id)
            .ok_or_else(|| LedgerError::NotFound(format!("failed reconciliation {}", failure_id)))?;
        failure.retried = true;
        Ok(())
    }
}

#[async_trait]
impl BatchRunStore for MemoryRunStore {
    async fn create_run(&self, process_type: &str, shop: &str) -> LedgerResult<Uuid> {
        let mut run = BatchRun::new(process_type, shop);
        run.status = BatchStatus::Processing;
        let id = run.id;
        self.write()?.runs.insert(id, run);
        Ok(id)
    }

    async fn update_run(&self, run_id: Uuid, counters: &RunCounters, status: BatchStatus) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let run = tables
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| LedgerError::NotFound(format!("batch run {}", run_id)))?;
        if run.status.is_final() {
            return Err(LedgerError::AlreadyProcessed(format!("batch run {}", run_id)));
        }
        run.counters = counters.clone();
        run.total = counters.processed;
        run.status = status;
        Ok(())
    }

    async fn finalize_run(&self, run: &BatchRun) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let stored = tables
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| LedgerError::NotFound(format!("batch run {}", run.id)))?;
        if stored.status.is_final() {
            return Err(LedgerError::AlreadyProcessed(format!("batch run {}", run.id)));
        }
        *stored = run.clone();
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> LedgerResult<Option<BatchRun>> {
        Ok(self.read()?.runs.get(&run_id).cloned())
    }
}
