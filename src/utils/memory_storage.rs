//! In-memory ledger storage for testing and development

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<String, Account>,
    entries: HashMap<Uuid, JournalEntry>,
    lines: HashMap<Uuid, Vec<JournalLine>>,
    sources: HashMap<SourceRef, Uuid>,
}

/// In-memory ledger storage. Header, lines and the source index live behind
/// one lock so an insert is all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable database; every call fails with `Storage`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of journal entries stored
    pub fn entry_count(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, LedgerState>> {
        self.check_available()?;
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, LedgerState>> {
        self.check_available()?;
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".to_string()))
    }

    fn check_available(&self) -> LedgerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LedgerError::Storage("ledger storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn insert_entry(&self, entry: &JournalEntry, lines: &[JournalLine]) -> LedgerResult<()> {
        let mut state = self.write()?;

        if state.sources.contains_key(&entry.source) {
            return Err(LedgerError::DuplicateSource {
                source_type: entry.source.source_type,
                source_id: entry.source.source_id.clone(),
            });
        }
        if state.entries.contains_key(&entry.id) {
            return Err(LedgerError::Validation(format!(
                "Journal entry {} already exists",
                entry.id
            )));
        }

        state.sources.insert(entry.source.clone(), entry.id);
        state.entries.insert(entry.id, entry.clone());
        state.lines.insert(entry.id, lines.to_vec());
        Ok(())
    }

    async fn get_entry(&self, entry_id: Uuid) -> LedgerResult<Option<JournalEntry>> {
        Ok(self.read()?.entries.get(&entry_id).cloned())
    }

    async fn lines_for(&self, entry_id: Uuid) -> LedgerResult<Vec<JournalLine>> {
        Ok(self.read()?.lines.get(&entry_id).cloned().unwrap_or_default())
    }

    async fn find_by_source(&self, source: &SourceRef) -> LedgerResult<Option<JournalEntry>> {
        let state = self.read()?;
        Ok(state
            .sources
            .get(source)
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    async fn entries_by_source(&self, source_id: &str) -> LedgerResult<Vec<JournalEntry>> {
        let state = self.read()?;
        Ok(state
            .entries
            .values()
            .filter(|entry| entry.source.descends_from(source_id))
            .cloned()
            .collect())
    }

    async fn lines_between(
        &self,
        shop: &str,
        from: Option<NaiveDate>,
        to: NaiveDate,
    ) -> LedgerResult<Vec<JournalLine>> {
        let state = self.read()?;
        let lines = state
            .entries
            .values()
            .filter(|entry| {
                // Check shop and date range
                if entry.shop != shop || entry.entry_date > to {
                    return false;
                }
                from.is_none_or(|start| entry.entry_date >= start)
            })
            .flat_map(|entry| state.lines.get(&entry.id).cloned().unwrap_or_default())
            .collect();
        Ok(lines)
    }

    async fn save_account(&self, account: &Account) -> LedgerResult<()> {
        self.write()?
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        Ok(self.read()?.accounts.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn entry(source_id: &str) -> (JournalEntry, Vec<JournalLine>) {
        let entry = JournalEntry::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "Test".to_string(),
            SourceRef::new(SourceType::Sale, source_id),
            "shop".to_string(),
        );
        let lines = vec![
            JournalLine::debit("cash".to_string(), BigDecimal::from(10), None),
            JournalLine::credit("revenue".to_string(), BigDecimal::from(10), None),
        ];
        (entry, lines)
    }

    #[tokio::test]
    async fn test_duplicate_insert_leaves_no_partial_rows() {
        let storage = MemoryStorage::new();
        let (first, lines) = entry("ORD-1");
        storage.insert_entry(&first, &lines).await.unwrap();

        let (second, lines) = entry("ORD-1");
        let err = storage.insert_entry(&second, &lines).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateSource { .. }));
        assert_eq!(storage.entry_count(), 1);
        assert!(storage.get_entry(second.id).await.unwrap().is_none());
        assert!(storage.lines_for(second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_storage_fails_with_transient_error() {
        let storage = MemoryStorage::new();
        storage.set_unavailable(true);
        let err = storage.list_accounts().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
