//! Ledger store: the single writer of journal entries.
//!
//! Every posting goes through [`Ledger::post`], which rounds the lines to the
//! minor currency unit, rejects anything that does not balance exactly, and
//! hands the entry to the storage backend as one atomic insert. The backend
//! owns the `(source_type, source_id)` uniqueness check so that concurrent
//! posters racing on the same source cannot both succeed.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::ledger::transaction::JournalBuilder;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{normalize_lines, validate_description, validate_source_id};

/// Ledger store over a storage backend
pub struct Ledger<S: LedgerStorage> {
    storage: Arc<S>,
    config: LedgerConfig,
}

impl<S: LedgerStorage> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: LedgerStorage> Ledger<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_config(storage, LedgerConfig::default())
    }

    pub fn with_config(storage: Arc<S>, config: LedgerConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn minor_unit_scale(&self) -> i64 {
        self.config.minor_unit_scale
    }

    /// Post a balanced entry and return its id.
    ///
    /// Fails with `Unbalanced` when the rounded debit and credit totals
    /// differ, and with `DuplicateSource` when the entry's source was already
    /// posted. Nothing is written on failure.
    pub async fn post(&self, mut entry: JournalEntry, lines: Vec<JournalLine>) -> LedgerResult<Uuid> {
        validate_description(&entry.description)?;
        validate_source_id(&entry.source.source_id)?;
        let mut lines = normalize_lines(lines, self.config.minor_unit_scale)?;

        let referenced: HashSet<&str> = lines.iter().map(|l| l.account_id.as_str()).collect();
        for account_id in referenced {
            if self.storage.get_account(account_id).await?.is_none() {
                return Err(LedgerError::AccountNotFound(account_id.to_string()));
            }
        }

        if entry.id.is_nil() {
            entry.id = Uuid::new_v4();
        }
        for line in &mut lines {
            line.entry_id = entry.id;
        }

        self.storage.insert_entry(&entry, &lines).await?;

        tracing::info!(
            entry_id = %entry.id,
            source = %entry.source,
            shop = %entry.shop,
            lines = lines.len(),
            "Posted journal entry"
        );
        Ok(entry.id)
    }

    /// Post the entry held by a builder
    pub async fn post_built(&self, builder: JournalBuilder) -> LedgerResult<Uuid> {
        let (entry, lines) = builder.into_parts();
        self.post(entry, lines).await
    }

    /// Post an operator adjustment keyed by `source_id`
    pub async fn post_manual_adjustment(
        &self,
        shop: &str,
        source_id: &str,
        entry_date: NaiveDate,
        description: &str,
        lines: Vec<JournalLine>,
    ) -> LedgerResult<Uuid> {
        let builder = JournalBuilder::new(
            entry_date,
            description.to_string(),
            SourceRef::new(SourceType::ManualAdjustment, source_id),
            shop.to_string(),
        )
        .lines(lines);
        self.post_built(builder).await
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> LedgerResult<Option<JournalEntry>> {
        self.storage.get_entry(entry_id).await
    }

    pub async fn lines_for(&self, entry_id: Uuid) -> LedgerResult<Vec<JournalLine>> {
        self.storage.lines_for(entry_id).await
    }

    pub async fn find_by_source(&self, source: &SourceRef) -> LedgerResult<Option<JournalEntry>> {
        self.storage.find_by_source(source).await
    }

    /// All entries spawned from one originating transaction, oldest first
    pub async fn entries_by_source(&self, source_id: &str) -> LedgerResult<Vec<JournalEntry>> {
        let mut entries = self.storage.entries_by_source(source_id).await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Whether the order already carries a sale or cancellation posting
    pub async fn has_terminal_entry(&self, source_id: &str) -> LedgerResult<bool> {
        Ok(self
            .storage
            .entries_by_source(source_id)
            .await?
            .iter()
            .any(|entry| entry.source.source_id == source_id && entry.source.source_type.is_terminal()))
    }

    /// Balances of every account up to and including `as_of`
    pub async fn balances_as_of(&self, shop: &str, as_of: NaiveDate) -> LedgerResult<Vec<AccountBalance>> {
        let lines = self.storage.lines_between(shop, None, as_of).await?;
        self.aggregate(lines).await
    }

    /// Balances of every account for entries dated within `[from, to]`
    pub async fn balances_between(
        &self,
        shop: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<AccountBalance>> {
        if from > to {
            return Err(LedgerError::Validation(format!(
                "Balance window starts after it ends: {} > {}",
                from, to
            )));
        }
        let lines = self.storage.lines_between(shop, Some(from), to).await?;
        self.aggregate(lines).await
    }

    /// Left-join of the chart against line totals; idle accounts report zero
    async fn aggregate(&self, lines: Vec<JournalLine>) -> LedgerResult<Vec<AccountBalance>> {
        let mut totals: BTreeMap<String, (BigDecimal, BigDecimal)> = BTreeMap::new();
        for line in lines {
            let slot = totals
                .entry(line.account_id)
                .or_insert_with(|| (BigDecimal::from(0), BigDecimal::from(0)));
            match line.entry_type {
                EntryType::Debit => slot.0 += line.amount,
                EntryType::Credit => slot.1 += line.amount,
            }
        }

        let mut accounts = self.storage.list_accounts().await?;
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts
            .into_iter()
            .map(|account| {
                let (debits, credits) = totals
                    .remove(&account.id)
                    .unwrap_or_else(|| (BigDecimal::from(0), BigDecimal::from(0)));
                AccountBalance::from_totals(account, debits, credits)
            })
            .collect())
    }

    /// Validate the integrity of the ledger
    pub async fn validate_integrity(&self, shop: &str, as_of: NaiveDate) -> LedgerResult<LedgerIntegrityReport> {
        let balances = self.balances_as_of(shop, as_of).await?;
        let total_debits: BigDecimal = balances.iter().map(|b| &b.total_debits).sum();
        let total_credits: BigDecimal = balances.iter().map(|b| &b.total_credits).sum();

        let mut issues = Vec::new();
        if total_debits != total_credits {
            issues.push(format!(
                "Ledger is not balanced: debits = {}, credits = {}",
                total_debits, total_credits
            ));
        }

        Ok(LedgerIntegrityReport {
            as_of_date: as_of,
            is_valid: issues.is_empty(),
            issues,
            total_debits,
            total_credits,
        })
    }
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub as_of_date: NaiveDate,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::{utils::create_marketplace_chart, AccountManager};
    use crate::utils::memory_storage::MemoryStorage;

    async fn ledger_with_chart() -> Ledger<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        create_marketplace_chart(&AccountManager::new(storage.clone()))
            .await
            .unwrap();
        Ledger::new(storage)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn sale(order: &str, day: u32, amount: i64) -> JournalBuilder {
        JournalBuilder::new(
            date(day),
            format!("Sale {}", order),
            SourceRef::new(SourceType::Sale, order),
            "shop-a".to_string(),
        )
        .debit("1120".to_string(), BigDecimal::from(amount), None)
        .credit("4000".to_string(), BigDecimal::from(amount), None)
    }

    #[tokio::test]
    async fn test_post_and_read_back() {
        let ledger = ledger_with_chart().await;
        let id = ledger.post_built(sale("ORD-1", 1, 1000)).await.unwrap();

        let lines = ledger.lines_for(id).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.entry_id == id));
        assert_eq!(total_debits(&lines), total_credits(&lines));
    }

    #[tokio::test]
    async fn test_duplicate_source_rejected() {
        let ledger = ledger_with_chart().await;
        ledger.post_built(sale("ORD-1", 1, 1000)).await.unwrap();
        let second = ledger.post_built(sale("ORD-1", 2, 500)).await;
        assert_eq!(
            second,
            Err(LedgerError::DuplicateSource {
                source_type: SourceType::Sale,
                source_id: "ORD-1".to_string(),
            })
        );
        assert_eq!(ledger.entries_by_source("ORD-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_account_rejected() {
        let ledger = ledger_with_chart().await;
        let builder = JournalBuilder::new(
            date(1),
            "Bad".to_string(),
            SourceRef::new(SourceType::ManualAdjustment, "ADJ-1"),
            "shop-a".to_string(),
        )
        .debit("9999".to_string(), BigDecimal::from(5), None)
        .credit("4000".to_string(), BigDecimal::from(5), None);
        assert_eq!(
            ledger.post_built(builder).await,
            Err(LedgerError::AccountNotFound("9999".to_string()))
        );
    }

    #[tokio::test]
    async fn test_balances_include_idle_accounts() {
        let ledger = ledger_with_chart().await;
        ledger.post_built(sale("ORD-1", 5, 1000)).await.unwrap();
        ledger.post_built(sale("ORD-2", 20, 250)).await.unwrap();

        let as_of = ledger.balances_as_of("shop-a", date(10)).await.unwrap();
        assert_eq!(as_of.len(), AccountRole::ALL.len());
        let cash = as_of.iter().find(|b| b.account.id == "1120").unwrap();
        assert_eq!(cash.balance, BigDecimal::from(1000));
        let cogs = as_of.iter().find(|b| b.account.id == "5000").unwrap();
        assert_eq!(cogs.balance, BigDecimal::from(0));

        let window = ledger.balances_between("shop-a", date(10), date(31)).await.unwrap();
        let revenue = window.iter().find(|b| b.account.id == "4000").unwrap();
        assert_eq!(revenue.balance, BigDecimal::from(250));

        let other_shop = ledger.balances_as_of("shop-b", date(31)).await.unwrap();
        assert!(other_shop.iter().all(|b| b.balance == BigDecimal::from(0)));
    }

    #[tokio::test]
    async fn test_entries_by_source_prefix() {
        let ledger = ledger_with_chart().await;
        ledger.post_built(sale("ORD-1", 1, 1000)).await.unwrap();
        ledger
            .post_manual_adjustment(
                "shop-a",
                "ORD-1-fix",
                date(2),
                "Manual fix",
                vec![
                    JournalLine::debit("6100".to_string(), BigDecimal::from(10), None),
                    JournalLine::credit("1120".to_string(), BigDecimal::from(10), None),
                ],
            )
            .await
            .unwrap();
        ledger.post_built(sale("ORD-10", 1, 1)).await.unwrap();

        let history = ledger.entries_by_source("ORD-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(ledger.has_terminal_entry("ORD-1").await.unwrap());
        assert!(!ledger.has_terminal_entry("ORD-2").await.unwrap());

        let report = ledger.validate_integrity("shop-a", date(31)).await.unwrap();
        assert!(report.is_valid);
    }
}
