//! In-memory purchase and settlement sources

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::reconciliation::records::*;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct SourceTables {
    purchases: HashMap<String, PurchaseRecord>,
    settlements: HashMap<String, SettlementRecord>,
    adjustments: HashMap<String, Vec<EscrowAdjustment>>,
}

/// Import-side tables held in memory, keyed by order code
#[derive(Debug, Clone, Default)]
pub struct MemorySources {
    tables: Arc<RwLock<SourceTables>>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable database
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert_purchase(&self, purchase: PurchaseRecord) -> LedgerResult<()> {
        self.write()?
            .purchases
            .insert(purchase.order_code.clone(), purchase);
        Ok(())
    }

    pub fn insert_settlement(&self, settlement: SettlementRecord) -> LedgerResult<()> {
        self.write()?
            .settlements
            .insert(settlement.order_code.clone(), settlement);
        Ok(())
    }

    pub fn insert_adjustment(&self, adjustment: EscrowAdjustment) -> LedgerResult<()> {
        self.write()?
            .adjustments
            .entry(adjustment.order_code.clone())
            .or_default()
            .push(adjustment);
        Ok(())
    }

    /// Update a purchase status, as the import subsystem would after a re-sync
    pub fn set_purchase_status(&self, order_code: &str, status: &str) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let purchase = tables
            .purchases
            .get_mut(order_code)
            .ok_or_else(|| LedgerError::NotFound(format!("purchase {}", order_code)))?;
        purchase.status = status.to_string();
        Ok(())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, SourceTables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("source tables unavailable".to_string()));
        }
        self.tables
            .read()
            .map_err(|_| LedgerError::Storage("source lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, SourceTables>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::Storage("source lock poisoned".to_string()))
    }
}

#[async_trait]
impl PurchaseSource for MemorySources {
    async fn list_purchases_by_shop_and_date(
        &self,
        shop: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<PurchaseRecord>> {
        let tables = self.read()?;
        Ok(tables
            .purchases
            .values()
            .filter(|p| {
                let day = p.created_at.date();
                p.shop == shop && day >= from && day <= to
            })
            .cloned()
            .collect())
    }

    async fn get_purchase_by_invoice(&self, code: &str) -> LedgerResult<Option<PurchaseRecord>> {
        Ok(self.read()?.purchases.get(code).cloned())
    }
}

#[async_trait]
impl SettlementSource for MemorySources {
    async fn get_settlement_by_order(&self, code: &str) -> LedgerResult<Option<SettlementRecord>> {
        Ok(self.read()?.settlements.get(code).cloned())
    }

    async fn get_escrow_adjustments(&self, code: &str) -> LedgerResult<Vec<EscrowAdjustment>> {
        Ok(self
            .read()?
            .adjustments
            .get(code)
            .cloned()
            .unwrap_or_default())
    }
}
