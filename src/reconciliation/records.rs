//! Source records read from the import subsystem and the records the
//! reconciliation core owns (decisions, failures, batch runs).

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::types::ErrorCategory;

/// A dropshipping purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: Uuid,
    /// Marketplace order/invoice code, unique per purchase
    pub order_code: String,
    pub shop: String,
    pub channel: String,
    pub store: String,
    /// Last-known status string as imported
    pub status: String,
    /// Amount paid to the dropship supplier
    pub total_amount: BigDecimal,
    pub created_at: NaiveDateTime,
    pub shipped_at: Option<NaiveDateTime>,
}

impl PurchaseRecord {
    pub fn purchase_status(&self) -> PurchaseStatus {
        PurchaseStatus::parse(&self.status)
    }

    /// Rough heap footprint, used for memory back-pressure estimates
    pub fn approximate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.order_code.capacity()
            + self.shop.capacity()
            + self.channel.capacity()
            + self.store.capacity()
            + self.status.capacity()
    }
}

/// Normalised view of a purchase status string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl PurchaseStatus {
    const COMPLETED: [&'static str; 4] = ["completed", "order finished", "pesanan selesai", "selesai"];
    const CANCELLED: [&'static str; 4] = ["cancelled", "canceled", "dibatalkan", "batal"];

    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        if Self::COMPLETED.contains(&normalized.as_str()) {
            PurchaseStatus::Completed
        } else if Self::CANCELLED.contains(&normalized.as_str()) {
            PurchaseStatus::Cancelled
        } else {
            PurchaseStatus::InProgress
        }
    }
}

/// Marketplace-reported income and fees for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub order_code: String,
    pub shop: String,
    pub commission_fee: BigDecimal,
    pub service_fee: BigDecimal,
    pub transaction_fee: BigDecimal,
    /// Shipping cost borne by the seller
    pub shipping_fee: BigDecimal,
    /// Seller-funded voucher
    pub seller_discount: BigDecimal,
    /// Marketplace-funded rebate
    pub platform_rebate: BigDecimal,
    /// Escrow amount released to the seller
    pub net_receivable: BigDecimal,
    pub is_mismatch: bool,
    pub is_confirmed: bool,
    pub settled_at: NaiveDateTime,
}

impl SettlementRecord {
    /// Fee lines in posting order
    pub fn itemized_fees(&self) -> [(&'static str, &BigDecimal); 4] {
        [
            ("commission_fee", &self.commission_fee),
            ("service_fee", &self.service_fee),
            ("transaction_fee", &self.transaction_fee),
            ("shipping_fee", &self.shipping_fee),
        ]
    }

    /// Revenue implied by the settlement: net + fees + discount - rebate
    pub fn gross_revenue(&self) -> BigDecimal {
        let fees: BigDecimal = self.itemized_fees().iter().map(|(_, fee)| *fee).sum();
        &self.net_receivable + fees + &self.seller_discount - &self.platform_rebate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Return,
    BuyerRefund,
    Cancellation,
}

/// Post-settlement correction initiated by the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowAdjustment {
    pub id: Uuid,
    pub order_code: String,
    pub kind: AdjustmentKind,
    pub is_partial: bool,
    pub amount: BigDecimal,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

impl EscrowAdjustment {
    /// A full return, or a partial one carrying a positive amount
    pub fn is_effective_return(&self) -> bool {
        matches!(self.kind, AdjustmentKind::Return | AdjustmentKind::BuyerRefund)
            && (!self.is_partial || self.amount > BigDecimal::from(0))
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == AdjustmentKind::Cancellation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciledStatus {
    Matched,
    Unmatched,
}

/// Match outcome for one purchase; at most one active per purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledTransaction {
    pub id: Uuid,
    pub purchase_id: Option<Uuid>,
    pub settlement_id: Option<Uuid>,
    pub status: ReconciledStatus,
    pub decided_at: NaiveDateTime,
}

impl ReconciledTransaction {
    pub fn new(
        purchase_id: Option<Uuid>,
        settlement_id: Option<Uuid>,
        status: ReconciledStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            purchase_id,
            settlement_id,
            status,
            decided_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Append-only record of a failed reconciliation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedReconciliation {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub order_id: String,
    pub shop: String,
    pub error_type: ErrorCategory,
    pub message: String,
    pub context: HashMap<String, String>,
    pub batch_id: Uuid,
    pub retried: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Progress counters reported while a run is in flight
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Unit of streaming work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: Uuid,
    pub process_type: String,
    pub shop: String,
    pub total: usize,
    pub counters: RunCounters,
    pub status: BatchStatus,
    pub failure_categories: BTreeMap<ErrorCategory, usize>,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
}

impl BatchRun {
    pub fn new(process_type: impl Into<String>, shop: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            process_type: process_type.into(),
            shop: shop.into(),
            total: 0,
            counters: RunCounters::default(),
            status: BatchStatus::Pending,
            failure_categories: BTreeMap::new(),
            started_at: chrono::Utc::now().naive_utc(),
            finished_at: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purchase_status_normalization() {
        assert_eq!(PurchaseStatus::parse("  Pesanan Selesai "), PurchaseStatus::Completed);
        assert_eq!(PurchaseStatus::parse("ORDER FINISHED"), PurchaseStatus::Completed);
        assert_eq!(PurchaseStatus::parse("Dibatalkan"), PurchaseStatus::Cancelled);
        assert_eq!(PurchaseStatus::parse("shipped"), PurchaseStatus::InProgress);
    }

    #[test]
    fn test_partial_return_requires_positive_amount() {
        let mut adjustment = EscrowAdjustment {
            id: Uuid::new_v4(),
            order_code: "INV-1".to_string(),
            kind: AdjustmentKind::Return,
            is_partial: true,
            amount: BigDecimal::from(0),
            reason: None,
            created_at: chrono::Utc::now().naive_utc(),
        };
        assert!(!adjustment.is_effective_return());

        adjustment.amount = BigDecimal::from(5000);
        assert!(adjustment.is_effective_return());

        adjustment.is_partial = false;
        adjustment.amount = BigDecimal::from(0);
        assert!(adjustment.is_effective_return());
    }
}
