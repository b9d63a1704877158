//! Match engine: classifies purchases against settlements and escrow
//! adjustments, and lists the candidates still open for reconciliation.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::ledger::core::Ledger;
use crate::reconciliation::filter::FilterExpr;
use crate::reconciliation::records::*;
use crate::traits::*;
use crate::types::*;

/// Per-purchase match state, in increasing precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Unmatched,
    CandidateMatched,
    Confirmed,
    Returned,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Unmatched => "unmatched",
            MatchStatus::CandidateMatched => "candidate_matched",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Returned => "returned",
            MatchStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one purchase
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: MatchStatus,
    pub settlement: Option<SettlementRecord>,
    /// The adjustment that drove a Returned or Cancelled status
    pub adjustment: Option<EscrowAdjustment>,
}

/// Pure classification of a purchase against its correlated records.
///
/// Missing settlements and empty adjustment lists are valid inputs. When
/// several adjustments qualify, the most recent one wins, with the id as a
/// tie-break, so the outcome does not depend on the order of `adjustments`.
pub fn classify(
    purchase: &PurchaseRecord,
    settlement: Option<&SettlementRecord>,
    adjustments: &[EscrowAdjustment],
) -> Classification {
    let latest = |wanted: fn(&EscrowAdjustment) -> bool| {
        adjustments
            .iter()
            .filter(|adj| wanted(adj))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned()
    };
    let purchase_status = purchase.purchase_status();

    let cancellation = latest(EscrowAdjustment::is_cancellation);
    let (status, adjustment) = if cancellation.is_some() || purchase_status == PurchaseStatus::Cancelled {
        (MatchStatus::Cancelled, cancellation)
    } else if let Some(ret) = latest(EscrowAdjustment::is_effective_return) {
        (MatchStatus::Returned, Some(ret))
    } else {
        match settlement {
            Some(s) if purchase_status == PurchaseStatus::Completed && !s.is_mismatch => {
                (MatchStatus::Confirmed, None)
            }
            Some(_) => (MatchStatus::CandidateMatched, None),
            None => (MatchStatus::Unmatched, None),
        }
    };

    Classification {
        status,
        settlement: settlement.cloned(),
        adjustment,
    }
}

/// Keyset position in the (created_at DESC, order_code DESC) ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCursor {
    created_at: NaiveDateTime,
    order_code: String,
}

impl CandidateCursor {
    fn of(purchase: &PurchaseRecord) -> Self {
        Self {
            created_at: purchase.created_at,
            order_code: purchase.order_code.clone(),
        }
    }

    /// True when `purchase` sorts strictly after this cursor
    fn precedes(&self, purchase: &PurchaseRecord) -> bool {
        newest_first(&self.created_at, &self.order_code, &purchase.created_at, &purchase.order_code)
            == Ordering::Less
    }
}

fn newest_first(a_at: &NaiveDateTime, a_code: &str, b_at: &NaiveDateTime, b_code: &str) -> Ordering {
    b_at.cmp(a_at).then_with(|| b_code.cmp(a_code))
}

#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub filter: Option<FilterExpr>,
    pub status: Option<MatchStatus>,
    pub limit: usize,
    pub after: Option<CandidateCursor>,
}

impl CandidateQuery {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from,
            to,
            filter: None,
            status: None,
            limit: Self::DEFAULT_LIMIT,
            after: None,
        }
    }

    /// Every purchase of the shop regardless of date
    pub fn all_time() -> Self {
        Self::new(NaiveDate::MIN, NaiveDate::MAX)
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_status(mut self, status: MatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, cursor: Option<CandidateCursor>) -> Self {
        self.after = cursor;
        self
    }
}

/// A purchase still open for reconciliation, with its classification
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub purchase: PurchaseRecord,
    pub classification: Classification,
}

impl Candidate {
    pub fn status(&self) -> MatchStatus {
        self.classification.status
    }

    /// Settlement a sale can be posted from. A returned order still needs its
    /// sale posted before the return can reverse it.
    pub fn postable_settlement(&self) -> Option<&SettlementRecord> {
        match self.status() {
            MatchStatus::Confirmed | MatchStatus::Returned => {
                self.classification.settlement.as_ref().filter(|settlement| {
                    !settlement.is_mismatch && self.purchase.purchase_status() == PurchaseStatus::Completed
                })
            }
            _ => None,
        }
    }

    pub fn approximate_size(&self) -> usize {
        let settlement = self
            .classification
            .settlement
            .as_ref()
            .map(|s| std::mem::size_of_val(s) + s.order_code.capacity() + s.shop.capacity())
            .unwrap_or(0);
        let adjustment = self
            .classification
            .adjustment
            .as_ref()
            .map(|a| std::mem::size_of_val(a) + a.order_code.capacity())
            .unwrap_or(0);
        self.purchase.approximate_size() + settlement + adjustment
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePage {
    pub items: Vec<Candidate>,
    /// Present when the page is full; pass to the next query's `after`
    pub next_cursor: Option<CandidateCursor>,
}

/// Match engine over the import-side sources and the ledger
pub struct MatchEngine<S: LedgerStorage> {
    purchases: Arc<dyn PurchaseSource>,
    settlements: Arc<dyn SettlementSource>,
    ledger: Ledger<S>,
}

impl<S: LedgerStorage> Clone for MatchEngine<S> {
    fn clone(&self) -> Self {
        Self {
            purchases: self.purchases.clone(),
            settlements: self.settlements.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: LedgerStorage> MatchEngine<S> {
    pub fn new(
        purchases: Arc<dyn PurchaseSource>,
        settlements: Arc<dyn SettlementSource>,
        ledger: Ledger<S>,
    ) -> Self {
        Self {
            purchases,
            settlements,
            ledger,
        }
    }

    pub fn purchases(&self) -> &Arc<dyn PurchaseSource> {
        &self.purchases
    }

    pub fn settlements(&self) -> &Arc<dyn SettlementSource> {
        &self.settlements
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    /// Classify a purchase against the current settlement and escrow tables
    pub async fn classify_purchase(&self, purchase: &PurchaseRecord) -> LedgerResult<Classification> {
        let settlement = self.settlements.get_settlement_by_order(&purchase.order_code).await?;
        let adjustments = self.settlements.get_escrow_adjustments(&purchase.order_code).await?;
        let classification = classify(purchase, settlement.as_ref(), &adjustments);
        tracing::debug!(
            order = %purchase.order_code,
            status = %classification.status,
            "Classified purchase"
        );
        Ok(classification)
    }

    /// Look up a purchase by invoice code and classify it
    pub async fn classify_order(&self, order_code: &str) -> LedgerResult<Candidate> {
        let purchase = self
            .purchases
            .get_purchase_by_invoice(order_code)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("purchase {}", order_code)))?;
        let classification = self.classify_purchase(&purchase).await?;
        Ok(Candidate {
            purchase,
            classification,
        })
    }

    /// Purchases of `shop` created within the query window that carry no
    /// sale or cancellation posting, newest first.
    pub async fn list_candidates(&self, shop: &str, query: &CandidateQuery) -> LedgerResult<CandidatePage> {
        if query.from > query.to {
            return Err(LedgerError::Validation(format!(
                "Candidate window starts after it ends: {} > {}",
                query.from, query.to
            )));
        }
        if query.limit == 0 {
            return Err(LedgerError::Validation("Candidate page limit must be positive".to_string()));
        }

        let mut purchases: Vec<PurchaseRecord> = self
            .purchases
            .list_purchases_by_shop_and_date(shop, query.from, query.to)
            .await?
            .into_iter()
            .filter(|p| query.after.as_ref().is_none_or(|cursor| cursor.precedes(p)))
            .filter(|p| query.filter.as_ref().is_none_or(|filter| filter.matches(p)))
            .collect();
        purchases.sort_by(|a, b| newest_first(&a.created_at, &a.order_code, &b.created_at, &b.order_code));

        let mut items = Vec::with_capacity(query.limit.min(purchases.len()));
        for purchase in purchases {
            if items.len() == query.limit {
                break;
            }
            if self.ledger.has_terminal_entry(&purchase.order_code).await? {
                continue;
            }
            let classification = self.classify_purchase(&purchase).await?;
            if query.status.is_some_and(|wanted| wanted != classification.status) {
                continue;
            }
            items.push(Candidate {
                purchase,
                classification,
            });
        }

        let next_cursor = if items.len() == query.limit {
            items.last().map(|c| CandidateCursor::of(&c.purchase))
        } else {
            None
        };
        Ok(CandidatePage { items, next_cursor })
    }
}
