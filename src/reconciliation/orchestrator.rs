//! Reconciliation orchestrator: turns classified purchases into ledger
//! postings (settled sale, return reversal, cancellation reversal).

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::ledger::core::Ledger;
use crate::ledger::transaction::{patterns, reverse_lines, reverse_lines_proportional, JournalBuilder};
use crate::reconciliation::matcher::{Candidate, MatchEngine, MatchStatus};
use crate::reconciliation::records::*;
use crate::traits::*;
use crate::types::*;

/// What a reconciliation call did
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A journal entry was posted
    Posted(Uuid),
    /// Nothing was posted; the purchase stays open in this state
    Deferred(MatchStatus),
}

/// Roles a settled sale posts to
const SALE_ROLES: [AccountRole; 10] = [
    AccountRole::CashClearing,
    AccountRole::Revenue,
    AccountRole::CommissionFee,
    AccountRole::ServiceFee,
    AccountRole::TransactionFee,
    AccountRole::ShippingFee,
    AccountRole::SellerDiscount,
    AccountRole::PlatformRebate,
    AccountRole::CostOfGoodsSold,
    AccountRole::PurchaseClearing,
];

pub struct Reconciler<S: LedgerStorage> {
    engine: MatchEngine<S>,
    chart: Arc<dyn ChartOfAccounts>,
    decisions: Arc<dyn ReconciliationStore>,
}

impl<S: LedgerStorage> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            chart: self.chart.clone(),
            decisions: self.decisions.clone(),
        }
    }
}

impl<S: LedgerStorage> Reconciler<S> {
    pub fn new(
        engine: MatchEngine<S>,
        chart: Arc<dyn ChartOfAccounts>,
        decisions: Arc<dyn ReconciliationStore>,
    ) -> Self {
        Self {
            engine,
            chart,
            decisions,
        }
    }

    pub fn engine(&self) -> &MatchEngine<S> {
        &self.engine
    }

    fn ledger(&self) -> &Ledger<S> {
        self.engine.ledger()
    }

    /// Reconcile one purchase against its settlement.
    ///
    /// A Confirmed classification posts the escrow sale. A Returned order
    /// whose sale never posted gets the sale and then its return reversal.
    /// Fails with `AlreadyReconciled` when the order already has a terminal
    /// posting, checked before any line is built and again atomically by the
    /// ledger on insert.
    pub async fn reconcile(&self, purchase_id: Uuid, order_id: &str, shop: &str) -> LedgerResult<ReconcileOutcome> {
        if self.ledger().has_terminal_entry(order_id).await? {
            return Err(LedgerError::AlreadyReconciled(order_id.to_string()));
        }

        let candidate = self.engine.classify_order(order_id).await?;
        let purchase = &candidate.purchase;
        if purchase.id != purchase_id {
            return Err(LedgerError::Validation(format!(
                "Order {} belongs to purchase {}, not {}",
                order_id, purchase.id, purchase_id
            )));
        }
        if purchase.shop != shop {
            return Err(LedgerError::Validation(format!(
                "Order {} belongs to shop '{}', not '{}'",
                order_id, purchase.shop, shop
            )));
        }

        let classification = &candidate.classification;
        let Some(settlement) = candidate.postable_settlement() else {
            self.decisions
                .record_decision(&ReconciledTransaction::new(
                    Some(purchase.id),
                    classification.settlement.as_ref().map(|s| s.id),
                    ReconciledStatus::Unmatched,
                ))
                .await?;
            tracing::debug!(order = %order_id, status = %classification.status, "Reconciliation deferred");
            return Ok(ReconcileOutcome::Deferred(classification.status));
        };

        let accounts = self.sale_accounts().await?;
        let builder = patterns::escrow_settlement(purchase, settlement, &accounts, settlement.settled_at.date())?;
        let entry_id = self
            .ledger()
            .post_built(builder)
            .await
            .map_err(|e| match e {
                LedgerError::DuplicateSource { source_id, .. } => LedgerError::AlreadyReconciled(source_id),
                other => other,
            })?;

        self.decisions
            .record_decision(&ReconciledTransaction::new(
                Some(purchase.id),
                Some(settlement.id),
                ReconciledStatus::Matched,
            ))
            .await?;

        tracing::info!(
            order = %order_id,
            shop = %shop,
            entry_id = %entry_id,
            net = %settlement.net_receivable,
            "Reconciled escrow settlement"
        );

        if let (MatchStatus::Returned, Some(adjustment)) = (classification.status, &classification.adjustment) {
            self.process_returned_order(order_id, adjustment.is_partial, &adjustment.amount)
                .await?;
        }
        Ok(ReconcileOutcome::Posted(entry_id))
    }

    /// Post a return reversal of the order's sale entry.
    ///
    /// A full return reverses every line. A partial return reverses `amount`
    /// of the sale revenue, scaling the escrow lines with it; the supplier
    /// cost stays posted. Partial amounts above the revenue are rejected.
    pub async fn process_returned_order(
        &self,
        invoice: &str,
        is_partial: bool,
        amount: &BigDecimal,
    ) -> LedgerResult<Uuid> {
        if is_partial && *amount <= BigDecimal::from(0) {
            return Err(LedgerError::Validation(format!(
                "Partial return for {} needs a positive amount, got {}",
                invoice, amount
            )));
        }
        if self.has_return_journal(invoice).await? {
            return Err(LedgerError::AlreadyProcessed(invoice.to_string()));
        }

        let sale = self
            .ledger()
            .find_by_source(&SourceRef::new(SourceType::Sale, invoice))
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("sale posting for order {}", invoice)))?;
        let original = self.ledger().lines_for(sale.id).await?;

        let (description, lines) = if is_partial {
            let revenue = self.chart.resolve_account(AccountRole::Revenue).await?;
            let cost_accounts = [
                self.chart.resolve_account(AccountRole::CostOfGoodsSold).await?,
                self.chart.resolve_account(AccountRole::PurchaseClearing).await?,
            ];
            let escrow: Vec<JournalLine> = original
                .into_iter()
                .filter(|line| !cost_accounts.contains(&line.account_id))
                .collect();
            (
                format!("Partial return of order {} ({})", invoice, amount),
                reverse_lines_proportional(
                    &escrow,
                    amount,
                    &revenue,
                    self.ledger().minor_unit_scale(),
                    "Partial return",
                )?,
            )
        } else {
            (format!("Return of order {}", invoice), reverse_lines(&original, "Return"))
        };

        let builder = JournalBuilder::new(
            today(),
            description,
            SourceRef::new(SourceType::Return, invoice),
            sale.shop.clone(),
        )
        .lines(lines);
        let entry_id = self.ledger().post_built(builder).await.map_err(|e| match e {
            LedgerError::DuplicateSource { source_id, .. } => LedgerError::AlreadyProcessed(source_id),
            other => other,
        })?;

        tracing::info!(
            order = %invoice,
            entry_id = %entry_id,
            partial = is_partial,
            "Posted return reversal"
        );
        Ok(entry_id)
    }

    /// Post a cancellation for the order.
    ///
    /// A settled order has whatever remains of its sale (after any return)
    /// reversed. An order that never settled writes the supplier cost off to
    /// the supplier refund receivable.
    pub async fn cancel_purchase(&self, order_code: &str) -> LedgerResult<Uuid> {
        let cancellation = SourceRef::new(SourceType::Cancellation, order_code);
        if self.ledger().find_by_source(&cancellation).await?.is_some() {
            return Err(LedgerError::AlreadyProcessed(order_code.to_string()));
        }

        let sale = self
            .ledger()
            .find_by_source(&SourceRef::new(SourceType::Sale, order_code))
            .await?;

        let builder = match sale {
            Some(sale) => {
                let mut posted = self.ledger().lines_for(sale.id).await?;
                if let Some(ret) = self
                    .ledger()
                    .find_by_source(&SourceRef::new(SourceType::Return, order_code))
                    .await?
                {
                    posted.extend(self.ledger().lines_for(ret.id).await?);
                }
                let remaining = net_lines(&posted);
                if remaining.is_empty() {
                    return Err(LedgerError::AlreadyProcessed(format!(
                        "{} is already fully reversed",
                        order_code
                    )));
                }
                JournalBuilder::new(
                    today(),
                    format!("Cancellation of order {}", order_code),
                    cancellation,
                    sale.shop,
                )
                .lines(reverse_lines(&remaining, "Cancelled"))
            }
            None => {
                let purchase = self
                    .engine
                    .purchases()
                    .get_purchase_by_invoice(order_code)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(format!("purchase {}", order_code)))?;
                patterns::cancellation_write_off(
                    &purchase,
                    self.chart.resolve_account(AccountRole::SupplierRefund).await?,
                    self.chart.resolve_account(AccountRole::PurchaseClearing).await?,
                    today(),
                )?
            }
        };

        let entry_id = self.ledger().post_built(builder).await.map_err(|e| match e {
            LedgerError::DuplicateSource { source_id, .. } => LedgerError::AlreadyProcessed(source_id),
            other => other,
        })?;

        tracing::info!(order = %order_code, entry_id = %entry_id, "Posted cancellation");
        Ok(entry_id)
    }

    /// Act on a listed candidate according to its classification
    pub async fn reconcile_candidate(&self, candidate: &Candidate) -> LedgerResult<ReconcileOutcome> {
        let purchase = &candidate.purchase;
        let code = purchase.order_code.as_str();
        match candidate.status() {
            MatchStatus::Confirmed => self.reconcile(purchase.id, code, &purchase.shop).await,
            MatchStatus::Cancelled => self.cancel_purchase(code).await.map(ReconcileOutcome::Posted),
            MatchStatus::Returned => {
                let Some(adjustment) = &candidate.classification.adjustment else {
                    return Ok(ReconcileOutcome::Deferred(MatchStatus::Returned));
                };
                let sale_posted = self
                    .ledger()
                    .find_by_source(&SourceRef::new(SourceType::Sale, code))
                    .await?
                    .is_some();
                if !sale_posted {
                    // The sale has to post before the return can reverse it
                    return match candidate.postable_settlement() {
                        Some(_) => self.reconcile(purchase.id, code, &purchase.shop).await,
                        None => Ok(ReconcileOutcome::Deferred(MatchStatus::Returned)),
                    };
                }
                if self.has_return_journal(code).await? {
                    Ok(ReconcileOutcome::Deferred(MatchStatus::Returned))
                } else {
                    self.process_returned_order(code, adjustment.is_partial, &adjustment.amount)
                        .await
                        .map(ReconcileOutcome::Posted)
                }
            }
            status @ (MatchStatus::Unmatched | MatchStatus::CandidateMatched) => {
                self.decisions
                    .record_decision(&ReconciledTransaction::new(
                        Some(purchase.id),
                        candidate.classification.settlement.as_ref().map(|s| s.id),
                        ReconciledStatus::Unmatched,
                    ))
                    .await?;
                Ok(ReconcileOutcome::Deferred(status))
            }
        }
    }

    pub async fn has_return_journal(&self, invoice: &str) -> LedgerResult<bool> {
        Ok(self
            .ledger()
            .find_by_source(&SourceRef::new(SourceType::Return, invoice))
            .await?
            .is_some())
    }

    /// Every entry spawned from the order, oldest first
    pub async fn history(&self, order_code: &str) -> LedgerResult<Vec<JournalEntry>> {
        self.ledger().entries_by_source(order_code).await
    }

    async fn sale_accounts(&self) -> LedgerResult<patterns::SaleAccounts> {
        let mut by_role = HashMap::with_capacity(SALE_ROLES.len());
        for role in SALE_ROLES {
            by_role.insert(role, self.chart.resolve_account(role).await?);
        }
        Ok(patterns::SaleAccounts { by_role })
    }
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Collapse lines to one net line per account, dropping accounts that net to zero
fn net_lines(lines: &[JournalLine]) -> Vec<JournalLine> {
    let mut net: BTreeMap<&str, BigDecimal> = BTreeMap::new();
    for line in lines {
        let slot = net.entry(line.account_id.as_str()).or_insert_with(|| BigDecimal::from(0));
        match line.entry_type {
            EntryType::Debit => *slot += &line.amount,
            EntryType::Credit => *slot -= &line.amount,
        }
    }
    net.into_iter()
        .filter_map(|(account, amount)| {
            let zero = BigDecimal::from(0);
            if amount > zero {
                Some(JournalLine::debit(account.to_string(), amount, None))
            } else if amount < zero {
                Some(JournalLine::credit(account.to_string(), -amount, None))
            } else {
                None
            }
        })
        .collect()
}
