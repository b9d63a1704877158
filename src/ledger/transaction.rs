//! Journal construction and common posting patterns

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::reconciliation::records::{PurchaseRecord, SettlementRecord};
use crate::types::*;
use crate::utils::validation::{normalize_lines, round_to_minor};

/// Builder for a journal entry and its lines
#[derive(Debug)]
pub struct JournalBuilder {
    entry: JournalEntry,
    lines: Vec<JournalLine>,
}

impl JournalBuilder {
    pub fn new(date: NaiveDate, description: String, source: SourceRef, shop: String) -> Self {
        Self {
            entry: JournalEntry::new(date, description, source, shop),
            lines: Vec::new(),
        }
    }

    /// Add a debit line
    pub fn debit(mut self, account_id: String, amount: BigDecimal, memo: Option<String>) -> Self {
        self.lines.push(JournalLine::debit(account_id, amount, memo));
        self
    }

    /// Add a credit line
    pub fn credit(mut self, account_id: String, amount: BigDecimal, memo: Option<String>) -> Self {
        self.lines.push(JournalLine::credit(account_id, amount, memo));
        self
    }

    /// Add a debit line only when the amount is non-zero
    pub fn debit_nonzero(self, account_id: String, amount: &BigDecimal, memo: &str) -> Self {
        if *amount == BigDecimal::from(0) {
            self
        } else {
            self.debit(account_id, amount.clone(), Some(memo.to_string()))
        }
    }

    /// Add a credit line only when the amount is non-zero
    pub fn credit_nonzero(self, account_id: String, amount: &BigDecimal, memo: &str) -> Self {
        if *amount == BigDecimal::from(0) {
            self
        } else {
            self.credit(account_id, amount.clone(), Some(memo.to_string()))
        }
    }

    pub fn line(mut self, line: JournalLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn lines(mut self, lines: impl IntoIterator<Item = JournalLine>) -> Self {
        self.lines.extend(lines);
        self
    }

    /// Build the entry, checking the lines round and balance at `scale`
    pub fn build(self, scale: i64) -> LedgerResult<(JournalEntry, Vec<JournalLine>)> {
        let lines = normalize_lines(self.lines, scale)?;
        Ok((self.entry, lines))
    }

    /// Build without validation; the ledger validates on post
    pub fn into_parts(self) -> (JournalEntry, Vec<JournalLine>) {
        (self.entry, self.lines)
    }
}

/// Fresh lines on the opposite side of `lines`, for a full reversal
pub fn reverse_lines(lines: &[JournalLine], memo: &str) -> Vec<JournalLine> {
    lines
        .iter()
        .map(|line| {
            JournalLine::new(
                line.account_id.clone(),
                line.entry_type.opposite(),
                line.amount.clone(),
                Some(memo.to_string()),
            )
        })
        .collect()
}

/// Reverse `amount` of what `lines` post to `base_account`, scaling every
/// other line by the same ratio.
///
/// `amount` is rounded to `scale` and may not exceed the base. Base lines are
/// reversed at exactly that amount; the rounding residual of each side goes
/// to its largest other line so the result balances. Lines rounding to zero
/// are dropped.
pub fn reverse_lines_proportional(
    lines: &[JournalLine],
    amount: &BigDecimal,
    base_account: &str,
    scale: i64,
    memo: &str,
) -> LedgerResult<Vec<JournalLine>> {
    let zero = BigDecimal::from(0);
    let base: BigDecimal = lines
        .iter()
        .filter(|l| l.account_id == base_account)
        .map(|l| &l.amount)
        .sum();
    if base <= zero {
        return Err(LedgerError::Validation(format!(
            "Original posting has nothing on account {} to reverse",
            base_account
        )));
    }
    let target = round_to_minor(amount, scale);
    if target > base {
        return Err(LedgerError::Validation(format!(
            "Return amount {} exceeds {} posted to account {}",
            target, base, base_account
        )));
    }

    let ratio = &target / &base;
    let original_total = total_debits(lines);
    let side_target = if original_total == base {
        target.clone()
    } else {
        round_to_minor(&(&original_total * &ratio), scale)
    };
    let mut reversed: Vec<JournalLine> = reverse_lines(lines, memo)
        .into_iter()
        .map(|mut line| {
            line.amount = round_to_minor(&(&line.amount * &ratio), scale);
            line
        })
        .collect();

    let base_total: BigDecimal = reversed
        .iter()
        .filter(|l| l.account_id == base_account)
        .map(|l| &l.amount)
        .sum();
    settle_residual(&mut reversed, &target - base_total, |l| l.account_id == base_account);

    for side in [EntryType::Debit, EntryType::Credit] {
        let side_total: BigDecimal = reversed
            .iter()
            .filter(|l| l.entry_type == side)
            .map(|l| &l.amount)
            .sum();
        let residual = &side_target - side_total;
        let others = reversed
            .iter()
            .any(|l| l.entry_type == side && l.account_id != base_account);
        settle_residual(&mut reversed, residual, |l| {
            l.entry_type == side && (!others || l.account_id != base_account)
        });
    }

    reversed.retain(|line| line.amount > zero);
    Ok(reversed)
}

/// Add `residual` to the largest line accepted by `eligible`
fn settle_residual(lines: &mut [JournalLine], residual: BigDecimal, eligible: impl Fn(&JournalLine) -> bool) {
    if residual == BigDecimal::from(0) {
        return;
    }
    if let Some(line) = lines
        .iter_mut()
        .filter(|l| eligible(l))
        .max_by(|a, b| a.amount.cmp(&b.amount))
    {
        line.amount += residual;
    }
}

/// Common posting patterns
pub mod patterns {
    use super::*;

    /// Accounts used by a settled sale, resolved from the chart of accounts
    #[derive(Debug, Clone)]
    pub struct SaleAccounts {
        pub by_role: HashMap<AccountRole, String>,
    }

    impl SaleAccounts {
        pub fn get(&self, role: AccountRole) -> LedgerResult<String> {
            self.by_role
                .get(&role)
                .cloned()
                .ok_or_else(|| LedgerError::AccountNotFound(role.as_str().to_string()))
        }
    }

    /// Settled escrow for a confirmed purchase.
    ///
    /// Dr cash clearing (net), Dr each fee and the seller discount,
    /// Cr platform rebate, Cr revenue for the gross, plus the supplier cost
    /// as Dr COGS / Cr purchase clearing.
    pub fn escrow_settlement(
        purchase: &PurchaseRecord,
        settlement: &SettlementRecord,
        accounts: &SaleAccounts,
        entry_date: NaiveDate,
    ) -> LedgerResult<JournalBuilder> {
        if settlement.net_receivable <= BigDecimal::from(0) {
            return Err(LedgerError::Validation(format!(
                "Settlement for {} has non-positive net receivable {}",
                settlement.order_code, settlement.net_receivable
            )));
        }
        let negative_fee = settlement
            .itemized_fees()
            .into_iter()
            .chain([
                ("seller_discount", &settlement.seller_discount),
                ("platform_rebate", &settlement.platform_rebate),
            ])
            .find(|(_, amount)| **amount < BigDecimal::from(0));
        if let Some((name, amount)) = negative_fee {
            return Err(LedgerError::Validation(format!(
                "Settlement for {} has negative {}: {}",
                settlement.order_code, name, amount
            )));
        }
        let revenue = settlement.gross_revenue();
        if revenue <= BigDecimal::from(0) {
            return Err(LedgerError::Validation(format!(
                "Settlement for {} implies non-positive revenue {}",
                settlement.order_code, revenue
            )));
        }
        if purchase.total_amount < BigDecimal::from(0) {
            return Err(LedgerError::Validation(format!(
                "Purchase {} has negative amount {}",
                purchase.order_code, purchase.total_amount
            )));
        }

        let builder = JournalBuilder::new(
            entry_date,
            format!("Escrow settlement for order {}", settlement.order_code),
            SourceRef::new(SourceType::Sale, settlement.order_code.clone()),
            purchase.shop.clone(),
        )
        .debit(
            accounts.get(AccountRole::CashClearing)?,
            settlement.net_receivable.clone(),
            Some("Escrow released".to_string()),
        )
        .debit_nonzero(
            accounts.get(AccountRole::CommissionFee)?,
            &settlement.commission_fee,
            "Commission fee",
        )
        .debit_nonzero(
            accounts.get(AccountRole::ServiceFee)?,
            &settlement.service_fee,
            "Service fee",
        )
        .debit_nonzero(
            accounts.get(AccountRole::TransactionFee)?,
            &settlement.transaction_fee,
            "Transaction fee",
        )
        .debit_nonzero(
            accounts.get(AccountRole::ShippingFee)?,
            &settlement.shipping_fee,
            "Seller shipping fee",
        )
        .debit_nonzero(
            accounts.get(AccountRole::SellerDiscount)?,
            &settlement.seller_discount,
            "Seller voucher",
        )
        .credit_nonzero(
            accounts.get(AccountRole::PlatformRebate)?,
            &settlement.platform_rebate,
            "Platform rebate",
        )
        .credit(
            accounts.get(AccountRole::Revenue)?,
            revenue,
            Some("Sales revenue".to_string()),
        )
        .debit_nonzero(
            accounts.get(AccountRole::CostOfGoodsSold)?,
            &purchase.total_amount,
            "Dropship cost",
        )
        .credit_nonzero(
            accounts.get(AccountRole::PurchaseClearing)?,
            &purchase.total_amount,
            "Dropship cost",
        );

        Ok(builder)
    }

    /// Write-off of a cancelled purchase that never settled:
    /// Dr supplier refund / Cr purchase clearing
    pub fn cancellation_write_off(
        purchase: &PurchaseRecord,
        supplier_refund_account: String,
        purchase_clearing_account: String,
        entry_date: NaiveDate,
    ) -> LedgerResult<JournalBuilder> {
        if purchase.total_amount <= BigDecimal::from(0) {
            return Err(LedgerError::Validation(format!(
                "Cancelled purchase {} has no amount to write off",
                purchase.order_code
            )));
        }
        Ok(JournalBuilder::new(
            entry_date,
            format!("Cancellation of order {}", purchase.order_code),
            SourceRef::new(SourceType::Cancellation, purchase.order_code.clone()),
            purchase.shop.clone(),
        )
        .debit(
            supplier_refund_account,
            purchase.total_amount.clone(),
            Some("Supplier refund due".to_string()),
        )
        .credit(
            purchase_clearing_account,
            purchase.total_amount.clone(),
            Some("Purchase cancelled".to_string()),
        ))
    }
}
