//! Core types and data structures for the ledger

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account types following standard accounting principles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Assets - what the business owns (Cash, receivables, etc.)
    Asset,
    /// Liabilities - what the business owes
    Liability,
    /// Equity - owner's interest in the business
    Equity,
    /// Income/Revenue - money earned by the business
    Income,
    /// Expenses - costs incurred by the business
    Expense,
}

impl AccountType {
    /// Returns the normal balance type for this account type
    /// Assets and Expenses normally have debit balances
    /// Liabilities, Equity, and Income normally have credit balances
    pub fn normal_balance(&self) -> EntryType {
        match self {
            AccountType::Asset | AccountType::Expense => EntryType::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Income => EntryType::Credit,
        }
    }
}

/// Side of a journal line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn is_debit(&self) -> bool {
        matches!(self, EntryType::Debit)
    }

    /// The opposite side, used when reversing a posting
    pub fn opposite(&self) -> EntryType {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

/// What an account is used for when the reconciler builds postings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    /// Escrow receivable from the marketplace
    CashClearing,
    Revenue,
    CommissionFee,
    ServiceFee,
    TransactionFee,
    ShippingFee,
    /// Seller-funded vouchers and discounts
    SellerDiscount,
    /// Marketplace-funded rebates paid to the seller
    PlatformRebate,
    CostOfGoodsSold,
    /// Amount owed to or prepaid with the dropship supplier
    PurchaseClearing,
    /// Refund receivable from the supplier after a cancellation
    SupplierRefund,
}

impl AccountRole {
    pub const ALL: [AccountRole; 11] = [
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
        AccountRole::SupplierRefund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::CashClearing => "cash_clearing",
            AccountRole::Revenue => "revenue",
            AccountRole::CommissionFee => "commission_fee",
            AccountRole::ServiceFee => "service_fee",
            AccountRole::TransactionFee => "transaction_fee",
            AccountRole::ShippingFee => "shipping_fee",
            AccountRole::SellerDiscount => "seller_discount",
            AccountRole::PlatformRebate => "platform_rebate",
            AccountRole::CostOfGoodsSold => "cost_of_goods_sold",
            AccountRole::PurchaseClearing => "purchase_clearing",
            AccountRole::SupplierRefund => "supplier_refund",
        }
    }
}

/// Chart of accounts entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for the account
    pub id: String,
    /// Numeric chart code (e.g. "1120")
    pub code: String,
    /// Human-readable account name
    pub name: String,
    pub account_type: AccountType,
    /// Posting role, if the reconciler is allowed to resolve this account
    pub role: Option<AccountRole>,
}

impl Account {
    pub fn new(id: String, code: String, name: String, account_type: AccountType) -> Self {
        Self {
            id,
            code,
            name,
            account_type,
            role: None,
        }
    }

    pub fn with_role(mut self, role: AccountRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// The kind of business event that caused a journal entry.
///
/// The string form is the persisted discriminant and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    /// Settled marketplace sale (escrow released)
    #[serde(rename = "shopee_escrow")]
    Sale,
    /// Full or partial return reversal
    #[serde(rename = "return")]
    Return,
    /// Cancellation reversal
    #[serde(rename = "reconcile_cancel")]
    Cancellation,
    #[serde(rename = "manual_adjustment")]
    ManualAdjustment,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Sale => "shopee_escrow",
            SourceType::Return => "return",
            SourceType::Cancellation => "reconcile_cancel",
            SourceType::ManualAdjustment => "manual_adjustment",
        }
    }

    /// Terminal sources close a purchase for candidate listing
    pub fn is_terminal(&self) -> bool {
        match self {
            SourceType::Sale | SourceType::Cancellation => true,
            SourceType::Return | SourceType::ManualAdjustment => false,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shopee_escrow" => Ok(SourceType::Sale),
            "return" => Ok(SourceType::Return),
            "reconcile_cancel" => Ok(SourceType::Cancellation),
            "manual_adjustment" => Ok(SourceType::ManualAdjustment),
            other => Err(LedgerError::Validation(format!(
                "Unknown source type '{}'",
                other
            ))),
        }
    }
}

/// Idempotency key of a journal entry: at most one entry per pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_type: SourceType,
    pub source_id: String,
}

impl SourceRef {
    pub fn new(source_type: SourceType, source_id: impl Into<String>) -> Self {
        Self {
            source_type,
            source_id: source_id.into(),
        }
    }

    /// True when `source_id` is `root` itself or was spawned from it (`root-*`)
    pub fn descends_from(&self, root: &str) -> bool {
        self.source_id == root
            || self
                .source_id
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_type, self.source_id)
    }
}

/// Journal entry header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    /// Accounting date of the event
    pub entry_date: NaiveDate,
    pub description: String,
    pub source: SourceRef,
    /// Owning shop/store
    pub shop: String,
    pub created_at: NaiveDateTime,
}

impl JournalEntry {
    pub fn new(entry_date: NaiveDate, description: String, source: SourceRef, shop: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_date,
            description,
            source,
            shop,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Individual debit or credit line of a journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub account_id: String,
    pub entry_type: EntryType,
    /// Always strictly positive
    pub amount: BigDecimal,
    pub memo: Option<String>,
}

impl JournalLine {
    pub fn new(
        account_id: String,
        entry_type: EntryType,
        amount: BigDecimal,
        memo: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id: Uuid::nil(),
            account_id,
            entry_type,
            amount,
            memo,
        }
    }

    pub fn debit(account_id: String, amount: BigDecimal, memo: Option<String>) -> Self {
        Self::new(account_id, EntryType::Debit, amount, memo)
    }

    pub fn credit(account_id: String, amount: BigDecimal, memo: Option<String>) -> Self {
        Self::new(account_id, EntryType::Credit, amount, memo)
    }

    pub fn is_debit(&self) -> bool {
        self.entry_type.is_debit()
    }
}

/// Sum of debit lines
pub fn total_debits(lines: &[JournalLine]) -> BigDecimal {
    lines
        .iter()
        .filter(|l| l.entry_type == EntryType::Debit)
        .map(|l| &l.amount)
        .sum()
}

/// Sum of credit lines
pub fn total_credits(lines: &[JournalLine]) -> BigDecimal {
    lines
        .iter()
        .filter(|l| l.entry_type == EntryType::Credit)
        .map(|l| &l.amount)
        .sum()
}

/// Aggregated activity of one account over a date boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: Account,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    /// Signed by the account's normal side
    pub balance: BigDecimal,
}

impl AccountBalance {
    pub fn from_totals(account: Account, total_debits: BigDecimal, total_credits: BigDecimal) -> Self {
        let balance = match account.account_type.normal_balance() {
            EntryType::Debit => &total_debits - &total_credits,
            EntryType::Credit => &total_credits - &total_debits,
        };
        Self {
            account,
            total_debits,
            total_credits,
            balance,
        }
    }
}

/// Classified error type, persisted with failed reconciliations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    AlreadyProcessed,
    TransientDb,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not-found",
            ErrorCategory::AlreadyProcessed => "already-processed",
            ErrorCategory::TransientDb => "transient-db",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the ledger and reconciliation core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Unbalanced entry: debits = {debits}, credits = {credits}")]
    Unbalanced {
        debits: BigDecimal,
        credits: BigDecimal,
    },
    #[error("Journal entry already exists for source {source_type}:{source_id}")]
    DuplicateSource {
        source_type: SourceType,
        source_id: String,
    },
    #[error("Order already reconciled: {0}")]
    AlreadyReconciled(String),
    #[error("Order already processed: {0}")]
    AlreadyProcessed(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::Unbalanced { .. } | LedgerError::Validation(_) => ErrorCategory::Validation,
            LedgerError::NotFound(_) | LedgerError::AccountNotFound(_) => ErrorCategory::NotFound,
            LedgerError::DuplicateSource { .. }
            | LedgerError::AlreadyReconciled(_)
            | LedgerError::AlreadyProcessed(_) => ErrorCategory::AlreadyProcessed,
            LedgerError::Storage(_) => ErrorCategory::TransientDb,
            LedgerError::Cancelled | LedgerError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Idempotency conflicts; callers surface these as a conflict, never retry
    pub fn is_conflict(&self) -> bool {
        self.category() == ErrorCategory::AlreadyProcessed
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
