//! Chart of accounts management

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::*;
use crate::types::*;

/// Account manager for handling chart of accounts operations
pub struct AccountManager<S: LedgerStorage> {
    storage: Arc<S>,
}

impl<S: LedgerStorage> AccountManager<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create a new account
    pub async fn create_account(&self, account: Account) -> LedgerResult<Account> {
        validate_account(&account)?;

        if self.storage.get_account(&account.id).await?.is_some() {
            return Err(LedgerError::Validation(format!(
                "Account with ID '{}' already exists",
                account.id
            )));
        }

        if let Some(role) = account.role {
            let taken = self
                .storage
                .list_accounts()
                .await?
                .into_iter()
                .any(|existing| existing.role == Some(role));
            if taken {
                return Err(LedgerError::Validation(format!(
                    "Role '{}' is already assigned to another account",
                    role.as_str()
                )));
            }
        }

        self.storage.save_account(&account).await?;
        Ok(account)
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, account_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts().await
    }
}

fn validate_account(account: &Account) -> LedgerResult<()> {
    if account.id.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account ID cannot be empty".to_string(),
        ));
    }
    if account.name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }
    if !account
        .id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LedgerError::Validation(
            "Account ID can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }
    Ok(())
}

/// Chart of accounts backed by the ledger storage, resolving roles from the
/// `role` column of each account
pub struct StandardChartOfAccounts<S: LedgerStorage> {
    storage: Arc<S>,
}

impl<S: LedgerStorage> StandardChartOfAccounts<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: LedgerStorage> ChartOfAccounts for StandardChartOfAccounts<S> {
    async fn resolve_account(&self, role: AccountRole) -> LedgerResult<String> {
        self.storage
            .list_accounts()
            .await?
            .into_iter()
            .find(|account| account.role == Some(role))
            .map(|account| account.id)
            .ok_or_else(|| LedgerError::AccountNotFound(format!("no account for role '{}'", role.as_str())))
    }
}

/// Utility functions for working with accounts
pub mod utils {
    use super::*;

    /// Create the standard marketplace chart, one account per posting role
    pub async fn create_marketplace_chart<S: LedgerStorage>(
        account_manager: &AccountManager<S>,
    ) -> LedgerResult<HashMap<AccountRole, Account>> {
        let chart = [
            ("1120", "Marketplace Escrow Receivable", AccountType::Asset, AccountRole::CashClearing),
            ("1180", "Supplier Refund Receivable", AccountType::Asset, AccountRole::SupplierRefund),
            ("2110", "Dropship Purchase Clearing", AccountType::Liability, AccountRole::PurchaseClearing),
            ("4000", "Sales Revenue", AccountType::Income, AccountRole::Revenue),
            ("4200", "Marketplace Rebates", AccountType::Income, AccountRole::PlatformRebate),
            ("5000", "Cost of Goods Sold", AccountType::Expense, AccountRole::CostOfGoodsSold),
            ("6100", "Marketplace Commission", AccountType::Expense, AccountRole::CommissionFee),
            ("6110", "Marketplace Service Fee", AccountType::Expense, AccountRole::ServiceFee),
            ("6120", "Payment Transaction Fee", AccountType::Expense, AccountRole::TransactionFee),
            ("6130", "Seller Shipping Cost", AccountType::Expense, AccountRole::ShippingFee),
            ("6200", "Seller Vouchers", AccountType::Expense, AccountRole::SellerDiscount),
        ];

        let mut accounts = HashMap::new();
        for (code, name, account_type, role) in chart {
            let account = account_manager
                .create_account(
                    Account::new(code.to_string(), code.to_string(), name.to_string(), account_type)
                        .with_role(role),
                )
                .await?;
            accounts.insert(role, account);
        }

        Ok(accounts)
    }
}
