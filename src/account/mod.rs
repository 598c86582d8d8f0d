//! Account ledger
//!
//! Balances, deposits and withdrawals for trading accounts. Every account is
//! bound to exactly one market-data gateway.


use crate::error::{DeskError, Result};
use crate::types::{required_field, AccountType, ConnectionState};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Create-account request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub bound_market_gateway: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
}

/// Audit entry for a balance change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTransaction {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub bound_market_gateway: String,
    pub balance: Decimal,
    pub connection_state: ConnectionState,
    pub transactions: Vec<AccountTransaction>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_connected(&self) -> bool {
        self.connection_state.is_connected()
    }
}

#[derive(Debug, Default)]
pub struct AccountLedger {
    accounts: HashMap<String, Account>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account; the caller verifies the bound gateway exists
    pub fn create(&mut self, spec: AccountSpec) -> Result<Account> {
        let id = required_field("account id", &spec.id)?;
        let gateway = required_field("bound market gateway", &spec.bound_market_gateway)?;
        if self.accounts.contains_key(&id) {
            return Err(DeskError::Conflict(format!("Account {} already exists", id)));
        }

        let account = Account {
            id: id.clone(),
            account_type: spec.account_type,
            bound_market_gateway: gateway,
            balance: Decimal::ZERO,
            connection_state: ConnectionState::Disconnected,
            transactions: Vec::new(),
            created_at: Utc::now(),
        };
        info!(account = %id, gateway = %account.bound_market_gateway, "Account created");
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    pub fn deposit(&mut self, id: &str, amount: Decimal) -> Result<Account> {
        if amount <= Decimal::ZERO {
            return Err(DeskError::Validation(format!(
                "Deposit amount must be positive, got {}",
                amount
            )));
        }
        let account = self.get_mut(id)?;
        account.balance = account.balance.checked_add(amount).ok_or_else(|| {
            DeskError::Validation(format!("Deposit of {} overflows the balance of {}", amount, id))
        })?;
        account.transactions.push(AccountTransaction {
            kind: TransactionKind::Deposit,
            amount,
            balance_after: account.balance,
            timestamp: Utc::now(),
        });
        info!(account = %id, %amount, balance = %account.balance, "Deposit applied");
        Ok(account.clone())
    }

    pub fn withdraw(&mut self, id: &str, amount: Decimal) -> Result<Account> {
        if amount <= Decimal::ZERO {
            return Err(DeskError::Validation(format!(
                "Withdraw amount must be positive, got {}",
                amount
            )));
        }
        let account = self.get_mut(id)?;
        if amount > account.balance {
            return Err(DeskError::Validation(format!(
                "Insufficient balance: {} requested, {} available",
                amount, account.balance
            )));
        }
        account.balance -= amount;
        account.transactions.push(AccountTransaction {
            kind: TransactionKind::Withdraw,
            amount,
            balance_after: account.balance,
            timestamp: Utc::now(),
        });
        info!(account = %id, %amount, balance = %account.balance, "Withdrawal applied");
        Ok(account.clone())
    }

    pub fn set_connection(&mut self, id: &str, state: ConnectionState) -> Result<Account> {
        let account = self.get_mut(id)?;
        if account.connection_state != state {
            account.connection_state = state;
            info!(account = %id, state = ?state, "Account connection changed");
        }
        Ok(account.clone())
    }

    /// Accounts bound to the given market gateway
    pub fn bound_to_gateway(&self, gateway_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .accounts
            .values()
            .filter(|a| a.bound_market_gateway == gateway_id)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Remove an account; module binding checks are the caller's job
    pub fn remove(&mut self, id: &str) -> Result<Account> {
        self.accounts
            .remove(id)
            .ok_or_else(|| DeskError::NotFound(format!("Account {}", id)))
    }

    pub fn get(&self, id: &str) -> Result<&Account> {
        self.accounts
            .get(id)
            .ok_or_else(|| DeskError::NotFound(format!("Account {}", id)))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Account> {
        self.accounts
            .get_mut(id)
            .ok_or_else(|| DeskError::NotFound(format!("Account {}", id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn list(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        accounts
    }

    pub(crate) fn insert(&mut self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }
}
