//! Usage balance, debited once per task by the number of OCR'd pages.

use crate::error::LedgerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Atomically check and subtract `amount` from `username`'s balance.
    ///
    /// `amount` must be positive. Fails with `UserNotFound` or
    /// `InsufficientBalance` without changing anything.
    async fn decrease_balance(&self, username: &str, amount: u64) -> Result<(), LedgerError>;

    async fn balance(&self, username: &str) -> Result<u64, LedgerError>;
}

/// In-memory ledger. The whole check-and-debit happens under one lock.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    balances: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for seeding accounts.
    pub fn with_user(self, username: impl Into<String>, balance: u64) -> Self {
        self.balances.lock().insert(username.into(), balance);
        self
    }

    /// Add `amount` to an account, creating it if needed.
    pub fn credit(&self, username: &str, amount: u64) {
        let mut balances = self.balances.lock();
        let slot = balances.entry(username.to_string()).or_insert(0);
        *slot = slot.saturating_add(amount);
    }
}

#[async_trait]
impl BalanceLedger for MemoryLedger {
    async fn decrease_balance(&self, username: &str, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut balances = self.balances.lock();
        let available = balances
            .get_mut(username)
            .ok_or_else(|| LedgerError::UserNotFound {
                username: username.to_string(),
            })?;
        if *available < amount {
            return Err(LedgerError::InsufficientBalance {
                username: username.to_string(),
                required: amount,
                available: *available,
            });
        }
        *available -= amount;
        Ok(())
    }

    async fn balance(&self, username: &str) -> Result<u64, LedgerError> {
        self.balances
            .lock()
            .get(username)
            .copied()
            .ok_or_else(|| LedgerError::UserNotFound {
                username: username.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debit_reduces_balance() {
        let ledger = MemoryLedger::new().with_user("alice", 10);
        ledger.decrease_balance("alice", 3).await.unwrap();
        assert_eq!(ledger.balance("alice").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_account_untouched() {
        let ledger = MemoryLedger::new().with_user("alice", 2);
        let err = ledger.decrease_balance("alice", 3).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { required: 3, available: 2, .. }
        ));
        assert_eq!(ledger.balance("alice").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn zero_amount_and_unknown_user() {
        let ledger = MemoryLedger::new().with_user("alice", 2);
        assert!(matches!(
            ledger.decrease_balance("alice", 0).await,
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger.decrease_balance("bob", 1).await,
            Err(LedgerError::UserNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_debits_never_overdraw() {
        let ledger = MemoryLedger::new().with_user("alice", 5);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let l = ledger.clone();
            handles.push(tokio::spawn(async move { l.decrease_balance("alice", 1).await.is_ok() }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(ledger.balance("alice").await.unwrap(), 0);
    }
}
