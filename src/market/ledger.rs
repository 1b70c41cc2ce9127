//! Per-player balance and per-item inventory bookkeeping.
//!
//! Adjustments are try-apply: a call that would drive balance or a single
//! inventory line below zero fails and leaves state untouched, rather than
//! clamping or partially applying. Zero-quantity items are purged from the
//! inventory map so it never carries dead entries.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};

const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub inventory: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct AccountState {
    pub player_id: String,
    balance: f64,
    inventory: HashMap<String, f64>,
}

impl AccountState {
    pub fn new(player_id: impl Into<String>, starting_balance: f64) -> Self {
        Self {
            player_id: player_id.into(),
            balance: starting_balance,
            inventory: HashMap::new(),
        }
    }

    pub fn get_balance(&self) -> f64 {
        self.balance
    }

    pub fn get_inventory(&self, item_id: &str) -> f64 {
        self.inventory.get(item_id).copied().unwrap_or(0.0)
    }

    pub fn has_balance(&self, amount: f64) -> bool {
        self.balance >= amount - QTY_EPSILON
    }

    pub fn has_inventory(&self, item_id: &str, qty: f64) -> bool {
        self.get_inventory(item_id) >= qty - QTY_EPSILON
    }

    /// Applies `delta` to the balance. Fails with `InsufficientFunds` (state
    /// unchanged) if the result would go negative.
    pub fn adjust_balance(&mut self, delta: f64) -> EngineResult<()> {
        let new_balance = self.balance + delta;
        if new_balance < -QTY_EPSILON {
            return Err(EngineError::InsufficientFunds {
                balance: self.balance,
                required: -delta,
            });
        }
        self.balance = new_balance.max(0.0);
        Ok(())
    }

    /// Applies `delta` to an item's inventory. Fails with
    /// `InsufficientInventory` (state unchanged) if the result would go
    /// negative. An item whose quantity reaches zero is purged from the map.
    pub fn adjust_inventory(&mut self, item_id: &str, delta: f64) -> EngineResult<()> {
        let current = self.get_inventory(item_id);
        let new_qty = current + delta;
        if new_qty < -QTY_EPSILON {
            return Err(EngineError::InsufficientInventory {
                item_id: item_id.to_string(),
                have: current,
                required: -delta,
            });
        }
        if new_qty <= QTY_EPSILON {
            self.inventory.remove(item_id);
        } else {
            self.inventory.insert(item_id.to_string(), new_qty);
        }
        Ok(())
    }

    /// A deep copy the caller can freely mutate without affecting this
    /// account.
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            balance: self.balance,
            inventory: self.inventory.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: AccountSnapshot) {
        self.balance = snapshot.balance;
        self.inventory = snapshot.inventory;
    }
}

/// A worker's registry of player account states. Each worker owns its own
/// ledger slice — nothing here is shared across workers, so a player's
/// balance in one item's worker is independent of their balance in another's.
pub struct AccountLedger {
    accounts: HashMap<String, AccountState>,
    starting_balance: f64,
}

impl AccountLedger {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            accounts: HashMap::new(),
            starting_balance,
        }
    }

    /// Returns the account for `player_id`, creating one with the ledger's
    /// starting balance on first reference.
    pub fn get_or_create(&mut self, player_id: &str) -> &mut AccountState {
        self.accounts
            .entry(player_id.to_string())
            .or_insert_with(|| AccountState::new(player_id, self.starting_balance))
    }

    pub fn get(&self, player_id: &str) -> Option<&AccountState> {
        self.accounts.get(player_id)
    }

    pub fn starting_balance(&self) -> f64 {
        self.starting_balance
    }

    pub fn get_mut(&mut self, player_id: &str) -> Option<&mut AccountState> {
        self.accounts.get_mut(player_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_balance_rejects_overdraft_and_leaves_state() {
        let mut acct = AccountState::new("p1", 100.0);
        assert!(acct.adjust_balance(-150.0).is_err());
        assert_eq!(acct.get_balance(), 100.0);
    }

    #[test]
    fn adjust_balance_applies_within_bounds() {
        let mut acct = AccountState::new("p1", 100.0);
        acct.adjust_balance(-40.0).unwrap();
        assert_eq!(acct.get_balance(), 60.0);
        acct.adjust_balance(10.0).unwrap();
        assert_eq!(acct.get_balance(), 70.0);
    }

    #[test]
    fn adjust_inventory_rejects_overdraft() {
        let mut acct = AccountState::new("p1", 100.0);
        acct.adjust_inventory("BTC", 5.0).unwrap();
        assert!(acct.adjust_inventory("BTC", -6.0).is_err());
        assert_eq!(acct.get_inventory("BTC"), 5.0);
    }

    #[test]
    fn inventory_is_purged_at_zero() {
        let mut acct = AccountState::new("p1", 100.0);
        acct.adjust_inventory("BTC", 5.0).unwrap();
        acct.adjust_inventory("BTC", -5.0).unwrap();
        assert_eq!(acct.get_inventory("BTC"), 0.0);
        assert!(!acct.snapshot().inventory.contains_key("BTC"));
    }

    #[test]
    fn snapshot_restore_round_trips_and_is_isolated() {
        let mut acct = AccountState::new("p1", 100.0);
        acct.adjust_inventory("BTC", 2.0).unwrap();
        let snap = acct.snapshot();

        acct.adjust_inventory("BTC", 3.0).unwrap();
        assert_eq!(acct.get_inventory("BTC"), 5.0);

        acct.restore(snap);
        assert_eq!(acct.get_inventory("BTC"), 2.0);
        assert_eq!(acct.get_balance(), 100.0);
    }

    #[test]
    fn ledger_creates_account_on_first_reference() {
        let mut ledger = AccountLedger::new(500.0);
        assert!(ledger.get("p1").is_none());
        let acct = ledger.get_or_create("p1");
        assert_eq!(acct.get_balance(), 500.0);
        assert!(ledger.get("p1").is_some());
    }
}
