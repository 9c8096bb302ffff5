// Copyright (c) 2025 Crest Developers

//! Atomic balance changes produced by transactions, and the rules for
//! composing them inside a transaction and inside a block.
//!
//! The min-intermediate machinery tracks the lowest balance a sequence of
//! diffs passes through: transaction types that may legitimately go
//! negative mid-transaction carry `update_min_intermediate`, and the block
//! validation rejects any address whose running balance dips below zero.

use std::collections::{btree_map, BTreeMap};

use crate::state::StateError;

/// A signed per-(address, asset) delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceDiff {
    pub allow_leased_transfer: bool,
    pub update_min_intermediate: bool,
    /// Min intermediate balance change.
    pub min_balance: i64,
    /// Balance change.
    pub balance: i64,
    /// Lease-in change.
    pub lease_in: i64,
    /// Lease-out change.
    pub lease_out: i64,
}

/// The materialised per-(address, asset) balance state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceProfile {
    pub balance: u64,
    pub lease_in: i64,
    pub lease_out: i64,
}

impl BalanceProfile {
    /// Generating balance: own balance plus incoming leases, minus what is
    /// leased away. Clamped at zero.
    pub fn effective_balance(&self) -> u64 {
        let effective = self.balance as i64 + self.lease_in - self.lease_out;
        effective.max(0) as u64
    }
}

fn checked_add(a: i64, b: i64, what: &str) -> Result<i64, StateError> {
    a.checked_add(b)
        .ok_or_else(|| StateError::TxValidation(format!("overflow adding {what}")))
}

impl BalanceDiff {
    pub fn new(
        balance: i64,
        lease_in: i64,
        lease_out: i64,
        update_min_intermediate: bool,
    ) -> Self {
        Self {
            allow_leased_transfer: false,
            update_min_intermediate,
            min_balance: if update_min_intermediate { balance } else { 0 },
            balance,
            lease_in,
            lease_out,
        }
    }

    pub fn with_allow_leased_transfer(mut self, allow: bool) -> Self {
        self.allow_leased_transfer = allow;
        self
    }

    /// Apply this diff to a profile, producing a new profile. Rejects
    /// negative results, intermediate underflow, and spending balance that
    /// is leased away.
    pub fn apply_to(&self, profile: &BalanceProfile) -> Result<BalanceProfile, StateError> {
        let min_balance = checked_add(self.min_balance, profile.balance as i64, "min balance")?;
        if min_balance < 0 {
            return Err(StateError::TxValidation(format!(
                "negative intermediate balance: balance {}, diff min {}",
                profile.balance, self.min_balance
            )));
        }
        let new_balance = checked_add(self.balance, profile.balance as i64, "balance")?;
        if new_balance < 0 {
            return Err(StateError::TxValidation(
                "negative result balance".to_string(),
            ));
        }
        let new_lease_in = checked_add(self.lease_in, profile.lease_in, "lease in")?;
        let new_lease_out = checked_add(self.lease_out, profile.lease_out, "lease out")?;
        if new_balance - new_lease_out < 0 && !self.allow_leased_transfer {
            return Err(StateError::TxValidation(
                "leased balance is greater than own".to_string(),
            ));
        }
        Ok(BalanceProfile {
            balance: new_balance as u64,
            lease_in: new_lease_in,
            lease_out: new_lease_out,
        })
    }

    /// Like [`apply_to`](Self::apply_to) without the leasing fields, for
    /// issued-asset balances.
    pub fn apply_to_asset_balance(&self, balance: u64) -> Result<u64, StateError> {
        let min_balance = checked_add(self.min_balance, balance as i64, "min balance")?;
        if min_balance < 0 {
            return Err(StateError::TxValidation(
                "negative intermediate asset balance".to_string(),
            ));
        }
        let new_balance = checked_add(self.balance, balance as i64, "balance")?;
        if new_balance < 0 {
            return Err(StateError::TxValidation(
                "negative result balance".to_string(),
            ));
        }
        Ok(new_balance as u64)
    }

    /// Sum the plain fields of two diffs.
    pub fn add_common(&mut self, prev: &BalanceDiff) -> Result<(), StateError> {
        self.balance = checked_add(self.balance, prev.balance, "balance diffs")?;
        self.lease_in = checked_add(self.lease_in, prev.lease_in, "lease-in diffs")?;
        self.lease_out = checked_add(self.lease_out, prev.lease_out, "lease-out diffs")?;
        Ok(())
    }

    /// Compose this diff onto the accumulated diff of the same transaction.
    pub fn add_inside_tx(&mut self, prev: &BalanceDiff) -> Result<(), StateError> {
        if self.update_min_intermediate {
            let new_min = checked_add(self.balance, prev.min_balance, "min balance diff")?;
            self.min_balance = prev.min_balance.min(new_min);
        }
        self.add_common(prev)
    }

    /// Compose a transaction's diff onto the accumulated diff of the block.
    pub fn add_inside_block(&mut self, prev: &BalanceDiff) -> Result<(), StateError> {
        let new_min = checked_add(self.min_balance, prev.balance, "min balance diff")?;
        self.min_balance = prev.min_balance.min(new_min);
        self.add_common(prev)
    }
}

/// Diffs of one transaction, keyed by the byte-key of the (address, asset)
/// pair. BTreeMap keeps iteration deterministic.
#[derive(Debug, Default)]
pub struct TxDiff {
    map: BTreeMap<Vec<u8>, BalanceDiff>,
}

impl TxDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a new diff for `key`, composing with any previous diff of the
    /// same transaction.
    pub fn append_balance_diff(
        &mut self,
        key: Vec<u8>,
        mut diff: BalanceDiff,
    ) -> Result<(), StateError> {
        match self.map.entry(key) {
            btree_map::Entry::Occupied(mut entry) => {
                diff.add_inside_tx(entry.get())?;
                entry.insert(diff);
            }
            btree_map::Entry::Vacant(entry) => {
                entry.insert(diff);
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &BalanceDiff)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl IntoIterator for TxDiff {
    type Item = (Vec<u8>, BalanceDiff);
    type IntoIter = btree_map::IntoIter<Vec<u8>, BalanceDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

/// The accumulated diff of a whole block, composed transaction by
/// transaction.
#[derive(Debug, Default)]
pub struct BlockDiff {
    map: BTreeMap<Vec<u8>, BalanceDiff>,
}

impl BlockDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_tx_diff(&mut self, tx_diff: TxDiff) -> Result<(), StateError> {
        for (key, mut diff) in tx_diff {
            match self.map.entry(key) {
                btree_map::Entry::Occupied(mut entry) => {
                    diff.add_inside_block(entry.get())?;
                    entry.insert(diff);
                }
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(diff);
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &BalanceDiff)> {
        self.map.iter()
    }
}
