// Copyright (c) 2025 Crest Developers

//! The transaction differ: a pure mapping from a transaction and its
//! context to the balance diffs it produces. No state is modified here;
//! entity lookups (aliases, leases, feature activation) go through fresh
//! reads so a transaction sees the effects of earlier transactions in the
//! same block.

use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::crypto::{Address, PublicKey};
use crate::proto::{
    AssetId, BurnTx, CreateAliasTx, ExchangeTx, GenesisTx, IssueTx, LeaseCancelTx, LeaseTx,
    MassTransferTx, PaymentTx, Recipient, ReissueTx, Transaction, TransferTx,
};
use crate::settings::BlockchainSettings;
use crate::state::aliases::Aliases;
use crate::state::diff::{BalanceDiff, TxDiff};
use crate::state::features::{Features, NG_FEATURE_ID};
use crate::state::keys::{byte_key, WavesBalanceKey};
use crate::state::leases::Leases;
use crate::state::StateError;

/// Price scaling constant for exchange transactions.
pub const PRICE_CONSTANT: u64 = 100_000_000;

/// Fraction of each fee the miner keeps in the current block once the NG
/// feature is active: 40%.
pub fn calculate_current_block_tx_fee(fee: u64, ng_activated: bool) -> u64 {
    if ng_activated {
        fee / 5 * 2
    } else {
        fee
    }
}

/// Context a diff is computed in.
#[derive(Debug, Clone)]
pub struct DifferInfo {
    /// Genesis replay: alias and lease lookups skip the overlay.
    pub initialisation: bool,
    /// Generator of the containing block, when it has one.
    pub miner_pk: Option<PublicKey>,
    pub block_time: u64,
}

fn as_i64(value: u64, what: &str) -> Result<i64, StateError> {
    i64::try_from(value)
        .map_err(|_| StateError::TxValidation(format!("{what} does not fit a signed amount")))
}

pub struct TransactionDiffer {
    settings: Arc<BlockchainSettings>,
    aliases: Aliases,
    leases: Leases,
    features: Features,
}

impl TransactionDiffer {
    pub fn new(
        settings: Arc<BlockchainSettings>,
        aliases: Aliases,
        leases: Leases,
        features: Features,
    ) -> Self {
        Self {
            settings,
            aliases,
            leases,
            features,
        }
    }

    pub fn create_diff(
        &self,
        transaction: &Transaction,
        info: &DifferInfo,
    ) -> Result<TxDiff, StateError> {
        match transaction {
            Transaction::Genesis(tx) => self.diff_genesis(tx),
            Transaction::Payment(tx) => self.diff_payment(tx, info),
            Transaction::Transfer { tx, .. } => self.diff_transfer(tx, info),
            Transaction::Issue { tx, .. } => self.diff_issue(tx, transaction, info),
            Transaction::Reissue { tx, .. } => self.diff_reissue(tx, info),
            Transaction::Burn { tx, .. } => self.diff_burn(tx, info),
            Transaction::Exchange(tx) => self.diff_exchange(tx, info),
            Transaction::Lease { tx, .. } => self.diff_lease(tx, info),
            Transaction::LeaseCancel { tx, .. } => self.diff_lease_cancel(tx, info),
            Transaction::CreateAlias { tx, .. } => self.diff_create_alias(tx, info),
            Transaction::MassTransfer(tx) => self.diff_mass_transfer(tx, info),
        }
    }

    fn address(&self, pk: &PublicKey) -> Address {
        Address::from_public_key(self.settings.address_scheme, pk)
    }

    fn update_min_intermediate(&self, info: &DifferInfo) -> bool {
        info.block_time >= self.settings.check_temp_negative_after_time
    }

    fn calculate_tx_fee(&self, fee: u64) -> Result<u64, StateError> {
        let ng_activated = self.features.is_activated(NG_FEATURE_ID)?;
        Ok(calculate_current_block_tx_fee(fee, ng_activated))
    }

    /// Credit the miner with the current-block share of the fee.
    fn miner_payout(
        &self,
        diff: &mut TxDiff,
        fee: u64,
        info: &DifferInfo,
        fee_asset: &AssetId,
    ) -> Result<(), StateError> {
        let Some(miner_pk) = &info.miner_pk else {
            return Ok(());
        };
        let miner_key = byte_key(&self.address(miner_pk), fee_asset);
        let payout = as_i64(self.calculate_tx_fee(fee)?, "miner fee")?;
        diff.append_balance_diff(miner_key, BalanceDiff::new(payout, 0, 0, false))
    }

    fn recipient_to_address(
        &self,
        recipient: &Recipient,
        info: &DifferInfo,
    ) -> Result<Address, StateError> {
        match recipient {
            Recipient::Address(addr) => Ok(*addr),
            Recipient::Alias(alias) => {
                let filter = !info.initialisation;
                if info.initialisation {
                    self.aliases.addr_by_alias(alias, filter)
                } else {
                    self.aliases.newest_addr_by_alias(alias, filter)
                }
                .map_err(|e| StateError::TxValidation(format!("invalid alias {alias:?}: {e}")))
            }
        }
    }

    fn diff_genesis(&self, tx: &GenesisTx) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let key = WavesBalanceKey {
            address: tx.recipient,
        }
        .bytes();
        let amount = as_i64(tx.amount, "genesis amount")?;
        diff.append_balance_diff(key, BalanceDiff::new(amount, 0, 0, false))?;
        Ok(diff)
    }

    fn diff_payment(&self, tx: &PaymentTx, info: &DifferInfo) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let update_min = self.update_min_intermediate(info);
        let allow_leased =
            info.block_time <= self.settings.allow_leased_balance_transfer_until;

        let sender_key = WavesBalanceKey {
            address: self.address(&tx.sender_pk),
        }
        .bytes();
        let amount = as_i64(tx.amount, "payment amount")?;
        let fee = as_i64(tx.fee, "payment fee")?;
        let sender_diff = amount
            .checked_add(fee)
            .and_then(i64::checked_neg)
            .ok_or_else(|| StateError::TxValidation("payment amount overflow".to_string()))?;
        diff.append_balance_diff(
            sender_key,
            BalanceDiff::new(sender_diff, 0, 0, update_min)
                .with_allow_leased_transfer(allow_leased),
        )?;

        let receiver_key = WavesBalanceKey {
            address: tx.recipient,
        }
        .bytes();
        diff.append_balance_diff(receiver_key, BalanceDiff::new(amount, 0, 0, update_min))?;

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_transfer(&self, tx: &TransferTx, info: &DifferInfo) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let update_min = self.update_min_intermediate(info);
        let sender_addr = self.address(&tx.sender_pk);

        let sender_fee_key = byte_key(&sender_addr, &tx.fee_asset);
        let fee = as_i64(tx.fee, "transfer fee")?;
        diff.append_balance_diff(sender_fee_key, BalanceDiff::new(-fee, 0, 0, update_min))?;

        let sender_amount_key = byte_key(&sender_addr, &tx.amount_asset);
        let amount = as_i64(tx.amount, "transfer amount")?;
        diff.append_balance_diff(sender_amount_key, BalanceDiff::new(-amount, 0, 0, update_min))?;

        let recipient_addr = self.recipient_to_address(&tx.recipient, info)?;
        let receiver_key = byte_key(&recipient_addr, &tx.amount_asset);
        diff.append_balance_diff(receiver_key, BalanceDiff::new(amount, 0, 0, update_min))?;

        self.miner_payout(&mut diff, tx.fee, info, &tx.fee_asset)?;
        Ok(diff)
    }

    fn diff_issue(
        &self,
        tx: &IssueTx,
        transaction: &Transaction,
        info: &DifferInfo,
    ) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let asset_id = transaction.id();
        let sender_addr = self.address(&tx.sender_pk);

        let sender_fee_key = WavesBalanceKey {
            address: sender_addr,
        }
        .bytes();
        let fee = as_i64(tx.fee, "issue fee")?;
        diff.append_balance_diff(sender_fee_key, BalanceDiff::new(-fee, 0, 0, false))?;

        let sender_asset_key = byte_key(&sender_addr, &Some(asset_id));
        let quantity = as_i64(tx.quantity, "issue quantity")?;
        diff.append_balance_diff(sender_asset_key, BalanceDiff::new(quantity, 0, 0, false))?;

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_reissue(&self, tx: &ReissueTx, info: &DifferInfo) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let sender_addr = self.address(&tx.sender_pk);

        let sender_fee_key = WavesBalanceKey {
            address: sender_addr,
        }
        .bytes();
        let fee = as_i64(tx.fee, "reissue fee")?;
        diff.append_balance_diff(sender_fee_key, BalanceDiff::new(-fee, 0, 0, false))?;

        let sender_asset_key = byte_key(&sender_addr, &Some(tx.asset_id));
        let quantity = as_i64(tx.quantity, "reissue quantity")?;
        diff.append_balance_diff(sender_asset_key, BalanceDiff::new(quantity, 0, 0, false))?;

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_burn(&self, tx: &BurnTx, info: &DifferInfo) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let sender_addr = self.address(&tx.sender_pk);

        let sender_fee_key = WavesBalanceKey {
            address: sender_addr,
        }
        .bytes();
        let fee = as_i64(tx.fee, "burn fee")?;
        diff.append_balance_diff(sender_fee_key, BalanceDiff::new(-fee, 0, 0, false))?;

        let sender_asset_key = byte_key(&sender_addr, &Some(tx.asset_id));
        let amount = as_i64(tx.amount, "burn amount")?;
        diff.append_balance_diff(sender_asset_key, BalanceDiff::new(-amount, 0, 0, false))?;

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_exchange(&self, tx: &ExchangeTx, info: &DifferInfo) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();

        // price_amount = floor(amount * price / PRICE_CONSTANT); a result
        // outside i64 fails the transaction.
        let val = BigInt::from(tx.amount) * BigInt::from(tx.price) / BigInt::from(PRICE_CONSTANT);
        let price_diff = val.to_i64().ok_or_else(|| {
            StateError::TxValidation("price * amount exceeds max signed amount".to_string())
        })?;
        let amount_diff = as_i64(tx.amount, "exchange amount")?;

        let pair = &tx.sell_order;
        let seller_addr = self.address(&tx.sell_order.sender_pk);
        let seller_price_key = byte_key(&seller_addr, &pair.price_asset);
        diff.append_balance_diff(seller_price_key, BalanceDiff::new(price_diff, 0, 0, false))?;
        let seller_amount_key = byte_key(&seller_addr, &pair.amount_asset);
        diff.append_balance_diff(seller_amount_key, BalanceDiff::new(-amount_diff, 0, 0, false))?;
        let seller_fee_key = WavesBalanceKey {
            address: seller_addr,
        }
        .bytes();
        let sell_fee = as_i64(tx.sell_matcher_fee, "sell matcher fee")?;
        diff.append_balance_diff(seller_fee_key, BalanceDiff::new(-sell_fee, 0, 0, false))?;

        let buyer_addr = self.address(&tx.buy_order.sender_pk);
        let buyer_price_key = byte_key(&buyer_addr, &pair.price_asset);
        diff.append_balance_diff(buyer_price_key, BalanceDiff::new(-price_diff, 0, 0, false))?;
        let buyer_amount_key = byte_key(&buyer_addr, &pair.amount_asset);
        diff.append_balance_diff(buyer_amount_key, BalanceDiff::new(amount_diff, 0, 0, false))?;
        let buyer_fee_key = WavesBalanceKey {
            address: buyer_addr,
        }
        .bytes();
        let buy_fee = as_i64(tx.buy_matcher_fee, "buy matcher fee")?;
        diff.append_balance_diff(buyer_fee_key, BalanceDiff::new(-buy_fee, 0, 0, false))?;

        // The matcher collects both order fees and pays the tx fee.
        let matcher_addr = self.address(&tx.buy_order.matcher_pk);
        let matcher_key = WavesBalanceKey {
            address: matcher_addr,
        }
        .bytes();
        let matcher_fee = buy_fee
            .checked_add(sell_fee)
            .ok_or_else(|| StateError::TxValidation("matcher fee overflow".to_string()))?;
        let tx_fee = as_i64(tx.fee, "exchange fee")?;
        let matcher_diff = matcher_fee
            .checked_sub(tx_fee)
            .ok_or_else(|| StateError::TxValidation("matcher fee overflow".to_string()))?;
        diff.append_balance_diff(matcher_key, BalanceDiff::new(matcher_diff, 0, 0, false))?;

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_lease(&self, tx: &LeaseTx, info: &DifferInfo) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let sender_key = WavesBalanceKey {
            address: self.address(&tx.sender_pk),
        }
        .bytes();
        let amount = as_i64(tx.amount, "lease amount")?;
        diff.append_balance_diff(sender_key.clone(), BalanceDiff::new(0, 0, amount, false))?;
        let fee = as_i64(tx.fee, "lease fee")?;
        diff.append_balance_diff(sender_key, BalanceDiff::new(-fee, 0, 0, false))?;

        let recipient_addr = self.recipient_to_address(&tx.recipient, info)?;
        let receiver_key = WavesBalanceKey {
            address: recipient_addr,
        }
        .bytes();
        diff.append_balance_diff(receiver_key, BalanceDiff::new(0, amount, 0, false))?;

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_lease_cancel(
        &self,
        tx: &LeaseCancelTx,
        info: &DifferInfo,
    ) -> Result<TxDiff, StateError> {
        let lease = self
            .leases
            .newest_leasing_info(tx.lease_id, !info.initialisation)
            .map_err(|e| {
                StateError::TxValidation(format!(
                    "no leasing info found for lease {}: {e}",
                    tx.lease_id
                ))
            })?;
        if !lease.is_active {
            return Err(StateError::TxValidation(format!(
                "lease {} is already cancelled",
                tx.lease_id
            )));
        }

        let mut diff = TxDiff::new();
        let amount = as_i64(lease.amount, "lease amount")?;
        let sender_key = WavesBalanceKey {
            address: self.address(&tx.sender_pk),
        }
        .bytes();
        diff.append_balance_diff(sender_key.clone(), BalanceDiff::new(0, 0, -amount, false))?;
        let fee = as_i64(tx.fee, "lease cancel fee")?;
        diff.append_balance_diff(sender_key, BalanceDiff::new(-fee, 0, 0, false))?;

        let receiver_key = WavesBalanceKey {
            address: lease.recipient,
        }
        .bytes();
        diff.append_balance_diff(receiver_key, BalanceDiff::new(0, -amount, 0, false))?;

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_create_alias(
        &self,
        tx: &CreateAliasTx,
        info: &DifferInfo,
    ) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let sender_fee_key = WavesBalanceKey {
            address: self.address(&tx.sender_pk),
        }
        .bytes();
        let fee = as_i64(tx.fee, "alias fee")?;
        diff.append_balance_diff(sender_fee_key, BalanceDiff::new(-fee, 0, 0, false))?;
        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }

    fn diff_mass_transfer(
        &self,
        tx: &MassTransferTx,
        info: &DifferInfo,
    ) -> Result<TxDiff, StateError> {
        let mut diff = TxDiff::new();
        let update_min = self.update_min_intermediate(info);
        let sender_addr = self.address(&tx.sender_pk);

        let sender_fee_key = WavesBalanceKey {
            address: sender_addr,
        }
        .bytes();
        let fee = as_i64(tx.fee, "mass transfer fee")?;
        diff.append_balance_diff(sender_fee_key, BalanceDiff::new(-fee, 0, 0, update_min))?;

        let sender_amount_key = byte_key(&sender_addr, &tx.asset);
        for entry in &tx.transfers {
            let amount = as_i64(entry.amount, "mass transfer amount")?;
            diff.append_balance_diff(
                sender_amount_key.clone(),
                BalanceDiff::new(-amount, 0, 0, update_min),
            )?;
            let recipient_addr = self.recipient_to_address(&entry.recipient, info)?;
            let recipient_key = byte_key(&recipient_addr, &tx.asset);
            diff.append_balance_diff(recipient_key, BalanceDiff::new(amount, 0, 0, update_min))?;
        }

        self.miner_payout(&mut diff, tx.fee, info, &None)?;
        Ok(diff)
    }
}
