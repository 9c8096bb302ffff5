// Copyright (c) 2025 Crest Developers

//! Applying validated diffs to the materialised ledger, and the entity
//! side-effects of transactions (asset registration, lease lifecycle,
//! alias registration). Balance invariants are enforced at the moment a
//! diff meets a profile.

use std::sync::Arc;

use crate::crypto::Address;
use crate::proto::{Recipient, Transaction};
use crate::settings::BlockchainSettings;
use crate::state::aliases::Aliases;
use crate::state::assets::{AssetConstInfo, Assets};
use crate::state::balances::Balances;
use crate::state::diff::BalanceDiff;
use crate::state::keys::{
    AssetBalanceKey, WavesBalanceKey, ASSET_BALANCE_KEY_PREFIX, WAVES_BALANCE_KEY_PREFIX,
};
use crate::state::leases::{LeaseInfo, Leases};
use crate::state::state_db::BlockNum;
use crate::state::{Height, StateError};

/// Applies composed balance diffs to balance profiles.
#[derive(Clone)]
pub struct DiffApplier {
    balances: Balances,
}

impl DiffApplier {
    pub fn new(balances: Balances) -> Self {
        Self { balances }
    }

    /// Apply one (address, asset) diff. Reads go through the overlay so the
    /// profile reflects every earlier change of the same block.
    pub fn apply(
        &self,
        key: &[u8],
        diff: &BalanceDiff,
        block_num: BlockNum,
    ) -> Result<(), StateError> {
        match key.first() {
            Some(&WAVES_BALANCE_KEY_PREFIX) => {
                let parsed = WavesBalanceKey::unmarshal(key)?;
                let profile = self.balances.newest_waves_profile(&parsed.address, true)?;
                let updated = diff.apply_to(&profile)?;
                self.balances
                    .set_waves_profile(&parsed.address, &updated, block_num)
            }
            Some(&ASSET_BALANCE_KEY_PREFIX) => {
                let parsed = AssetBalanceKey::unmarshal(key)?;
                let balance =
                    self.balances
                        .newest_asset_balance(&parsed.address, &parsed.asset, true)?;
                let updated = diff.apply_to_asset_balance(balance)?;
                self.balances
                    .set_asset_balance(&parsed.address, &parsed.asset, updated, block_num)
            }
            _ => Err(StateError::Other(format!(
                "diff key with unexpected prefix {:?}",
                key.first()
            ))),
        }
    }
}

/// A reissue or burn of an asset that was never issued rejects the
/// transaction rather than surfacing a bare lookup miss.
fn reject_missing_asset(e: StateError) -> StateError {
    if e.is_not_found() {
        StateError::TxValidation("unknown asset".to_string())
    } else {
        e
    }
}

/// Performs the non-balance effects of transactions.
#[derive(Clone)]
pub struct TransactionPerformer {
    settings: Arc<BlockchainSettings>,
    assets: Assets,
    leases: Leases,
    aliases: Aliases,
}

impl TransactionPerformer {
    pub fn new(
        settings: Arc<BlockchainSettings>,
        assets: Assets,
        leases: Leases,
        aliases: Aliases,
    ) -> Self {
        Self {
            settings,
            assets,
            leases,
            aliases,
        }
    }

    fn resolve_recipient(
        &self,
        recipient: &Recipient,
        initialisation: bool,
    ) -> Result<Address, StateError> {
        match recipient {
            Recipient::Address(addr) => Ok(*addr),
            Recipient::Alias(alias) => if initialisation {
                self.aliases.addr_by_alias(alias, false)
            } else {
                self.aliases.newest_addr_by_alias(alias, true)
            }
            .map_err(|e| StateError::TxValidation(format!("invalid alias {alias:?}: {e}"))),
        }
    }

    pub fn perform(
        &self,
        transaction: &Transaction,
        block_num: BlockNum,
        height: Height,
        initialisation: bool,
    ) -> Result<(), StateError> {
        let filter = !initialisation;
        match transaction {
            Transaction::Issue { tx, .. } => {
                let constants = AssetConstInfo {
                    issuer: tx.sender_pk,
                    name: tx.name.clone(),
                    description: tx.description.clone(),
                    decimals: tx.decimals,
                };
                self.assets.issue_asset(
                    transaction.id(),
                    &constants,
                    tx.reissuable,
                    tx.quantity,
                    block_num,
                )
            }
            Transaction::Reissue { tx, .. } => self
                .assets
                .reissue_asset(tx.asset_id, tx.quantity, tx.reissuable, block_num, filter)
                .map_err(reject_missing_asset),
            Transaction::Burn { tx, .. } => self
                .assets
                .burn_asset(tx.asset_id, tx.amount, block_num, filter)
                .map_err(reject_missing_asset),
            Transaction::Lease { tx, .. } => {
                let sender =
                    Address::from_public_key(self.settings.address_scheme, &tx.sender_pk);
                let recipient = self.resolve_recipient(&tx.recipient, initialisation)?;
                let info = LeaseInfo {
                    is_active: true,
                    sender,
                    recipient,
                    amount: tx.amount,
                    height,
                };
                self.leases.add_lease(transaction.id(), &info, block_num)
            }
            Transaction::LeaseCancel { tx, .. } => {
                self.leases.cancel_lease(tx.lease_id, block_num, filter)
            }
            Transaction::CreateAlias { tx, .. } => {
                let sender =
                    Address::from_public_key(self.settings.address_scheme, &tx.sender_pk);
                self.aliases.create_alias(&tx.alias, &sender, block_num)
            }
            _ => Ok(()),
        }
    }
}
