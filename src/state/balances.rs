// Copyright (c) 2025 Crest Developers

//! Waves and asset balances, stored as history records per (address, asset)
//! key. The waves record carries the full leasing profile; asset records
//! carry only the balance.

use crate::crypto::{Address, Digest};
use crate::state::diff::BalanceProfile;
use crate::state::history::Entity;
use crate::state::keys::{AssetBalanceKey, WavesBalanceKey};
use crate::state::state_db::BlockNum;
use crate::state::{Height, SharedHistory, StateError};

pub const WAVES_BALANCE_RECORD_SIZE: usize = 8 + 8 + 8 + 4;
pub const ASSET_BALANCE_RECORD_SIZE: usize = 8 + 4;

fn encode_waves_record(profile: &BalanceProfile, block_num: BlockNum) -> Vec<u8> {
    let mut buf = Vec::with_capacity(WAVES_BALANCE_RECORD_SIZE);
    buf.extend_from_slice(&profile.balance.to_be_bytes());
    buf.extend_from_slice(&profile.lease_in.to_be_bytes());
    buf.extend_from_slice(&profile.lease_out.to_be_bytes());
    buf.extend_from_slice(&block_num.to_be_bytes());
    buf
}

fn decode_waves_record(record: &[u8]) -> Result<BalanceProfile, StateError> {
    if record.len() != WAVES_BALANCE_RECORD_SIZE {
        return Err(StateError::Deserialization(
            "bad waves balance record size".to_string(),
        ));
    }
    Ok(BalanceProfile {
        balance: u64::from_be_bytes(record[0..8].try_into().unwrap()),
        lease_in: i64::from_be_bytes(record[8..16].try_into().unwrap()),
        lease_out: i64::from_be_bytes(record[16..24].try_into().unwrap()),
    })
}

fn encode_asset_record(balance: u64, block_num: BlockNum) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ASSET_BALANCE_RECORD_SIZE);
    buf.extend_from_slice(&balance.to_be_bytes());
    buf.extend_from_slice(&block_num.to_be_bytes());
    buf
}

fn decode_asset_record(record: &[u8]) -> Result<u64, StateError> {
    if record.len() != ASSET_BALANCE_RECORD_SIZE {
        return Err(StateError::Deserialization(
            "bad asset balance record size".to_string(),
        ));
    }
    Ok(u64::from_be_bytes(record[0..8].try_into().unwrap()))
}

#[derive(Clone)]
pub struct Balances {
    hs: SharedHistory,
}

impl Balances {
    pub fn new(hs: SharedHistory) -> Self {
        Self { hs }
    }

    /// Profile including uncommitted changes of the block being applied.
    /// An address never seen before has the zero profile.
    pub fn newest_waves_profile(
        &self,
        address: &Address,
        filter: bool,
    ) -> Result<BalanceProfile, StateError> {
        let key = WavesBalanceKey { address: *address }.bytes();
        let hs = self.hs.read().expect("history lock");
        match hs.get_fresh(Entity::WavesBalance, &key, filter) {
            Ok(record) => decode_waves_record(&record),
            Err(e) if e.is_not_found() => Ok(BalanceProfile::default()),
            Err(e) => Err(e),
        }
    }

    /// Persisted profile; the overlay is not consulted.
    pub fn waves_profile(
        &self,
        address: &Address,
        filter: bool,
    ) -> Result<BalanceProfile, StateError> {
        let key = WavesBalanceKey { address: *address }.bytes();
        let hs = self.hs.read().expect("history lock");
        match hs.get(Entity::WavesBalance, &key, filter) {
            Ok(record) => decode_waves_record(&record),
            Err(e) if e.is_not_found() => Ok(BalanceProfile::default()),
            Err(e) => Err(e),
        }
    }

    pub fn set_waves_profile(
        &self,
        address: &Address,
        profile: &BalanceProfile,
        block_num: BlockNum,
    ) -> Result<(), StateError> {
        let key = WavesBalanceKey { address: *address }.bytes();
        let mut hs = self.hs.write().expect("history lock");
        hs.set(
            Entity::WavesBalance,
            &key,
            &encode_waves_record(profile, block_num),
        )
    }

    pub fn newest_asset_balance(
        &self,
        address: &Address,
        asset: &Digest,
        filter: bool,
    ) -> Result<u64, StateError> {
        let key = AssetBalanceKey {
            address: *address,
            asset: *asset,
        }
        .bytes();
        let hs = self.hs.read().expect("history lock");
        match hs.get_fresh(Entity::AssetBalance, &key, filter) {
            Ok(record) => decode_asset_record(&record),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn asset_balance(
        &self,
        address: &Address,
        asset: &Digest,
        filter: bool,
    ) -> Result<u64, StateError> {
        let key = AssetBalanceKey {
            address: *address,
            asset: *asset,
        }
        .bytes();
        let hs = self.hs.read().expect("history lock");
        match hs.get(Entity::AssetBalance, &key, filter) {
            Ok(record) => decode_asset_record(&record),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn set_asset_balance(
        &self,
        address: &Address,
        asset: &Digest,
        balance: u64,
        block_num: BlockNum,
    ) -> Result<(), StateError> {
        let key = AssetBalanceKey {
            address: *address,
            asset: *asset,
        }
        .bytes();
        let mut hs = self.hs.write().expect("history lock");
        hs.set(
            Entity::AssetBalance,
            &key,
            &encode_asset_record(balance, block_num),
        )
    }

    /// The effective balance as it stood at `height`: the newest record at
    /// or below that height.
    pub fn effective_balance_at(
        &self,
        address: &Address,
        height: Height,
    ) -> Result<u64, StateError> {
        let key = WavesBalanceKey { address: *address }.bytes();
        let hs = self.hs.read().expect("history lock");
        let records = hs.records_in_height_range(Entity::WavesBalance, &key, 1, height, true)?;
        match records.first() {
            Some(record) => Ok(decode_waves_record(record)?.effective_balance()),
            None => Ok(0),
        }
    }
}
