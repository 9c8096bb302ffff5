// Copyright (c) 2025 Crest Developers

//! Byte keys for every stored entity class: a one-byte prefix followed by
//! the class-specific body. The layout is an on-disk compatibility contract
//! and must not drift.

use crate::crypto::{Address, BlockSignature, Digest, ADDRESS_SIZE, DIGEST_SIZE, SIGNATURE_SIZE};
use crate::state::{Height, StateError};

// Balances.
pub const WAVES_BALANCE_KEY_PREFIX: u8 = 0;
pub const ASSET_BALANCE_KEY_PREFIX: u8 = 1;

// Valid block IDs.
pub const BLOCK_ID_KEY_PREFIX: u8 = 2;

// IDs of blocks and transactions mapped to offsets in the block file.
pub const BLOCK_OFFSET_KEY_PREFIX: u8 = 3;
pub const TX_OFFSET_KEY_PREFIX: u8 = 4;

// Minimum height to which rollback is possible.
pub const ROLLBACK_MIN_HEIGHT_KEY_PREFIX: u8 = 5;
// Min height of the block read-writer's files.
pub const RW_HEIGHT_KEY_PREFIX: u8 = 6;
// Height of the main db.
pub const DB_HEIGHT_KEY_PREFIX: u8 = 7;

// Cumulative score at height.
pub const SCORE_KEY_PREFIX: u8 = 8;

// Assets.
pub const ASSET_CONST_KEY_PREFIX: u8 = 9;
pub const ASSET_HIST_KEY_PREFIX: u8 = 10;

// Leases.
pub const LEASE_KEY_PREFIX: u8 = 11;

// Known peers.
pub const KNOWN_PEERS_KEY_PREFIX: u8 = 12;

// Feature voting and aliases extend the original table.
pub const FEATURE_VOTE_KEY_PREFIX: u8 = 13;
pub const ACTIVATED_FEATURE_KEY_PREFIX: u8 = 14;
pub const ALIAS_KEY_PREFIX: u8 = 15;

pub const WAVES_BALANCE_KEY_SIZE: usize = 1 + ADDRESS_SIZE;
pub const ASSET_BALANCE_KEY_SIZE: usize = 1 + ADDRESS_SIZE + DIGEST_SIZE;

fn invalid_key(what: &str) -> StateError {
    StateError::InvalidInput(format!("malformed {what} key"))
}

pub struct WavesBalanceKey {
    pub address: Address,
}

impl WavesBalanceKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WAVES_BALANCE_KEY_SIZE);
        buf.push(WAVES_BALANCE_KEY_PREFIX);
        buf.extend_from_slice(self.address.as_bytes());
        buf
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, StateError> {
        if data.len() != WAVES_BALANCE_KEY_SIZE || data[0] != WAVES_BALANCE_KEY_PREFIX {
            return Err(invalid_key("waves balance"));
        }
        let address =
            Address::from_bytes(&data[1..]).ok_or_else(|| invalid_key("waves balance"))?;
        Ok(Self { address })
    }
}

pub struct AssetBalanceKey {
    pub address: Address,
    pub asset: Digest,
}

impl AssetBalanceKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ASSET_BALANCE_KEY_SIZE);
        buf.push(ASSET_BALANCE_KEY_PREFIX);
        buf.extend_from_slice(self.address.as_bytes());
        buf.extend_from_slice(self.asset.as_bytes());
        buf
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, StateError> {
        if data.len() != ASSET_BALANCE_KEY_SIZE || data[0] != ASSET_BALANCE_KEY_PREFIX {
            return Err(invalid_key("asset balance"));
        }
        let address = Address::from_bytes(&data[1..1 + ADDRESS_SIZE])
            .ok_or_else(|| invalid_key("asset balance"))?;
        let asset = Digest::from_bytes(&data[1 + ADDRESS_SIZE..])
            .ok_or_else(|| invalid_key("asset balance"))?;
        Ok(Self { address, asset })
    }
}

/// The (address, asset) balance key used by the differ; waves balances and
/// asset balances live under different prefixes.
pub fn byte_key(address: &Address, asset: &Option<Digest>) -> Vec<u8> {
    match asset {
        None => WavesBalanceKey { address: *address }.bytes(),
        Some(asset) => AssetBalanceKey {
            address: *address,
            asset: *asset,
        }
        .bytes(),
    }
}

pub struct BlockIdKey {
    pub block_id: BlockSignature,
}

impl BlockIdKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + SIGNATURE_SIZE);
        buf.push(BLOCK_ID_KEY_PREFIX);
        buf.extend_from_slice(self.block_id.as_bytes());
        buf
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, StateError> {
        if data.len() != 1 + SIGNATURE_SIZE || data[0] != BLOCK_ID_KEY_PREFIX {
            return Err(invalid_key("block id"));
        }
        let block_id =
            BlockSignature::from_bytes(&data[1..]).ok_or_else(|| invalid_key("block id"))?;
        Ok(Self { block_id })
    }
}

pub struct BlockOffsetKey {
    pub block_id: BlockSignature,
}

impl BlockOffsetKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + SIGNATURE_SIZE);
        buf.push(BLOCK_OFFSET_KEY_PREFIX);
        buf.extend_from_slice(self.block_id.as_bytes());
        buf
    }
}

pub struct TxOffsetKey {
    pub tx_id: Digest,
}

impl TxOffsetKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + DIGEST_SIZE);
        buf.push(TX_OFFSET_KEY_PREFIX);
        buf.extend_from_slice(self.tx_id.as_bytes());
        buf
    }
}

pub fn rollback_min_height_key() -> Vec<u8> {
    vec![ROLLBACK_MIN_HEIGHT_KEY_PREFIX]
}

pub fn rw_height_key() -> Vec<u8> {
    vec![RW_HEIGHT_KEY_PREFIX]
}

pub fn db_height_key() -> Vec<u8> {
    vec![DB_HEIGHT_KEY_PREFIX]
}

pub fn known_peers_key() -> Vec<u8> {
    vec![KNOWN_PEERS_KEY_PREFIX]
}

pub struct ScoreKey {
    pub height: Height,
}

impl ScoreKey {
    /// Height is little-endian here, unlike the rest of the layout.
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9);
        buf.push(SCORE_KEY_PREFIX);
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf
    }
}

pub struct AssetConstKey {
    pub asset_id: Digest,
}

impl AssetConstKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + DIGEST_SIZE);
        buf.push(ASSET_CONST_KEY_PREFIX);
        buf.extend_from_slice(self.asset_id.as_bytes());
        buf
    }
}

pub struct AssetHistKey {
    pub asset_id: Digest,
}

impl AssetHistKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + DIGEST_SIZE);
        buf.push(ASSET_HIST_KEY_PREFIX);
        buf.extend_from_slice(self.asset_id.as_bytes());
        buf
    }
}

pub struct LeaseKey {
    pub lease_id: Digest,
}

impl LeaseKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + DIGEST_SIZE);
        buf.push(LEASE_KEY_PREFIX);
        buf.extend_from_slice(self.lease_id.as_bytes());
        buf
    }
}

pub struct FeatureVoteKey {
    pub feature_id: u16,
}

impl FeatureVoteKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3);
        buf.push(FEATURE_VOTE_KEY_PREFIX);
        buf.extend_from_slice(&self.feature_id.to_be_bytes());
        buf
    }
}

pub struct ActivatedFeatureKey {
    pub feature_id: u16,
}

impl ActivatedFeatureKey {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3);
        buf.push(ACTIVATED_FEATURE_KEY_PREFIX);
        buf.extend_from_slice(&self.feature_id.to_be_bytes());
        buf
    }
}

pub struct AliasKey<'a> {
    pub alias: &'a str,
}

impl AliasKey<'_> {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.alias.len());
        buf.push(ALIAS_KEY_PREFIX);
        buf.extend_from_slice(self.alias.as_bytes());
        buf
    }
}
