// Copyright (c) 2025 Crest Developers

//! Issued assets: immutable constants written once at issue, and a history
//! of `(reissuable, quantity)` changes driven by reissue and burn.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::{Digest, PublicKey};
use crate::keyvalue::KeyValue;
use crate::state::history::Entity;
use crate::state::keys::{AssetConstKey, AssetHistKey};
use crate::state::state_db::BlockNum;
use crate::state::{SharedHistory, StateError};

pub const ASSET_RECORD_SIZE: usize = 1 + 8 + 4;

/// The part of an asset that never changes after issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConstInfo {
    pub issuer: PublicKey,
    pub name: String,
    pub description: String,
    pub decimals: u8,
}

/// The part that reissue and burn modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetChangeableInfo {
    pub reissuable: bool,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub constants: AssetConstInfo,
    pub reissuable: bool,
    pub quantity: u64,
}

fn encode_record(info: &AssetChangeableInfo, block_num: BlockNum) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ASSET_RECORD_SIZE);
    buf.push(u8::from(info.reissuable));
    buf.extend_from_slice(&info.quantity.to_be_bytes());
    buf.extend_from_slice(&block_num.to_be_bytes());
    buf
}

fn decode_record(record: &[u8]) -> Result<AssetChangeableInfo, StateError> {
    if record.len() != ASSET_RECORD_SIZE {
        return Err(StateError::Deserialization(
            "bad asset record size".to_string(),
        ));
    }
    Ok(AssetChangeableInfo {
        reissuable: record[0] == 1,
        quantity: u64::from_be_bytes(record[1..9].try_into().unwrap()),
    })
}

#[derive(Clone)]
pub struct Assets {
    kv: Arc<dyn KeyValue>,
    hs: SharedHistory,
}

impl Assets {
    pub fn new(kv: Arc<dyn KeyValue>, hs: SharedHistory) -> Self {
        Self { kv, hs }
    }

    pub fn issue_asset(
        &self,
        asset_id: Digest,
        constants: &AssetConstInfo,
        reissuable: bool,
        quantity: u64,
        block_num: BlockNum,
    ) -> Result<(), StateError> {
        let const_bytes = bincode::serialize(constants)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        // Constants are immutable and keyed by the issue transaction id, so
        // the early write is idempotent across re-applies.
        self.kv
            .put(&AssetConstKey { asset_id }.bytes(), &const_bytes)
            .map_err(|e| StateError::Modification(e.to_string()))?;
        let record = encode_record(
            &AssetChangeableInfo {
                reissuable,
                quantity,
            },
            block_num,
        );
        let mut hs = self.hs.write().expect("history lock");
        hs.set(Entity::Asset, &AssetHistKey { asset_id }.bytes(), &record)
    }

    pub fn reissue_asset(
        &self,
        asset_id: Digest,
        additional_quantity: u64,
        reissuable: bool,
        block_num: BlockNum,
        filter: bool,
    ) -> Result<(), StateError> {
        let current = self.newest_changeable_info(asset_id, filter)?;
        if !current.reissuable {
            return Err(StateError::TxValidation(format!(
                "asset {asset_id} is not reissuable"
            )));
        }
        let quantity = current
            .quantity
            .checked_add(additional_quantity)
            .ok_or_else(|| StateError::TxValidation("asset quantity overflow".to_string()))?;
        let record = encode_record(
            &AssetChangeableInfo {
                reissuable,
                quantity,
            },
            block_num,
        );
        let mut hs = self.hs.write().expect("history lock");
        hs.set(Entity::Asset, &AssetHistKey { asset_id }.bytes(), &record)
    }

    pub fn burn_asset(
        &self,
        asset_id: Digest,
        amount: u64,
        block_num: BlockNum,
        filter: bool,
    ) -> Result<(), StateError> {
        let current = self.newest_changeable_info(asset_id, filter)?;
        let quantity = current.quantity.checked_sub(amount).ok_or_else(|| {
            StateError::TxValidation(format!(
                "burning {amount} exceeds asset quantity {}",
                current.quantity
            ))
        })?;
        let record = encode_record(
            &AssetChangeableInfo {
                reissuable: current.reissuable,
                quantity,
            },
            block_num,
        );
        let mut hs = self.hs.write().expect("history lock");
        hs.set(Entity::Asset, &AssetHistKey { asset_id }.bytes(), &record)
    }

    fn constants(&self, asset_id: Digest) -> Result<AssetConstInfo, StateError> {
        let bytes = self
            .kv
            .get(&AssetConstKey { asset_id }.bytes())
            .map_err(|e| StateError::Retrieval(e.to_string()))?
            .ok_or(StateError::NotFound)?;
        bincode::deserialize(&bytes).map_err(|e| StateError::Deserialization(e.to_string()))
    }

    fn newest_changeable_info(
        &self,
        asset_id: Digest,
        filter: bool,
    ) -> Result<AssetChangeableInfo, StateError> {
        let hs = self.hs.read().expect("history lock");
        let record = hs.get_fresh(Entity::Asset, &AssetHistKey { asset_id }.bytes(), filter)?;
        decode_record(&record)
    }

    /// Asset info including uncommitted changes.
    pub fn newest_asset_info(&self, asset_id: Digest, filter: bool) -> Result<AssetInfo, StateError> {
        let changeable = self.newest_changeable_info(asset_id, filter)?;
        let constants = self.constants(asset_id)?;
        Ok(AssetInfo {
            constants,
            reissuable: changeable.reissuable,
            quantity: changeable.quantity,
        })
    }

    /// Persisted asset info.
    pub fn asset_info(&self, asset_id: Digest, filter: bool) -> Result<AssetInfo, StateError> {
        let record = {
            let hs = self.hs.read().expect("history lock");
            hs.get(Entity::Asset, &AssetHistKey { asset_id }.bytes(), filter)?
        };
        let changeable = decode_record(&record)?;
        let constants = self.constants(asset_id)?;
        Ok(AssetInfo {
            constants,
            reissuable: changeable.reissuable,
            quantity: changeable.quantity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BlockSignature, KeyPair};
    use crate::keyvalue::KvStore;
    use crate::state::history::HistoryStorage;
    use crate::state::state_db::StateDb;
    use std::sync::RwLock;
    use tempfile::tempdir;

    struct Fixture {
        kv: Arc<dyn KeyValue>,
        db: StateDb,
        hs: SharedHistory,
        assets: Assets,
    }

    fn fixture(dir: &std::path::Path) -> Fixture {
        let kv: Arc<dyn KeyValue> = Arc::new(KvStore::open(dir, None).unwrap());
        let db = StateDb::open(kv.clone()).unwrap();
        let hs = Arc::new(RwLock::new(HistoryStorage::new(kv.clone(), db.block_index())));
        let assets = Assets::new(kv.clone(), hs.clone());
        Fixture { kv, db, hs, assets }
    }

    fn flush(fx: &mut Fixture) {
        let batch = fx.hs.write().unwrap().flush(true).unwrap();
        fx.kv.write(batch).unwrap();
        fx.kv.write(fx.db.take_pending()).unwrap();
    }

    fn constants(tag: u8) -> AssetConstInfo {
        AssetConstInfo {
            issuer: KeyPair::from_seed([tag; 32]).public(),
            name: "token".to_string(),
            description: "a test token".to_string(),
            decimals: 8,
        }
    }

    #[test]
    fn issue_and_read_back() {
        let dir = tempdir().unwrap();
        let mut fx = fixture(dir.path());
        let asset_id = Digest([0xff; 32]);
        let num = fx.db.register_block(BlockSignature([1; 64]), 1);

        fx.assets
            .issue_asset(asset_id, &constants(1), false, 1000, num)
            .unwrap();
        let fresh = fx.assets.newest_asset_info(asset_id, true).unwrap();
        assert_eq!(fresh.quantity, 1000);
        assert!(!fresh.reissuable);

        flush(&mut fx);
        let stored = fx.assets.asset_info(asset_id, true).unwrap();
        assert_eq!(stored, fresh);
        assert_eq!(stored.constants, constants(1));
    }

    #[test]
    fn reissue_adds_quantity_and_can_freeze() {
        let dir = tempdir().unwrap();
        let mut fx = fixture(dir.path());
        let asset_id = Digest([0xff; 32]);
        let num = fx.db.register_block(BlockSignature([1; 64]), 1);

        fx.assets
            .issue_asset(asset_id, &constants(1), true, 1000, num)
            .unwrap();
        fx.assets
            .reissue_asset(asset_id, 1, false, num, true)
            .unwrap();
        flush(&mut fx);

        let info = fx.assets.asset_info(asset_id, true).unwrap();
        assert_eq!(info.quantity, 1001);
        assert!(!info.reissuable);

        // Frozen assets reject further reissue.
        let err = fx.assets.reissue_asset(asset_id, 1, true, num, true).unwrap_err();
        assert!(matches!(err, StateError::TxValidation(_)));
    }

    #[test]
    fn burn_decrements_quantity() {
        let dir = tempdir().unwrap();
        let mut fx = fixture(dir.path());
        let asset_id = Digest([0xff; 32]);
        let num = fx.db.register_block(BlockSignature([1; 64]), 1);

        fx.assets
            .issue_asset(asset_id, &constants(2), false, 1000, num)
            .unwrap();
        fx.assets.burn_asset(asset_id, 1, num, true).unwrap();
        flush(&mut fx);

        let info = fx.assets.asset_info(asset_id, true).unwrap();
        assert_eq!(info.quantity, 999);

        let err = fx.assets.burn_asset(asset_id, 10_000, num, true).unwrap_err();
        assert!(matches!(err, StateError::TxValidation(_)));
    }

    #[test]
    fn unknown_asset_is_not_found() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        let err = fx
            .assets
            .newest_asset_info(Digest([1; 32]), true)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
