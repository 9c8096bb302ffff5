// Copyright (c) 2025 Crest Developers

//! Block bookkeeping for the state engine: every block ever added receives a
//! dense internal block-number; history records reference that number, and
//! this component owns the validity bit that rollback flips. It also tracks
//! the main db height and the minimum height rollback may reach.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::crypto::{BlockSignature, SIGNATURE_SIZE};
use crate::keyvalue::{KeyValue, WriteBatch};
use crate::state::keys::{db_height_key, rollback_min_height_key, BlockIdKey};
use crate::state::{Height, StateError};

pub type BlockNum = u32;

/// Value layout under the block-id key: validity byte first (the external
/// contract), then the block-number and the height the block was added at.
const BLOCK_ID_VALUE_SIZE: usize = 1 + 4 + 8;

#[derive(Debug, Clone, Copy)]
struct BlockNumEntry {
    id: BlockSignature,
    height: Height,
    valid: bool,
}

/// In-memory view of block-number assignments, shared read-only with the
/// history storage for record filtering.
#[derive(Default)]
pub struct BlockNumIndex {
    entries: HashMap<BlockNum, BlockNumEntry>,
}

impl BlockNumIndex {
    pub fn is_valid(&self, num: BlockNum) -> bool {
        self.entries.get(&num).map(|e| e.valid).unwrap_or(false)
    }

    pub fn height(&self, num: BlockNum) -> Option<Height> {
        self.entries.get(&num).map(|e| e.height)
    }

    pub fn id(&self, num: BlockNum) -> Option<BlockSignature> {
        self.entries.get(&num).map(|e| e.id)
    }

    fn insert(&mut self, num: BlockNum, id: BlockSignature, height: Height, valid: bool) {
        self.entries.insert(num, BlockNumEntry { id, height, valid });
    }

    fn invalidate(&mut self, num: BlockNum) {
        if let Some(entry) = self.entries.get_mut(&num) {
            entry.valid = false;
        }
    }
}

pub type SharedBlockIndex = Arc<RwLock<BlockNumIndex>>;

pub struct StateDb {
    kv: Arc<dyn KeyValue>,
    index: SharedBlockIndex,
    block_num_by_id: HashMap<BlockSignature, BlockNum>,
    next_block_num: BlockNum,
    db_height: Height,
    rollback_min_height: Height,
    pending: WriteBatch,
}

fn retrieval(e: crate::keyvalue::KvError) -> StateError {
    StateError::Retrieval(e.to_string())
}

impl StateDb {
    pub fn open(kv: Arc<dyn KeyValue>) -> Result<Self, StateError> {
        let mut index = BlockNumIndex::default();
        let mut block_num_by_id = HashMap::new();
        let mut next_block_num: BlockNum = 0;

        for (key, value) in kv
            .iter_prefix(&[crate::state::keys::BLOCK_ID_KEY_PREFIX])
            .map_err(retrieval)?
        {
            if key.len() != 1 + SIGNATURE_SIZE || value.len() != BLOCK_ID_VALUE_SIZE {
                return Err(StateError::Deserialization(
                    "corrupted block id record".to_string(),
                ));
            }
            let parsed = BlockIdKey::unmarshal(&key)?;
            let valid = value[0] == 1;
            let num = BlockNum::from_be_bytes(value[1..5].try_into().unwrap());
            let height = Height::from_be_bytes(value[5..13].try_into().unwrap());
            index.insert(num, parsed.block_id, height, valid);
            if valid {
                block_num_by_id.insert(parsed.block_id, num);
            }
            next_block_num = next_block_num.max(num + 1);
        }

        let db_height = read_height(kv.as_ref(), &db_height_key())?;
        let rollback_min_height = read_height(kv.as_ref(), &rollback_min_height_key())?;

        Ok(Self {
            kv,
            index: Arc::new(RwLock::new(index)),
            block_num_by_id,
            next_block_num,
            db_height,
            rollback_min_height,
            pending: WriteBatch::new(),
        })
    }

    pub fn block_index(&self) -> SharedBlockIndex {
        self.index.clone()
    }

    /// Whether this id names a block that is currently part of the chain.
    pub fn is_valid_block_id(&self, id: &BlockSignature) -> bool {
        self.block_num_by_id.contains_key(id)
    }

    pub fn block_num_by_id(&self, id: &BlockSignature) -> Option<BlockNum> {
        self.block_num_by_id.get(id).copied()
    }

    pub fn block_num_to_id(&self, num: BlockNum) -> Option<BlockSignature> {
        self.index.read().ok()?.id(num)
    }

    /// Assign the next block-number to an incoming block. A block re-added
    /// after rollback gets a fresh number; records written under its old
    /// number stay invalid forever.
    pub fn register_block(&mut self, id: BlockSignature, height: Height) -> BlockNum {
        let num = self.next_block_num;
        self.next_block_num += 1;
        if let Ok(mut index) = self.index.write() {
            index.insert(num, id, height, true);
        }
        self.block_num_by_id.insert(id, num);
        self.pending
            .put(BlockIdKey { block_id: id }.bytes(), block_id_value(true, num, height));
        num
    }

    /// Flip the validity bit of a rolled-back block.
    pub fn invalidate_block(&mut self, id: &BlockSignature) -> Result<(), StateError> {
        let num = self
            .block_num_by_id
            .remove(id)
            .ok_or(StateError::NotFound)?;
        let height = self
            .index
            .read()
            .ok()
            .and_then(|i| i.height(num))
            .ok_or(StateError::NotFound)?;
        if let Ok(mut index) = self.index.write() {
            index.invalidate(num);
        }
        self.pending
            .put(BlockIdKey { block_id: *id }.bytes(), block_id_value(false, num, height));
        Ok(())
    }

    /// Undo a registration staged in the current, not yet flushed, block.
    pub fn unregister_block(&mut self, id: &BlockSignature) {
        if let Some(num) = self.block_num_by_id.remove(id) {
            if let Ok(mut index) = self.index.write() {
                index.invalidate(num);
            }
        }
    }

    pub fn db_height(&self) -> Height {
        self.db_height
    }

    pub fn set_db_height(&mut self, height: Height) {
        self.db_height = height;
        self.pending
            .put(db_height_key(), height.to_be_bytes().to_vec());
    }

    pub fn rollback_min_height(&self) -> Height {
        self.rollback_min_height
    }

    pub fn set_rollback_min_height(&mut self, height: Height) {
        self.rollback_min_height = height;
        self.pending
            .put(rollback_min_height_key(), height.to_be_bytes().to_vec());
    }

    /// Take everything staged since the last flush.
    pub fn take_pending(&mut self) -> WriteBatch {
        std::mem::take(&mut self.pending)
    }

    /// Drop staged operations and reload authoritative values from disk.
    pub fn reset_pending(&mut self) -> Result<(), StateError> {
        self.pending = WriteBatch::new();
        self.db_height = read_height(self.kv.as_ref(), &db_height_key())?;
        self.rollback_min_height = read_height(self.kv.as_ref(), &rollback_min_height_key())?;
        Ok(())
    }
}

fn block_id_value(valid: bool, num: BlockNum, height: Height) -> Vec<u8> {
    let mut value = Vec::with_capacity(BLOCK_ID_VALUE_SIZE);
    value.push(u8::from(valid));
    value.extend_from_slice(&num.to_be_bytes());
    value.extend_from_slice(&height.to_be_bytes());
    value
}

fn read_height(kv: &dyn KeyValue, key: &[u8]) -> Result<Height, StateError> {
    match kv.get(key).map_err(retrieval)? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StateError::Deserialization("corrupted height record".to_string()))?;
            Ok(Height::from_be_bytes(arr))
        }
        None => Ok(0),
    }
}
