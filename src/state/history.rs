// Copyright (c) 2025 Crest Developers

//! Per-key append-only history. Every record is fixed-size for its entity
//! class and ends with the 4-byte block-number of the block that produced
//! it. Reads with `filter = true` drop trailing records whose block-number
//! was invalidated by rollback and write the normalised history back.
//!
//! Writes first land in an in-memory overlay keyed by the storage key;
//! `flush` merges the overlay into a write batch in deterministic key
//! order. Fresh reads see the overlay, persisted reads do not: during block
//! application the new state exists only in the overlay, while snapshot
//! reads can go straight to the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::keyvalue::{KeyValue, WriteBatch};
use crate::state::state_db::{BlockNum, SharedBlockIndex};
use crate::state::{Height, StateError};

pub const BLOCK_NUM_SIZE: usize = 4;

/// Entity classes stored as history, with their fixed record sizes
/// (block-number suffix included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Alias,
    Asset,
    Lease,
    WavesBalance,
    AssetBalance,
    FeatureVote,
    ActivatedFeature,
}

impl Entity {
    pub fn record_size(self) -> usize {
        match self {
            // address (26) + block num
            Entity::Alias => 26 + BLOCK_NUM_SIZE,
            // reissuable (1) + quantity (8) + block num
            Entity::Asset => 1 + 8 + BLOCK_NUM_SIZE,
            // active (1) + sender (26) + recipient (26) + amount (8)
            // + creation height (8) + block num
            Entity::Lease => 1 + 26 + 26 + 8 + 8 + BLOCK_NUM_SIZE,
            // balance (8) + lease in (8) + lease out (8) + block num
            Entity::WavesBalance => 8 + 8 + 8 + BLOCK_NUM_SIZE,
            // balance (8) + block num
            Entity::AssetBalance => 8 + BLOCK_NUM_SIZE,
            // vote count (8) + block num
            Entity::FeatureVote => 8 + BLOCK_NUM_SIZE,
            // activation height (8) + block num
            Entity::ActivatedFeature => 8 + BLOCK_NUM_SIZE,
        }
    }
}

/// Read the trailing block-number of a record.
pub fn record_block_num(record: &[u8]) -> BlockNum {
    let tail = &record[record.len() - BLOCK_NUM_SIZE..];
    BlockNum::from_be_bytes(tail.try_into().unwrap())
}

struct OverlayEntry {
    entity: Entity,
    data: Vec<u8>,
}

pub struct HistoryStorage {
    kv: Arc<dyn KeyValue>,
    index: SharedBlockIndex,
    overlay: BTreeMap<Vec<u8>, OverlayEntry>,
}

fn retrieval(e: crate::keyvalue::KvError) -> StateError {
    StateError::Retrieval(e.to_string())
}

fn modification(e: crate::keyvalue::KvError) -> StateError {
    StateError::Modification(e.to_string())
}

impl HistoryStorage {
    pub fn new(kv: Arc<dyn KeyValue>, index: SharedBlockIndex) -> Self {
        Self {
            kv,
            index,
            overlay: BTreeMap::new(),
        }
    }

    /// Append a record to the pending overlay.
    pub fn set(&mut self, entity: Entity, key: &[u8], record: &[u8]) -> Result<(), StateError> {
        if record.len() != entity.record_size() {
            return Err(StateError::InvalidInput(format!(
                "record size {} does not match entity size {}",
                record.len(),
                entity.record_size()
            )));
        }
        let entry = self.overlay.entry(key.to_vec()).or_insert_with(|| OverlayEntry {
            entity,
            data: Vec::new(),
        });
        if entry.entity != entity {
            return Err(StateError::InvalidInput(
                "entity class changed for history key".to_string(),
            ));
        }
        entry.data.extend_from_slice(record);
        Ok(())
    }

    fn is_valid_block_num(&self, num: BlockNum) -> bool {
        self.index.read().map(|i| i.is_valid(num)).unwrap_or(false)
    }

    fn height_of_block_num(&self, num: BlockNum) -> Result<Height, StateError> {
        self.index
            .read()
            .ok()
            .and_then(|i| i.height(num))
            .ok_or_else(|| {
                StateError::Deserialization(format!("unknown block number {num} in history"))
            })
    }

    /// Drop trailing records of invalidated blocks. Rollback only ever
    /// invalidates the newest blocks, so stale records form a suffix.
    fn normalize(
        &self,
        entity: Entity,
        mut history: Vec<u8>,
        filter: bool,
    ) -> Result<Vec<u8>, StateError> {
        let record_size = entity.record_size();
        if history.len() % record_size != 0 {
            return Err(StateError::Deserialization(
                "history length is not a multiple of the record size".to_string(),
            ));
        }
        if !filter {
            return Ok(history);
        }
        while !history.is_empty() {
            let tail = &history[history.len() - record_size..];
            if self.is_valid_block_num(record_block_num(tail)) {
                break;
            }
            history.truncate(history.len() - record_size);
        }
        Ok(history)
    }

    /// Stored history, normalised. Shrunk histories are written back; fully
    /// filtered ones are removed from the db.
    fn stored_history(
        &self,
        entity: Entity,
        key: &[u8],
        filter: bool,
    ) -> Result<Option<Vec<u8>>, StateError> {
        let Some(stored) = self.kv.get(key).map_err(retrieval)? else {
            return Ok(None);
        };
        let len_before = stored.len();
        let normalized = self.normalize(entity, stored, filter)?;
        if normalized.len() != len_before {
            if normalized.is_empty() {
                self.kv.delete(key).map_err(modification)?;
            } else {
                self.kv.put(key, &normalized).map_err(modification)?;
            }
        }
        Ok(Some(normalized).filter(|h| !h.is_empty()))
    }

    /// Stored history combined with the overlay, if any.
    fn full_history(
        &self,
        entity: Entity,
        key: &[u8],
        filter: bool,
    ) -> Result<Vec<u8>, StateError> {
        let mut history = self.stored_history(entity, key, filter)?.unwrap_or_default();
        if let Some(entry) = self.overlay.get(key) {
            history.extend_from_slice(&entry.data);
        }
        Ok(history)
    }

    fn latest(entity: Entity, history: &[u8]) -> Vec<u8> {
        history[history.len() - entity.record_size()..].to_vec()
    }

    /// Latest persisted record; overlay is not consulted.
    pub fn get(&self, entity: Entity, key: &[u8], filter: bool) -> Result<Vec<u8>, StateError> {
        match self.stored_history(entity, key, filter)? {
            Some(history) => Ok(Self::latest(entity, &history)),
            None => Err(StateError::NotFound),
        }
    }

    /// Latest record including the uncommitted overlay.
    pub fn get_fresh(
        &self,
        entity: Entity,
        key: &[u8],
        filter: bool,
    ) -> Result<Vec<u8>, StateError> {
        let history = self.full_history(entity, key, filter)?;
        if history.is_empty() {
            return Err(StateError::NotFound);
        }
        Ok(Self::latest(entity, &history))
    }

    /// Records whose resolved block-height lies in `[start_height,
    /// end_height]`, newest first.
    pub fn records_in_height_range(
        &self,
        entity: Entity,
        key: &[u8],
        start_height: Height,
        end_height: Height,
        filter: bool,
    ) -> Result<Vec<Vec<u8>>, StateError> {
        let history = self.full_history(entity, key, filter)?;
        let record_size = entity.record_size();
        let mut records = Vec::new();
        let mut end = history.len();
        while end >= record_size {
            let record = &history[end - record_size..end];
            end -= record_size;
            let height = self.height_of_block_num(record_block_num(record))?;
            if height > end_height {
                continue;
            }
            if height < start_height {
                if !records.is_empty() {
                    break;
                }
                continue;
            }
            records.push(record.to_vec());
        }
        Ok(records)
    }

    /// Merge the overlay into a write batch, in key order, and clear it.
    pub fn flush(&mut self, filter: bool) -> Result<WriteBatch, StateError> {
        let mut batch = WriteBatch::new();
        let overlay = std::mem::take(&mut self.overlay);
        for (key, entry) in overlay {
            let mut combined = self
                .stored_history(entry.entity, &key, filter)?
                .unwrap_or_default();
            combined.extend_from_slice(&entry.data);
            batch.put(key, combined);
        }
        Ok(batch)
    }

    /// Discard the overlay without persisting it.
    pub fn reset(&mut self) {
        self.overlay.clear();
    }

    /// All history keys under a prefix, stored and overlay combined.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StateError> {
        let mut keys: Vec<Vec<u8>> = self
            .kv
            .iter_prefix(prefix)
            .map_err(retrieval)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in self.overlay.keys() {
            if key.starts_with(prefix) && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
