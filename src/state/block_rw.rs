// Copyright (c) 2025 Crest Developers

//! Append-only block storage: a data file of serialised blocks plus a
//! fixed-width index file addressed by height. Block and transaction ids
//! map to offsets through the key-value store. Appends are staged in memory
//! and only reach the files on flush, so a failed block leaves no trace.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::crypto::{BlockSignature, Digest, SIGNATURE_SIZE};
use crate::keyvalue::{KeyValue, WriteBatch};
use crate::proto::{Block, Transaction};
use crate::state::keys::{rw_height_key, BlockOffsetKey, TxOffsetKey};
use crate::state::{Height, StateError};

/// Index row: block signature, data-file offset, serialised length.
const INDEX_ROW_SIZE: u64 = SIGNATURE_SIZE as u64 + 8 + 4;

const DATA_FILE: &str = "blockchain.dat";
const INDEX_FILE: &str = "blockchain.idx";

struct RwFiles {
    data: File,
    index: File,
}

struct PendingBlock {
    id: BlockSignature,
    tx_ids: Vec<Digest>,
    bytes: Vec<u8>,
}

pub struct BlockReadWriter {
    kv: Arc<dyn KeyValue>,
    files: Mutex<RwFiles>,
    data_len: u64,
    height: Height,
    height_by_id: HashMap<BlockSignature, Height>,
    pending: Vec<PendingBlock>,
}

fn io_err(e: std::io::Error) -> StateError {
    StateError::Retrieval(format!("block file i/o: {e}"))
}

fn modification(e: crate::keyvalue::KvError) -> StateError {
    StateError::Modification(e.to_string())
}

impl BlockReadWriter {
    pub fn open(kv: Arc<dyn KeyValue>, dir: &Path) -> Result<Self, StateError> {
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let open = |name: &str| -> Result<File, StateError> {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(dir.join(name))
                .map_err(io_err)
        };
        let data = open(DATA_FILE)?;
        let mut index = open(INDEX_FILE)?;

        let index_len = index.metadata().map_err(io_err)?.len();
        if index_len % INDEX_ROW_SIZE != 0 {
            warn!(index_len, "truncating torn index row");
            index
                .set_len(index_len - index_len % INDEX_ROW_SIZE)
                .map_err(io_err)?;
        }
        let height = index.metadata().map_err(io_err)?.len() / INDEX_ROW_SIZE;

        let mut height_by_id = HashMap::new();
        let mut data_len = 0u64;
        index.seek(SeekFrom::Start(0)).map_err(io_err)?;
        for h in 1..=height {
            let (id, offset, len) = read_row(&mut index)?;
            height_by_id.insert(id, h);
            data_len = offset + len as u64;
        }

        if kv.get(&rw_height_key()).map_err(|e| StateError::Retrieval(e.to_string()))?.is_none() {
            kv.put(&rw_height_key(), &1u64.to_be_bytes()).map_err(modification)?;
        }

        Ok(Self {
            kv,
            files: Mutex::new(RwFiles { data, index }),
            data_len,
            height,
            height_by_id,
            pending: Vec::new(),
        })
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn has_block(&self, id: &BlockSignature) -> bool {
        self.height_by_id.contains_key(id)
    }

    pub fn height_by_block_id(&self, id: &BlockSignature) -> Option<Height> {
        self.height_by_id.get(id).copied()
    }

    pub fn block_id_at(&self, height: Height) -> Result<BlockSignature, StateError> {
        let (id, _, _) = self.row_at(height)?;
        Ok(id)
    }

    pub fn block_by_height(&self, height: Height) -> Result<Block, StateError> {
        let (_, offset, len) = self.row_at(height)?;
        let bytes = self.read_data(offset, len)?;
        Block::unmarshal_binary(&bytes)
            .map_err(|e| StateError::Deserialization(format!("stored block: {e}")))
    }

    /// Look a transaction up through its offset key.
    pub fn transaction_by_id(&self, tx_id: &Digest) -> Result<Transaction, StateError> {
        let key = TxOffsetKey { tx_id: *tx_id }.bytes();
        let Some(value) = self
            .kv
            .get(&key)
            .map_err(|e| StateError::Retrieval(e.to_string()))?
        else {
            return Err(StateError::NotFound);
        };
        let (offset, len) = decode_offset(&value)?;
        let bytes = self.read_data(offset, len)?;
        let block = Block::unmarshal_binary(&bytes)
            .map_err(|e| StateError::Deserialization(format!("stored block: {e}")))?;
        block
            .transactions
            .into_iter()
            .find(|tx| tx.id() == *tx_id)
            .ok_or(StateError::NotFound)
    }

    /// Stage a block for the next flush.
    pub fn stage_block(&mut self, height: Height, block: &Block) -> Result<(), StateError> {
        let expected = self.height + self.pending.len() as Height + 1;
        if height != expected {
            return Err(StateError::InvalidInput(format!(
                "staging block at height {height}, expected {expected}"
            )));
        }
        self.pending.push(PendingBlock {
            id: block.id(),
            tx_ids: block.transactions.iter().map(|tx| tx.id()).collect(),
            bytes: block.marshal_binary(),
        });
        Ok(())
    }

    pub fn discard_staged(&mut self) {
        self.pending.clear();
    }

    /// Append staged blocks to the files and return the offset-key batch.
    pub fn flush(&mut self) -> Result<WriteBatch, StateError> {
        let mut batch = WriteBatch::new();
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(batch);
        }
        let mut files = self.files.lock().expect("block file lock");
        for block in pending {
            let offset = self.data_len;
            let len = block.bytes.len() as u32;
            files.data.seek(SeekFrom::Start(offset)).map_err(io_err)?;
            files.data.write_all(&block.bytes).map_err(io_err)?;

            let mut row = Vec::with_capacity(INDEX_ROW_SIZE as usize);
            row.extend_from_slice(block.id.as_bytes());
            row.extend_from_slice(&offset.to_be_bytes());
            row.extend_from_slice(&len.to_be_bytes());
            files
                .index
                .seek(SeekFrom::Start(self.height * INDEX_ROW_SIZE))
                .map_err(io_err)?;
            files.index.write_all(&row).map_err(io_err)?;

            batch.put(
                BlockOffsetKey { block_id: block.id }.bytes(),
                encode_offset(offset, len),
            );
            for tx_id in &block.tx_ids {
                batch.put(TxOffsetKey { tx_id: *tx_id }.bytes(), encode_offset(offset, len));
            }

            self.height += 1;
            self.data_len = offset + len as u64;
            self.height_by_id.insert(block.id, self.height);
        }
        files.data.sync_all().map_err(io_err)?;
        files.index.sync_all().map_err(io_err)?;
        Ok(batch)
    }

    /// Drop all blocks above `height`, removing their offset keys.
    pub fn truncate_to(&mut self, height: Height) -> Result<(), StateError> {
        if height > self.height {
            return Err(StateError::InvalidInput(format!(
                "cannot truncate up to {height}, current height {}",
                self.height
            )));
        }
        self.pending.clear();
        let mut batch = WriteBatch::new();
        for h in (height + 1)..=self.height {
            let (id, _, _) = self.row_at(h)?;
            let block = self.block_by_height(h)?;
            batch.delete(BlockOffsetKey { block_id: id }.bytes());
            for tx in &block.transactions {
                batch.delete(TxOffsetKey { tx_id: tx.id() }.bytes());
            }
            self.height_by_id.remove(&id);
        }
        let new_data_len = if height == 0 {
            0
        } else {
            let (_, offset, len) = self.row_at(height)?;
            offset + len as u64
        };

        let files = self.files.lock().expect("block file lock");
        files.index.set_len(height * INDEX_ROW_SIZE).map_err(io_err)?;
        files.data.set_len(new_data_len).map_err(io_err)?;
        files.index.sync_all().map_err(io_err)?;
        files.data.sync_all().map_err(io_err)?;
        drop(files);

        self.height = height;
        self.data_len = new_data_len;
        self.kv.write(batch).map_err(modification)?;
        Ok(())
    }

    fn row_at(&self, height: Height) -> Result<(BlockSignature, u64, u32), StateError> {
        if height == 0 || height > self.height {
            return Err(StateError::NotFound);
        }
        let mut files = self.files.lock().expect("block file lock");
        files
            .index
            .seek(SeekFrom::Start((height - 1) * INDEX_ROW_SIZE))
            .map_err(io_err)?;
        read_row(&mut files.index)
    }

    fn read_data(&self, offset: u64, len: u32) -> Result<Vec<u8>, StateError> {
        let mut files = self.files.lock().expect("block file lock");
        files.data.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        let mut buf = vec![0u8; len as usize];
        files.data.read_exact(&mut buf).map_err(io_err)?;
        Ok(buf)
    }
}

fn read_row(index: &mut File) -> Result<(BlockSignature, u64, u32), StateError> {
    let mut row = [0u8; INDEX_ROW_SIZE as usize];
    index.read_exact(&mut row).map_err(io_err)?;
    let id = BlockSignature::from_bytes(&row[..SIGNATURE_SIZE])
        .ok_or_else(|| StateError::Deserialization("corrupted index row".to_string()))?;
    let offset = u64::from_be_bytes(row[SIGNATURE_SIZE..SIGNATURE_SIZE + 8].try_into().unwrap());
    let len = u32::from_be_bytes(row[SIGNATURE_SIZE + 8..].try_into().unwrap());
    Ok((id, offset, len))
}

fn encode_offset(offset: u64, len: u32) -> Vec<u8> {
    let mut value = Vec::with_capacity(12);
    value.extend_from_slice(&offset.to_be_bytes());
    value.extend_from_slice(&len.to_be_bytes());
    value
}

fn decode_offset(value: &[u8]) -> Result<(u64, u32), StateError> {
    if value.len() != 12 {
        return Err(StateError::Deserialization(
            "corrupted offset record".to_string(),
        ));
    }
    let offset = u64::from_be_bytes(value[..8].try_into().unwrap());
    let len = u32::from_be_bytes(value[8..].try_into().unwrap());
    Ok((offset, len))
}
