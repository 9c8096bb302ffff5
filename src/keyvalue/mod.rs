// Copyright (c) 2025 Crest Developers

//! Key-value backend for the state engine: an LMDB-backed store behind a
//! small trait offering point lookup, atomic batch writes and ordered
//! prefix iteration. An optional bloom filter short-circuits lookups of
//! keys that were never written.

pub mod bloom;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

pub use bloom::{BloomFilter, BloomFilterParams};

const MAP_SIZE: usize = 1024 * 1024 * 1024; // 1GB

#[derive(Debug, Error)]
pub enum KvError {
    #[error("database error: {0}")]
    Backend(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn backend(e: heed::Error) -> KvError {
    KvError::Backend(e.to_string())
}

#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A set of operations applied atomically by [`KeyValue::write`].
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub trait KeyValue: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    fn has(&self, key: &[u8]) -> Result<bool, KvError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;
    /// Apply a batch atomically, in order.
    fn write(&self, batch: WriteBatch) -> Result<(), KvError>;
    /// All entries whose key starts with `prefix`, in key order.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;
}

/// LMDB-backed store.
pub struct KvStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    /// Negative-lookup accelerator; `None` when disabled.
    bloom: Option<RwLock<BloomFilter>>,
}

impl KvStore {
    pub fn open(path: &Path, bloom_params: Option<BloomFilterParams>) -> Result<Self, KvError> {
        fs::create_dir_all(path)?;
        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(1)
                .map_size(MAP_SIZE)
                .open(path)
        }
        .map_err(backend)?;
        let mut wtxn = env.write_txn().map_err(backend)?;
        let db = env
            .create_database(&mut wtxn, Some("state"))
            .map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        let bloom = match bloom_params {
            Some(params) => {
                let mut filter = BloomFilter::optimal(&params);
                let rtxn = env.read_txn().map_err(backend)?;
                let iter = db.iter(&rtxn).map_err(backend)?;
                for entry in iter {
                    let (key, _) = entry.map_err(backend)?;
                    filter.add(key);
                }
                Some(RwLock::new(filter))
            }
            None => None,
        };

        Ok(Self { env, db, bloom })
    }

    fn bloom_add(&self, key: &[u8]) {
        if let Some(bloom) = &self.bloom {
            if let Ok(mut filter) = bloom.write() {
                filter.add(key);
            }
        }
    }

    /// A hard negative from the filter means the key was never written.
    fn definitely_absent(&self, key: &[u8]) -> bool {
        match &self.bloom {
            Some(bloom) => bloom.read().map(|f| f.not_in_set(key)).unwrap_or(false),
            None => false,
        }
    }
}

impl KeyValue for KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        if self.definitely_absent(key) {
            return Ok(None);
        }
        let rtxn = self.env.read_txn().map_err(backend)?;
        Ok(self.db.get(&rtxn, key).map_err(backend)?.map(<[u8]>::to_vec))
    }

    fn has(&self, key: &[u8]) -> Result<bool, KvError> {
        if self.definitely_absent(key) {
            return Ok(false);
        }
        let rtxn = self.env.read_txn().map_err(backend)?;
        Ok(self.db.get(&rtxn, key).map_err(backend)?.is_some())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        self.db.put(&mut wtxn, key, value).map_err(backend)?;
        wtxn.commit().map_err(backend)?;
        self.bloom_add(key);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        self.db.delete(&mut wtxn, key).map_err(backend)?;
        wtxn.commit().map_err(backend)?;
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        for op in &batch.ops {
            match op {
                BatchOp::Put { key, value } => {
                    self.db.put(&mut wtxn, key, value).map_err(backend)?;
                }
                BatchOp::Delete { key } => {
                    self.db.delete(&mut wtxn, key).map_err(backend)?;
                }
            }
        }
        wtxn.commit().map_err(backend)?;
        for op in &batch.ops {
            if let BatchOp::Put { key, .. } = op {
                self.bloom_add(key);
            }
        }
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let rtxn = self.env.read_txn().map_err(backend)?;
        let iter = self.db.prefix_iter(&rtxn, prefix).map_err(backend)?;
        let mut out = Vec::new();
        for entry in iter {
            let (key, value) = entry.map_err(backend)?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}
