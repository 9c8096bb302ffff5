// Copyright (c) 2025 Crest Developers

//! The unconfirmed transaction pool: a bounded buffer drained best-fee-first
//! by the miner and pruned by the block applier once transactions are
//! confirmed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::crypto::Digest;
use crate::proto::Transaction;

pub const DEFAULT_UTX_CAPACITY: usize = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UtxError {
    #[error("transaction is already pooled")]
    Duplicate,
    #[error("pool is full")]
    Full,
}

pub struct UtxPool {
    capacity: usize,
    txs: HashMap<Digest, Transaction>,
}

impl UtxPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            txs: HashMap::new(),
        }
    }

    pub fn add(&mut self, tx: Transaction) -> Result<Digest, UtxError> {
        let id = tx.id();
        if self.txs.contains_key(&id) {
            return Err(UtxError::Duplicate);
        }
        if self.txs.len() >= self.capacity {
            return Err(UtxError::Full);
        }
        self.txs.insert(id, tx);
        Ok(id)
    }

    /// Remove and return the best candidate: highest fee, ties broken by id
    /// so extraction order is deterministic.
    pub fn pop_highest_fee(&mut self) -> Option<Transaction> {
        let id = *self
            .txs
            .iter()
            .max_by(|(a_id, a), (b_id, b)| a.fee().cmp(&b.fee()).then(a_id.cmp(b_id)))
            .map(|(id, _)| id)?;
        self.txs.remove(&id)
    }

    pub fn remove(&mut self, id: &Digest) -> Option<Transaction> {
        self.txs.remove(id)
    }

    pub fn contains(&self, id: &Digest) -> bool {
        self.txs.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

pub type SharedUtx = Arc<Mutex<UtxPool>>;

pub fn shared_utx(capacity: usize) -> SharedUtx {
    Arc::new(Mutex::new(UtxPool::new(capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Address, KeyPair};
    use crate::proto::{Recipient, TransferTx, TxVersion};

    fn transfer(tag: u8, fee: u64) -> Transaction {
        let kp = KeyPair::from_seed([tag; 32]);
        Transaction::Transfer {
            version: TxVersion::V2,
            tx: TransferTx {
                sender_pk: kp.public(),
                recipient: Recipient::Address(Address::from_public_key(b'T', &kp.public())),
                amount_asset: None,
                fee_asset: None,
                amount: 10,
                fee,
                timestamp: tag as u64,
                attachment: Vec::new(),
            },
        }
    }

    #[test]
    fn add_rejects_duplicates_and_overflow() {
        let mut pool = UtxPool::new(2);
        let tx = transfer(1, 5);
        pool.add(tx.clone()).unwrap();
        assert_eq!(pool.add(tx), Err(UtxError::Duplicate));

        pool.add(transfer(2, 5)).unwrap();
        assert_eq!(pool.add(transfer(3, 5)), Err(UtxError::Full));
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn pop_returns_highest_fee_first() {
        let mut pool = UtxPool::new(10);
        pool.add(transfer(1, 5)).unwrap();
        pool.add(transfer(2, 50)).unwrap();
        pool.add(transfer(3, 20)).unwrap();

        assert_eq!(pool.pop_highest_fee().unwrap().fee(), 50);
        assert_eq!(pool.pop_highest_fee().unwrap().fee(), 20);
        assert_eq!(pool.pop_highest_fee().unwrap().fee(), 5);
        assert!(pool.pop_highest_fee().is_none());
    }

    #[test]
    fn remove_by_id() {
        let mut pool = UtxPool::new(10);
        let tx = transfer(1, 5);
        let id = pool.add(tx.clone()).unwrap();
        assert!(pool.contains(&id));
        assert_eq!(pool.remove(&id), Some(tx));
        assert!(pool.is_empty());
    }
}
