// Copyright (c) 2025 Crest Developers

//! Alias-to-address registrations, with history so rollback restores the
//! prior mapping.

use crate::crypto::{Address, ADDRESS_SIZE};
use crate::state::history::Entity;
use crate::state::keys::AliasKey;
use crate::state::state_db::BlockNum;
use crate::state::{SharedHistory, StateError};

pub const ALIAS_RECORD_SIZE: usize = ADDRESS_SIZE + 4;

fn encode_record(address: &Address, block_num: BlockNum) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ALIAS_RECORD_SIZE);
    buf.extend_from_slice(address.as_bytes());
    buf.extend_from_slice(&block_num.to_be_bytes());
    buf
}

fn decode_record(record: &[u8]) -> Result<Address, StateError> {
    if record.len() != ALIAS_RECORD_SIZE {
        return Err(StateError::Deserialization(
            "bad alias record size".to_string(),
        ));
    }
    Address::from_bytes(&record[..ADDRESS_SIZE])
        .ok_or_else(|| StateError::Deserialization("bad alias address".to_string()))
}

#[derive(Clone)]
pub struct Aliases {
    hs: SharedHistory,
}

impl Aliases {
    pub fn new(hs: SharedHistory) -> Self {
        Self { hs }
    }

    /// Register an alias. An alias already pointing at an address may not
    /// be re-registered.
    pub fn create_alias(
        &self,
        alias: &str,
        address: &Address,
        block_num: BlockNum,
    ) -> Result<(), StateError> {
        match self.newest_addr_by_alias(alias, true) {
            Ok(_) => {
                return Err(StateError::TxValidation(format!(
                    "alias {alias:?} is already taken"
                )))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let mut hs = self.hs.write().expect("history lock");
        hs.set(
            Entity::Alias,
            &AliasKey { alias }.bytes(),
            &encode_record(address, block_num),
        )
    }

    pub fn newest_addr_by_alias(&self, alias: &str, filter: bool) -> Result<Address, StateError> {
        let hs = self.hs.read().expect("history lock");
        let record = hs.get_fresh(Entity::Alias, &AliasKey { alias }.bytes(), filter)?;
        decode_record(&record)
    }

    pub fn addr_by_alias(&self, alias: &str, filter: bool) -> Result<Address, StateError> {
        let hs = self.hs.read().expect("history lock");
        let record = hs.get(Entity::Alias, &AliasKey { alias }.bytes(), filter)?;
        decode_record(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BlockSignature, KeyPair};
    use crate::keyvalue::{KeyValue, KvStore};
    use crate::state::history::HistoryStorage;
    use crate::state::state_db::StateDb;
    use std::sync::{Arc, RwLock};
    use tempfile::tempdir;

    fn address(tag: u8) -> Address {
        Address::from_public_key(b'T', &KeyPair::from_seed([tag; 32]).public())
    }

    #[test]
    fn register_and_resolve() {
        let dir = tempdir().unwrap();
        let kv: Arc<dyn KeyValue> = Arc::new(KvStore::open(dir.path(), None).unwrap());
        let mut db = StateDb::open(kv.clone()).unwrap();
        let hs = Arc::new(RwLock::new(HistoryStorage::new(kv.clone(), db.block_index())));
        let aliases = Aliases::new(hs.clone());

        let num = db.register_block(BlockSignature([1; 64]), 1);
        let addr = address(1);
        aliases.create_alias("merchant", &addr, num).unwrap();
        assert_eq!(aliases.newest_addr_by_alias("merchant", true).unwrap(), addr);

        // Taken aliases are rejected.
        let err = aliases.create_alias("merchant", &address(2), num).unwrap_err();
        assert!(matches!(err, StateError::TxValidation(_)));

        // Unknown aliases are a typed negative.
        let err = aliases.newest_addr_by_alias("nobody", true).unwrap_err();
        assert!(err.is_not_found());
    }
}
