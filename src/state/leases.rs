// Copyright (c) 2025 Crest Developers

//! Lease records. A lease is created active, becomes inactive on
//! cancellation, and rollback restores whichever record preceded the
//! dropped one.

use crate::crypto::{Address, Digest, ADDRESS_SIZE};
use crate::state::history::Entity;
use crate::state::keys::LeaseKey;
use crate::state::state_db::BlockNum;
use crate::state::{Height, SharedHistory, StateError};

pub const LEASING_RECORD_SIZE: usize = 1 + ADDRESS_SIZE + ADDRESS_SIZE + 8 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseInfo {
    pub is_active: bool,
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub height: Height,
}

fn encode_record(info: &LeaseInfo, block_num: BlockNum) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LEASING_RECORD_SIZE);
    buf.push(u8::from(info.is_active));
    buf.extend_from_slice(info.sender.as_bytes());
    buf.extend_from_slice(info.recipient.as_bytes());
    buf.extend_from_slice(&info.amount.to_be_bytes());
    buf.extend_from_slice(&info.height.to_be_bytes());
    buf.extend_from_slice(&block_num.to_be_bytes());
    buf
}

fn decode_record(record: &[u8]) -> Result<LeaseInfo, StateError> {
    if record.len() != LEASING_RECORD_SIZE {
        return Err(StateError::Deserialization(
            "bad leasing record size".to_string(),
        ));
    }
    let sender = Address::from_bytes(&record[1..1 + ADDRESS_SIZE])
        .ok_or_else(|| StateError::Deserialization("bad lease sender address".to_string()))?;
    let recipient = Address::from_bytes(&record[1 + ADDRESS_SIZE..1 + 2 * ADDRESS_SIZE])
        .ok_or_else(|| StateError::Deserialization("bad lease recipient address".to_string()))?;
    let amount_off = 1 + 2 * ADDRESS_SIZE;
    Ok(LeaseInfo {
        is_active: record[0] == 1,
        sender,
        recipient,
        amount: u64::from_be_bytes(record[amount_off..amount_off + 8].try_into().unwrap()),
        height: Height::from_be_bytes(
            record[amount_off + 8..amount_off + 16].try_into().unwrap(),
        ),
    })
}

#[derive(Clone)]
pub struct Leases {
    hs: SharedHistory,
}

impl Leases {
    pub fn new(hs: SharedHistory) -> Self {
        Self { hs }
    }

    pub fn add_lease(
        &self,
        lease_id: Digest,
        info: &LeaseInfo,
        block_num: BlockNum,
    ) -> Result<(), StateError> {
        let mut hs = self.hs.write().expect("history lock");
        hs.set(
            Entity::Lease,
            &LeaseKey { lease_id }.bytes(),
            &encode_record(info, block_num),
        )
    }

    /// Deactivate a lease, failing on unknown or already-cancelled ids.
    pub fn cancel_lease(
        &self,
        lease_id: Digest,
        block_num: BlockNum,
        filter: bool,
    ) -> Result<(), StateError> {
        let mut info = self.newest_leasing_info(lease_id, filter)?;
        if !info.is_active {
            return Err(StateError::TxValidation(format!(
                "lease {lease_id} is already cancelled"
            )));
        }
        info.is_active = false;
        let mut hs = self.hs.write().expect("history lock");
        hs.set(
            Entity::Lease,
            &LeaseKey { lease_id }.bytes(),
            &encode_record(&info, block_num),
        )
    }

    pub fn newest_leasing_info(
        &self,
        lease_id: Digest,
        filter: bool,
    ) -> Result<LeaseInfo, StateError> {
        let hs = self.hs.read().expect("history lock");
        let record = hs.get_fresh(Entity::Lease, &LeaseKey { lease_id }.bytes(), filter)?;
        decode_record(&record)
    }

    pub fn leasing_info(&self, lease_id: Digest, filter: bool) -> Result<LeaseInfo, StateError> {
        let hs = self.hs.read().expect("history lock");
        let record = hs.get(Entity::Lease, &LeaseKey { lease_id }.bytes(), filter)?;
        decode_record(&record)
    }
}
