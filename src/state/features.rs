// Copyright (c) 2025 Crest Developers

//! Feature voting. Generators vote for feature ids in their block headers;
//! votes are counted over fixed-size windows and a feature whose tally
//! reaches the threshold is activated at the window boundary. Activation
//! feeds consensus rules such as the NG fee split.

use crate::state::history::Entity;
use crate::state::keys::{ActivatedFeatureKey, FeatureVoteKey};
use crate::state::state_db::BlockNum;
use crate::state::{Height, SharedHistory, StateError};

/// Fee-split feature: once active the miner keeps 40% of each fee.
pub const NG_FEATURE_ID: u16 = 2;

pub const FEATURE_VOTE_RECORD_SIZE: usize = 8 + 4;
pub const ACTIVATED_FEATURE_RECORD_SIZE: usize = 8 + 4;

fn encode_u64_record(value: u64, block_num: BlockNum) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&value.to_be_bytes());
    buf.extend_from_slice(&block_num.to_be_bytes());
    buf
}

fn decode_u64_record(record: &[u8]) -> Result<u64, StateError> {
    if record.len() != 12 {
        return Err(StateError::Deserialization(
            "bad feature record size".to_string(),
        ));
    }
    Ok(u64::from_be_bytes(record[0..8].try_into().unwrap()))
}

#[derive(Clone)]
pub struct Features {
    hs: SharedHistory,
    activation_window: Height,
    activation_threshold: u64,
}

impl Features {
    pub fn new(hs: SharedHistory, activation_window: Height, activation_threshold: u64) -> Self {
        Self {
            hs,
            activation_window,
            activation_threshold,
        }
    }

    /// Record one generator vote for `feature_id`.
    pub fn add_vote(&self, feature_id: u16, block_num: BlockNum) -> Result<(), StateError> {
        let votes = self.votes(feature_id)? + 1;
        let mut hs = self.hs.write().expect("history lock");
        hs.set(
            Entity::FeatureVote,
            &FeatureVoteKey { feature_id }.bytes(),
            &encode_u64_record(votes, block_num),
        )
    }

    pub fn votes(&self, feature_id: u16) -> Result<u64, StateError> {
        let hs = self.hs.read().expect("history lock");
        match hs.get_fresh(Entity::FeatureVote, &FeatureVoteKey { feature_id }.bytes(), true) {
            Ok(record) => decode_u64_record(&record),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn is_activated(&self, feature_id: u16) -> Result<bool, StateError> {
        let hs = self.hs.read().expect("history lock");
        match hs.get_fresh(
            Entity::ActivatedFeature,
            &ActivatedFeatureKey { feature_id }.bytes(),
            true,
        ) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn activation_height(&self, feature_id: u16) -> Result<Option<Height>, StateError> {
        let hs = self.hs.read().expect("history lock");
        match hs.get_fresh(
            Entity::ActivatedFeature,
            &ActivatedFeatureKey { feature_id }.bytes(),
            true,
        ) {
            Ok(record) => Ok(Some(decode_u64_record(&record)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Feature ids with a vote history, from storage and the overlay.
    pub fn voted_features(&self) -> Result<Vec<u16>, StateError> {
        let hs = self.hs.read().expect("history lock");
        let keys = hs.keys_with_prefix(&[crate::state::keys::FEATURE_VOTE_KEY_PREFIX])?;
        keys.into_iter()
            .map(|key| {
                let body: [u8; 2] = key[1..]
                    .try_into()
                    .map_err(|_| StateError::Deserialization("bad feature vote key".to_string()))?;
                Ok(u16::from_be_bytes(body))
            })
            .collect()
    }

    /// Close the voting window ending at `height`: activate features whose
    /// tally reached the threshold and reset all tallies.
    pub fn finish_voting_window(
        &self,
        height: Height,
        block_num: BlockNum,
    ) -> Result<(), StateError> {
        if height % self.activation_window != 0 {
            return Ok(());
        }
        let voted_features = self.voted_features()?;
        for feature_id in voted_features {
            let votes = self.votes(feature_id)?;
            if votes >= self.activation_threshold && !self.is_activated(feature_id)? {
                let mut hs = self.hs.write().expect("history lock");
                hs.set(
                    Entity::ActivatedFeature,
                    &ActivatedFeatureKey { feature_id }.bytes(),
                    &encode_u64_record(height, block_num),
                )?;
            }
            if votes > 0 {
                let mut hs = self.hs.write().expect("history lock");
                hs.set(
                    Entity::FeatureVote,
                    &FeatureVoteKey { feature_id }.bytes(),
                    &encode_u64_record(0, block_num),
                )?;
            }
        }
        Ok(())
    }
}
