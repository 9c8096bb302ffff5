// Copyright (c) 2025 Crest Developers

//! Fork choice. An incoming block is adopted only when it extends the chain
//! to a strictly higher cumulative score; adopting a fork rolls back to the
//! fork point (bounded by the configured depth) and restores the saved
//! blocks if the new one fails to apply.

use std::sync::{Arc, RwLock};

use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network::{broadcast_score, PeerManager};
use crate::node::interrupt::MinerInterrupter;
use crate::node::utx::SharedUtx;
use crate::proto::Block;
use crate::state::{calculate_score, Height, State, StateError};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("block already exists")]
    Duplicate,
    #[error("parent block not found")]
    Orphan,
    #[error("block score is not higher than the current chain")]
    LowScore,
    #[error("rollback of {delta} blocks exceeds the cap of {max}")]
    TooDeepRollback { delta: u64, max: u64 },
    #[error(transparent)]
    State(#[from] StateError),
}

pub struct BlockApplier<S: State> {
    state: Arc<RwLock<S>>,
    peers: Arc<dyn PeerManager>,
    interrupter: Arc<MinerInterrupter>,
    utx: SharedUtx,
    tip_changed: Sender<()>,
    max_rollback_depth: u64,
    magic: u32,
}

impl<S: State> BlockApplier<S> {
    pub fn new(
        state: Arc<RwLock<S>>,
        peers: Arc<dyn PeerManager>,
        interrupter: Arc<MinerInterrupter>,
        utx: SharedUtx,
        tip_changed: Sender<()>,
        max_rollback_depth: u64,
        magic: u32,
    ) -> Self {
        Self {
            state,
            peers,
            interrupter,
            utx,
            tip_changed,
            max_rollback_depth,
            magic,
        }
    }

    pub fn apply_bytes(&self, bytes: &[u8]) -> Result<Height, ApplyError> {
        let block = Block::unmarshal_binary(bytes)
            .map_err(|e| StateError::Deserialization(format!("block: {e}")))?;
        self.apply(&block)
    }

    /// Run fork choice for one block. The miner is interrupted before the
    /// state lock is taken; after success the UTX pool is pruned, the
    /// scheduler is notified and the new score goes out to all peers.
    pub fn apply(&self, block: &Block) -> Result<Height, ApplyError> {
        self.interrupter.interrupt();
        let mut state = self.state.write().expect("state lock");

        let height = Self::apply_inner(&mut *state, block, self.max_rollback_depth)?;

        {
            let mut utx = self.utx.lock().expect("utx lock");
            for tx in &block.transactions {
                utx.remove(&tx.id());
            }
        }
        let score = state.current_score()?;
        drop(state);

        info!(height, block = %block.id(), score = %score, "chain advanced");
        let _ = self.tip_changed.send(());
        broadcast_score(self.peers.as_ref(), self.magic, &score);
        Ok(height)
    }

    fn apply_inner(state: &mut S, block: &Block, max_depth: u64) -> Result<Height, ApplyError> {
        if state.contains_block(&block.id()) {
            return Err(ApplyError::Duplicate);
        }
        let current_height = state.height();
        let current_score = state.current_score()?;

        let parent_height = state.height_of_block(&block.parent).map_err(|e| {
            if e.is_not_found() {
                ApplyError::Orphan
            } else {
                ApplyError::State(e)
            }
        })?;

        let block_score = calculate_score(block.consensus.base_target).map_err(ApplyError::State)?;
        let parent_score = state.score_at_height(parent_height)?;
        let new_score = block_score + parent_score;
        // Strict: a fork of equal score is never adopted.
        if new_score <= current_score {
            return Err(ApplyError::LowScore);
        }

        if parent_height == current_height {
            return Ok(state.add_block(block)?);
        }

        let delta = current_height - parent_height;
        if delta > max_depth {
            return Err(ApplyError::TooDeepRollback {
                delta,
                max: max_depth,
            });
        }

        // Save the blocks we are about to drop; they go back in if the new
        // block fails to apply.
        let mut saved = Vec::with_capacity(delta as usize);
        for height in (parent_height + 1)..=current_height {
            saved.push(state.block_by_height(height)?);
        }
        debug!(
            fork_point = parent_height,
            dropped = saved.len(),
            "rolling back to adopt a better fork"
        );
        state.rollback_to_height(parent_height)?;

        match state.add_block(block) {
            Ok(height) => Ok(height),
            Err(e) => {
                warn!(block = %block.id(), error = %e, "fork block failed, restoring saved blocks");
                for saved_block in &saved {
                    state.add_block(saved_block)?;
                }
                Err(ApplyError::State(e))
            }
        }
    }
}
