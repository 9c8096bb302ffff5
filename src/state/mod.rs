// Copyright (c) 2025 Crest Developers

//! The ledger state engine: an append-only, rollback-capable state built
//! from cooperating services (balances, assets, leases, aliases, features,
//! the block read-writer and the state db) behind the [`StateManager`]
//! facade. All mutation funnels through the state lock the node wraps
//! around the manager.

pub mod aliases;
pub mod applier;
pub mod assets;
pub mod balances;
pub mod block_rw;
pub mod diff;
pub mod differ;
pub mod features;
pub mod history;
pub mod keys;
pub mod leases;
pub mod state_db;

use std::path::Path;
use std::sync::{Arc, RwLock};

use num_bigint::BigUint;
use num_traits::Zero;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::{Address, BlockSignature, Digest};
use crate::keyvalue::{BloomFilterParams, KeyValue, KvStore, WriteBatch};
use crate::proto::{Block, Transaction};
use crate::settings::BlockchainSettings;

use aliases::Aliases;
use applier::{DiffApplier, TransactionPerformer};
use assets::{AssetInfo, Assets};
use balances::Balances;
use block_rw::BlockReadWriter;
use diff::{BalanceProfile, BlockDiff};
use differ::{DifferInfo, TransactionDiffer};
use features::Features;
use history::HistoryStorage;
use keys::ScoreKey;
use leases::Leases;
use state_db::StateDb;

pub type Height = u64;

pub type SharedHistory = Arc<RwLock<HistoryStorage>>;

/// A state manager behind the process-wide state lock.
pub type SharedState = Arc<RwLock<StateManager>>;

/// Error taxonomy of the state engine.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("not found")]
    NotFound,
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("transaction validation failed: {0}")]
    TxValidation(String),
    #[error("block validation failed: {0}")]
    BlockValidation(String),
    #[error("rollback failed: {0}")]
    Rollback(String),
    #[error("storage retrieval failed: {0}")]
    Retrieval(String),
    #[error("storage modification failed: {0}")]
    Modification(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("closing storage failed: {0}")]
    Closure(String),
    #[error("internal invariant violated: {0}")]
    Other(String),
}

impl StateError {
    /// Absent keys are a typed negative result, not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound)
    }
}

/// `score(block) = 2^64 / base_target`.
pub fn calculate_score(base_target: u64) -> Result<BigUint, StateError> {
    if base_target == 0 {
        return Err(StateError::InvalidInput("zero base target".to_string()));
    }
    let numerator = BigUint::from(1u8) << 64;
    Ok(numerator / BigUint::from(base_target))
}

/// The thin state interface the block applier works against.
pub trait State {
    fn height(&self) -> Height;
    fn score_at_height(&self, height: Height) -> Result<BigUint, StateError>;
    fn current_score(&self) -> Result<BigUint, StateError>;
    fn contains_block(&self, id: &BlockSignature) -> bool;
    /// Height of a known block; `NotFound` for orphans.
    fn height_of_block(&self, id: &BlockSignature) -> Result<Height, StateError>;
    fn block_by_height(&self, height: Height) -> Result<Block, StateError>;
    fn add_block(&mut self, block: &Block) -> Result<Height, StateError>;
    fn rollback_to_height(&mut self, height: Height) -> Result<(), StateError>;
}

pub struct StateManager {
    kv: Arc<dyn KeyValue>,
    settings: Arc<BlockchainSettings>,
    state_db: StateDb,
    rw: BlockReadWriter,
    hs: SharedHistory,
    balances: Balances,
    assets: Assets,
    leases: Leases,
    aliases: Aliases,
    features: Features,
    differ: TransactionDiffer,
    performer: TransactionPerformer,
    diff_applier: DiffApplier,
    pending: WriteBatch,
}

impl StateManager {
    /// Open (or create) the state under `dir` and make sure the genesis
    /// block is in place.
    pub fn open(
        dir: &Path,
        settings: Arc<BlockchainSettings>,
        bloom: Option<BloomFilterParams>,
    ) -> Result<Self, StateError> {
        let kv: Arc<dyn KeyValue> = Arc::new(
            KvStore::open(&dir.join("state"), bloom)
                .map_err(|e| StateError::Retrieval(e.to_string()))?,
        );
        let state_db = StateDb::open(kv.clone())?;
        let mut rw = BlockReadWriter::open(kv.clone(), &dir.join("blocks"))?;

        // A crash between the validity flip and the file truncation leaves
        // the files ahead of the db; reconcile on open.
        if rw.height() > state_db.db_height() {
            warn!(
                rw_height = rw.height(),
                db_height = state_db.db_height(),
                "reconciling block files with db height"
            );
            rw.truncate_to(state_db.db_height())?;
        }

        let hs: SharedHistory = Arc::new(RwLock::new(HistoryStorage::new(
            kv.clone(),
            state_db.block_index(),
        )));
        let balances = Balances::new(hs.clone());
        let assets = Assets::new(kv.clone(), hs.clone());
        let leases = Leases::new(hs.clone());
        let aliases = Aliases::new(hs.clone());
        let features = Features::new(
            hs.clone(),
            settings.feature_activation_window,
            settings.feature_activation_threshold,
        );
        let differ = TransactionDiffer::new(
            settings.clone(),
            aliases.clone(),
            leases.clone(),
            features.clone(),
        );
        let performer = TransactionPerformer::new(
            settings.clone(),
            assets.clone(),
            leases.clone(),
            aliases.clone(),
        );
        let diff_applier = DiffApplier::new(balances.clone());

        let mut state = Self {
            kv,
            settings,
            state_db,
            rw,
            hs,
            balances,
            assets,
            leases,
            aliases,
            features,
            differ,
            performer,
            diff_applier,
            pending: WriteBatch::new(),
        };

        if state.height() == 0 {
            let genesis = Block::genesis(
                &state.settings.genesis_transfers,
                state.settings.genesis_timestamp,
                state.settings.initial_base_target,
            );
            info!(block = %genesis.id(), "applying genesis block");
            state.add_block(&genesis)?;
        }
        Ok(state)
    }

    pub fn settings(&self) -> &Arc<BlockchainSettings> {
        &self.settings
    }

    /// Handle onto the backing store, for collaborators persisting into the
    /// shared db (known peers).
    pub fn kv_handle(&self) -> Arc<dyn KeyValue> {
        self.kv.clone()
    }

    pub fn top_block(&self) -> Result<Block, StateError> {
        self.rw.block_by_height(self.height())
    }

    pub fn block_id_at(&self, height: Height) -> Result<BlockSignature, StateError> {
        self.rw.block_id_at(height)
    }

    pub fn transaction_by_id(&self, tx_id: &Digest) -> Result<Transaction, StateError> {
        self.rw.transaction_by_id(tx_id)
    }

    pub fn waves_balance(&self, address: &Address) -> Result<BalanceProfile, StateError> {
        self.balances.waves_profile(address, true)
    }

    pub fn asset_balance(&self, address: &Address, asset: &Digest) -> Result<u64, StateError> {
        self.balances.asset_balance(address, asset, true)
    }

    pub fn asset_info(&self, asset_id: Digest) -> Result<AssetInfo, StateError> {
        self.assets.asset_info(asset_id, true)
    }

    pub fn resolve_alias(&self, alias: &str) -> Result<Address, StateError> {
        self.aliases.addr_by_alias(alias, true)
    }

    pub fn lease_info(&self, lease_id: Digest) -> Result<leases::LeaseInfo, StateError> {
        self.leases.leasing_info(lease_id, true)
    }

    pub fn is_feature_activated(&self, feature_id: u16) -> Result<bool, StateError> {
        self.features.is_activated(feature_id)
    }

    /// The generator's effective balance at the snapshot depth behind
    /// `height`, clamped to zero.
    pub fn generating_balance(
        &self,
        address: &Address,
        height: Height,
    ) -> Result<u64, StateError> {
        let snapshot_height = height.saturating_sub(self.settings.generation_balance_depth).max(1);
        self.balances.effective_balance_at(address, snapshot_height)
    }

    fn stage_score(&mut self, height: Height, base_target: u64) -> Result<(), StateError> {
        let prev = if height == 1 {
            BigUint::zero()
        } else {
            self.score_at_height(height - 1)?
        };
        let score = prev + calculate_score(base_target)?;
        self.pending
            .put(ScoreKey { height }.bytes(), score.to_bytes_be());
        Ok(())
    }

    /// Undo everything staged for the block being applied.
    fn reset_staging(&mut self, block_id: &BlockSignature) -> Result<(), StateError> {
        self.hs.write().expect("history lock").reset();
        self.rw.discard_staged();
        self.state_db.unregister_block(block_id);
        self.state_db.reset_pending()?;
        self.pending = WriteBatch::new();
        Ok(())
    }

    /// Merge every component's staged writes and commit them atomically.
    /// Block files are written (and synced) first so offsets in the batch
    /// never point at missing data.
    fn flush(&mut self) -> Result<(), StateError> {
        let mut batch = self.rw.flush()?;
        let hs_batch = self.hs.write().expect("history lock").flush(true)?;
        batch.extend(hs_batch);
        batch.extend(self.state_db.take_pending());
        batch.extend(std::mem::take(&mut self.pending));
        self.kv
            .write(batch)
            .map_err(|e| StateError::Modification(e.to_string()))
    }

    fn validate_block(&self, block: &Block, height: Height) -> Result<(), StateError> {
        if self.state_db.is_valid_block_id(&block.id()) {
            return Err(StateError::BlockValidation(
                "block already exists".to_string(),
            ));
        }
        if height == 0 {
            if !block.parent.is_zero() {
                return Err(StateError::BlockValidation(
                    "first block must chain from the zero signature".to_string(),
                ));
            }
        } else {
            let top_id = self.rw.block_id_at(height)?;
            if block.parent != top_id {
                return Err(StateError::BlockValidation(format!(
                    "parent {} does not match top block {}",
                    block.parent, top_id
                )));
            }
        }
        if !block.verify_signature() {
            return Err(StateError::BlockValidation(
                "invalid block signature".to_string(),
            ));
        }
        if block.consensus.base_target == 0
            || block.consensus.base_target > self.settings.max_base_target
        {
            return Err(StateError::BlockValidation(format!(
                "base target {} out of bounds",
                block.consensus.base_target
            )));
        }
        Ok(())
    }

    /// Compute, validate and stage every change of the block. Runs between
    /// registration and flush; any error aborts the whole block.
    fn apply_block_changes(&mut self, block: &Block, height: Height) -> Result<(), StateError> {
        let block_num = self.state_db.register_block(block.id(), height);
        self.rw.stage_block(height, block)?;

        let initialisation = block.generator.is_zero();
        let info = DifferInfo {
            initialisation,
            miner_pk: (!initialisation).then_some(block.generator),
            block_time: block.timestamp,
        };

        let mut block_diff = BlockDiff::new();
        for tx in &block.transactions {
            let tx_diff = self.differ.create_diff(tx, &info)?;
            self.performer.perform(tx, block_num, height, initialisation)?;
            block_diff.append_tx_diff(tx_diff)?;
        }
        for (key, diff) in block_diff.iter() {
            self.diff_applier.apply(key, diff, block_num)?;
        }

        for feature_id in &block.features {
            self.features.add_vote(*feature_id, block_num)?;
        }
        self.features.finish_voting_window(height, block_num)?;

        self.stage_score(height, block.consensus.base_target)?;
        self.state_db.set_db_height(height);
        if height == 1 {
            self.state_db.set_rollback_min_height(1);
        }
        Ok(())
    }

    pub fn add_blocks(&mut self, blocks: &[Block]) -> Result<Height, StateError> {
        for block in blocks {
            self.add_block(block)?;
        }
        Ok(self.height())
    }
}

impl State for StateManager {
    fn height(&self) -> Height {
        self.state_db.db_height()
    }

    fn score_at_height(&self, height: Height) -> Result<BigUint, StateError> {
        if height == 0 {
            return Ok(BigUint::zero());
        }
        let bytes = self
            .kv
            .get(&ScoreKey { height }.bytes())
            .map_err(|e| StateError::Retrieval(e.to_string()))?
            .ok_or(StateError::NotFound)?;
        Ok(BigUint::from_bytes_be(&bytes))
    }

    fn current_score(&self) -> Result<BigUint, StateError> {
        self.score_at_height(self.height())
    }

    fn contains_block(&self, id: &BlockSignature) -> bool {
        self.state_db.is_valid_block_id(id)
    }

    fn height_of_block(&self, id: &BlockSignature) -> Result<Height, StateError> {
        if !self.state_db.is_valid_block_id(id) {
            return Err(StateError::NotFound);
        }
        self.rw.height_by_block_id(id).ok_or(StateError::NotFound)
    }

    fn block_by_height(&self, height: Height) -> Result<Block, StateError> {
        self.rw.block_by_height(height)
    }

    /// Apply one block: validate, stage every change, then flush it as one
    /// atomic batch. No partial block is ever observable.
    fn add_block(&mut self, block: &Block) -> Result<Height, StateError> {
        let current = self.height();
        self.validate_block(block, current)?;
        let new_height = current + 1;

        if let Err(e) = self.apply_block_changes(block, new_height) {
            debug!(block = %block.id(), error = %e, "block rejected, dropping staged state");
            self.reset_staging(&block.id())?;
            return Err(e);
        }
        self.flush()?;
        info!(
            height = new_height,
            block = %block.id(),
            txs = block.transactions.len(),
            "block applied"
        );
        Ok(new_height)
    }

    fn rollback_to_height(&mut self, height: Height) -> Result<(), StateError> {
        let current = self.height();
        if height > current {
            return Err(StateError::InvalidInput(format!(
                "cannot roll back to {height}, current height {current}"
            )));
        }
        if height == current {
            return Ok(());
        }
        let min_height = self.state_db.rollback_min_height().max(1);
        if height < min_height {
            return Err(StateError::Rollback(format!(
                "cannot roll back to {height}, minimum height {min_height}"
            )));
        }

        for h in ((height + 1)..=current).rev() {
            let id = self.rw.block_id_at(h)?;
            self.state_db.invalidate_block(&id)?;
            self.pending.delete(ScoreKey { height: h }.bytes());
        }
        self.state_db.set_db_height(height);

        // Validity flips land first; file truncation follows. A crash in
        // between is repaired by the reconcile pass on open.
        let mut batch = self.state_db.take_pending();
        batch.extend(std::mem::take(&mut self.pending));
        self.kv
            .write(batch)
            .map_err(|e| StateError::Modification(e.to_string()))?;
        self.rw.truncate_to(height)?;
        info!(height, from = current, "rolled back");
        Ok(())
    }
}
