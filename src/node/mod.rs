// Copyright (c) 2025 Crest Developers

//! Node assembly: opens the state, wires the applier, scheduler, miner and
//! UTX pool together and owns the worker threads.

pub mod applier;
pub mod interrupt;
pub mod miner;
pub mod scheduler;
pub mod utx;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use num_bigint::BigUint;
use tracing::info;

use crate::config::Config;
use crate::crypto::Digest;
use crate::network::PeerManager;
use crate::node::applier::{ApplyError, BlockApplier};
use crate::node::interrupt::MinerInterrupter;
use crate::node::miner::Miner;
use crate::node::scheduler::MiningScheduler;
use crate::node::utx::{shared_utx, SharedUtx, UtxError};
use crate::proto::Block;
use crate::settings::BlockchainSettings;
use crate::state::{Height, State, StateManager};

pub struct Node {
    config: Config,
    settings: Arc<BlockchainSettings>,
    state: Arc<RwLock<StateManager>>,
    utx: SharedUtx,
    interrupter: Arc<MinerInterrupter>,
    applier: Arc<BlockApplier<StateManager>>,
    shutdown: Arc<AtomicBool>,
    tip_tx: Sender<()>,
    tip_rx: Option<Receiver<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl Node {
    pub fn new(config: Config, peers: Arc<dyn PeerManager>) -> Result<Self> {
        let settings = Arc::new(config.blockchain_settings());
        let state = StateManager::open(
            &config.storage.path,
            settings.clone(),
            config.storage.bloom_params(),
        )
        .context("failed to open state")?;
        let state = Arc::new(RwLock::new(state));

        let utx = shared_utx(config.mining.utx_capacity);
        let interrupter = Arc::new(MinerInterrupter::new());
        let (tip_tx, tip_rx) = unbounded();
        let applier = Arc::new(BlockApplier::new(
            state.clone(),
            peers,
            interrupter.clone(),
            utx.clone(),
            tip_tx.clone(),
            config.network.max_rollback_depth,
            settings.magic,
        ));

        Ok(Self {
            config,
            settings,
            state,
            utx,
            interrupter,
            applier,
            shutdown: Arc::new(AtomicBool::new(false)),
            tip_tx,
            tip_rx: Some(tip_rx),
            handles: Vec::new(),
        })
    }

    /// Spawn the scheduler and miner threads when mining is configured.
    pub fn start(&mut self) -> Result<()> {
        let key_pairs = self.config.mining.key_pairs()?;
        if !self.config.mining.enabled || key_pairs.is_empty() {
            info!("mining disabled, running as a relay");
            return Ok(());
        }

        let tip_rx = self
            .tip_rx
            .take()
            .context("node was already started")?;
        let (proposal_tx, proposal_rx) = bounded(1);

        let scheduler = MiningScheduler::new(
            self.state.clone(),
            key_pairs,
            self.settings.clone(),
            self.shutdown.clone(),
        );
        self.handles.push(
            std::thread::Builder::new()
                .name("mining-scheduler".to_string())
                .spawn(move || scheduler.run(tip_rx, proposal_tx))
                .context("failed to spawn scheduler thread")?,
        );

        let miner = Miner::new(
            self.state.clone(),
            self.applier.clone(),
            self.utx.clone(),
            self.interrupter.clone(),
            self.config.mining.max_transactions_per_block,
            self.shutdown.clone(),
        );
        self.handles.push(
            std::thread::Builder::new()
                .name("miner".to_string())
                .spawn(move || miner.run(proposal_rx))
                .context("failed to spawn miner thread")?,
        );
        Ok(())
    }

    /// A block arriving from the network.
    pub fn submit_block(&self, block: &Block) -> Result<Height, ApplyError> {
        self.applier.apply(block)
    }

    pub fn submit_block_bytes(&self, bytes: &[u8]) -> Result<Height, ApplyError> {
        self.applier.apply_bytes(bytes)
    }

    /// A transaction arriving from the network or the RPC surface.
    pub fn submit_transaction(&self, tx: crate::proto::Transaction) -> Result<Digest, UtxError> {
        self.utx.lock().expect("utx lock").add(tx)
    }

    pub fn height(&self) -> Height {
        self.state.read().expect("state lock").height()
    }

    pub fn current_score(&self) -> Result<BigUint, crate::state::StateError> {
        self.state.read().expect("state lock").current_score()
    }

    pub fn utx_size(&self) -> usize {
        self.utx.lock().expect("utx lock").size()
    }

    pub fn state(&self) -> Arc<RwLock<StateManager>> {
        self.state.clone()
    }

    /// Stop every worker. The scheduler cancels its pending wake-up, the
    /// miner abandons its candidate, and the state (flushed per block) is
    /// left consistent.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.interrupter.interrupt();
        drop(self.tip_tx);
        drop(self.tip_rx.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        info!("node stopped");
    }
}
