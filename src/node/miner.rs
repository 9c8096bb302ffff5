// Copyright (c) 2025 Crest Developers

//! The miner. Receives scheduled proposals, drains the UTX pool into a
//! candidate block, signs it and hands it to the block applier. The
//! interrupter is checked between transactions during assembly; once the
//! signal is observed the candidate is dropped and its transactions go
//! back to the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::node::applier::BlockApplier;
use crate::node::interrupt::MinerInterrupter;
use crate::node::scheduler::MineProposal;
use crate::node::utx::SharedUtx;
use crate::crypto::BlockSignature;
use crate::proto::{Block, NxtConsensus, Transaction, BLOCK_VERSION};
use crate::state::{State, StateManager};

pub struct Miner {
    state: Arc<RwLock<StateManager>>,
    applier: Arc<BlockApplier<StateManager>>,
    utx: SharedUtx,
    interrupter: Arc<MinerInterrupter>,
    max_transactions: usize,
    shutdown: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(
        state: Arc<RwLock<StateManager>>,
        applier: Arc<BlockApplier<StateManager>>,
        utx: SharedUtx,
        interrupter: Arc<MinerInterrupter>,
        max_transactions: usize,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            applier,
            utx,
            interrupter,
            max_transactions,
            shutdown,
        }
    }

    pub fn run(&self, proposals: Receiver<MineProposal>) {
        info!("miner started");
        while !self.shutdown.load(Ordering::Relaxed) {
            match proposals.recv_timeout(Duration::from_millis(500)) {
                Ok(proposal) => self.mint(proposal),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("miner stopped");
    }

    fn mint(&self, proposal: MineProposal) {
        // Consume any stale edge, then make sure the proposal still targets
        // the tip: the interrupt contract requires re-reading it.
        self.interrupter.take();
        {
            let state = self.state.read().expect("state lock");
            let top = match state.block_id_at(state.height()) {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "cannot read tip, dropping proposal");
                    return;
                }
            };
            if top != proposal.parent {
                debug!("tip moved since scheduling, dropping proposal");
                return;
            }
        }

        let Some(transactions) = self.collect_transactions() else {
            debug!("assembly interrupted, candidate dropped");
            return;
        };

        let mut block = Block {
            version: BLOCK_VERSION,
            timestamp: unix_now_secs(),
            parent: proposal.parent,
            consensus: NxtConsensus {
                base_target: proposal.base_target,
                generation_signature: proposal.generation_signature,
            },
            features: Vec::new(),
            transactions,
            generator: proposal.key_pair.public(),
            signature: BlockSignature::ZERO,
        };
        block.sign(&proposal.key_pair);

        if self.interrupter.take() {
            debug!("interrupted before submission, candidate dropped");
            self.return_to_pool(block.transactions);
            return;
        }

        match self.applier.apply(&block) {
            Ok(height) => {
                info!(height, block = %block.id(), txs = block.transactions.len(), "minted block");
            }
            Err(e) => {
                warn!(error = %e, "minted block was rejected");
                self.return_to_pool(block.transactions);
            }
        }
    }

    /// Drain the pool best-fee-first, checking the interrupter and the
    /// shutdown flag between transactions. `None` means the candidate was
    /// abandoned and the drained transactions were returned.
    fn collect_transactions(&self) -> Option<Vec<Transaction>> {
        let mut transactions = Vec::new();
        let mut utx = self.utx.lock().expect("utx lock");
        while transactions.len() < self.max_transactions {
            if self.interrupter.take() || self.shutdown.load(Ordering::Relaxed) {
                for tx in transactions {
                    let _ = utx.add(tx);
                }
                return None;
            }
            match utx.pop_highest_fee() {
                Some(tx) => transactions.push(tx),
                None => break,
            }
        }
        Some(transactions)
    }

    fn return_to_pool(&self, transactions: Vec<Transaction>) {
        let mut utx = self.utx.lock().expect("utx lock");
        for tx in transactions {
            let _ = utx.add(tx);
        }
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
