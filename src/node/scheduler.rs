// Copyright (c) 2025 Crest Developers

//! The mining scheduler. For every configured key pair it computes whether
//! and when the node may mint on top of the current tip: a deterministic
//! hit drawn from the generation signature must fall under a target that
//! grows with the base target, the generator's effective balance at the
//! snapshot depth, and the time elapsed since the parent block. All key
//! pairs multiplex onto one timer; the earliest eligible pair wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::crypto::{digest, Address, BlockSignature, Digest, KeyPair, PublicKey};
use crate::settings::BlockchainSettings;
use crate::state::{Height, State, StateError, StateManager};

/// A scheduled minting attempt handed to the miner.
#[derive(Clone)]
pub struct MineProposal {
    pub key_pair: KeyPair,
    pub parent: BlockSignature,
    pub parent_height: Height,
    pub base_target: u64,
    pub generation_signature: Digest,
}

/// The generator's hit: the first eight bytes of the digest over the
/// parent's generation signature and the generator key.
pub fn generator_hit(generation_signature: &Digest, pk: &PublicKey) -> u64 {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(generation_signature.as_bytes());
    data.extend_from_slice(pk.as_bytes());
    let d = digest(&data);
    u64::from_be_bytes(d.0[0..8].try_into().unwrap())
}

/// The smallest number of seconds since the parent block after which
/// `hit < base_target * elapsed * balance` holds. `None` when the account
/// can never become eligible.
pub fn mint_delay_secs(hit: u64, base_target: u64, balance: u64) -> Option<u64> {
    if base_target == 0 || balance == 0 {
        return None;
    }
    let denominator = base_target as u128 * balance as u128;
    let delay = hit as u128 / denominator + 1;
    u64::try_from(delay).ok()
}

/// Base target for the next block, derived from the spacing of the two
/// preceding blocks, damped to 10% per step and bounded by the maximum.
pub fn recalculate_base_target(
    prev_base_target: u64,
    parent_spacing_secs: Option<u64>,
    average_delay_secs: u64,
    max_base_target: u64,
) -> u64 {
    let Some(observed) = parent_spacing_secs else {
        return prev_base_target.min(max_base_target);
    };
    let observed = observed.max(1);
    let scaled =
        (prev_base_target as u128 * observed as u128 / average_delay_secs.max(1) as u128) as u64;
    let step_down = prev_base_target - prev_base_target / 10;
    let step_up = prev_base_target + (prev_base_target / 10).max(1);
    scaled.clamp(step_down.max(1), step_up).min(max_base_target)
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct MiningScheduler {
    state: Arc<RwLock<StateManager>>,
    key_pairs: Vec<KeyPair>,
    settings: Arc<BlockchainSettings>,
    shutdown: Arc<AtomicBool>,
}

impl MiningScheduler {
    pub fn new(
        state: Arc<RwLock<StateManager>>,
        key_pairs: Vec<KeyPair>,
        settings: Arc<BlockchainSettings>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            key_pairs,
            settings,
            shutdown,
        }
    }

    /// The earliest minting attempt across the key pairs at the current
    /// tip. A zero wait means the winning pair is eligible right now.
    pub fn next_attempt(&self) -> Result<Option<(Duration, MineProposal)>, StateError> {
        let state = self.state.read().expect("state lock");
        let height = state.height();
        let top = state.top_block()?;
        let parent_spacing = if height >= 2 {
            let previous = state.block_by_height(height - 1)?;
            Some(top.timestamp.saturating_sub(previous.timestamp))
        } else {
            None
        };

        let next_base_target = recalculate_base_target(
            top.consensus.base_target,
            parent_spacing,
            self.settings.average_block_delay_secs,
            self.settings.max_base_target,
        );

        let now = unix_now_secs();
        let mut best: Option<(u64, MineProposal)> = None;
        for key_pair in &self.key_pairs {
            let address =
                Address::from_public_key(self.settings.address_scheme, &key_pair.public());
            let balance = state.generating_balance(&address, height)?;
            let hit = generator_hit(&top.consensus.generation_signature, &key_pair.public());
            let Some(delay) = mint_delay_secs(hit, top.consensus.base_target, balance) else {
                debug!(%address, "key pair has no generating balance");
                continue;
            };
            let wake_at = top.timestamp.saturating_add(delay);
            let wait = wake_at.saturating_sub(now);
            if best.as_ref().map(|(w, _)| wait < *w).unwrap_or(true) {
                best = Some((
                    wait,
                    MineProposal {
                        key_pair: key_pair.clone(),
                        parent: top.id(),
                        parent_height: height,
                        base_target: next_base_target,
                        generation_signature: top
                            .consensus
                            .next_generation_signature(&key_pair.public()),
                    },
                ));
            }
        }
        Ok(best.map(|(wait, proposal)| (Duration::from_secs(wait), proposal)))
    }

    /// Timer loop: sleeps until the next computed wake-up, recomputing
    /// whenever the tip changes. When the timer fires the winning proposal
    /// is handed to the miner.
    pub fn run(&self, tip_changed: Receiver<()>, proposals: Sender<MineProposal>) {
        info!(key_pairs = self.key_pairs.len(), "mining scheduler started");
        let retry = Duration::from_secs(self.settings.average_block_delay_secs.max(1));
        while !self.shutdown.load(Ordering::Relaxed) {
            let attempt = match self.next_attempt() {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!(error = %e, "failed to compute mining schedule");
                    None
                }
            };
            let wait = match attempt {
                Some((wait, proposal)) if wait.is_zero() => {
                    if proposals.send(proposal).is_err() {
                        break;
                    }
                    // Wait for the tip to move (or a retry window to pass)
                    // before scheduling again.
                    retry
                }
                Some((wait, _)) => wait,
                None => retry,
            };
            // Sleep in bounded slices so shutdown is always observed.
            match tip_changed.recv_timeout(wait.min(Duration::from_secs(1))) {
                Ok(()) => {
                    // Tip changed: drain coalesced notifications, recompute.
                    while tip_changed.try_recv().is_ok() {}
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("mining scheduler stopped");
    }
}
