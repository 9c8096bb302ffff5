// Copyright (c) 2025 Crest Developers

//! Fork-choice scenarios over the block applier, plus the miner and
//! scheduler wiring around it.

mod common;

use common::*;

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use tempfile::TempDir;

use crest::crypto::BlockSignature;
use crest::network::{Peer, PeerManager};
use crest::node::applier::{ApplyError, BlockApplier};
use crest::node::interrupt::MinerInterrupter;
use crest::node::miner::Miner;
use crest::node::scheduler::{MineProposal, MiningScheduler};
use crest::node::utx::{shared_utx, SharedUtx};
use crest::proto::wire;
use crest::settings::BlockchainSettings;
use crest::state::{State, StateManager};

const INITIAL: u64 = 1_000_000;
const FEE: u64 = 100;
const MINER: u8 = 9;

struct RecordingPeer {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl Peer for RecordingPeer {
    fn id(&self) -> String {
        "test-peer".to_string()
    }

    fn send(&self, message: &[u8]) -> io::Result<()> {
        self.sent.lock().unwrap().push(message.to_vec());
        Ok(())
    }
}

struct RecordingPeers {
    peer: Arc<RecordingPeer>,
}

impl PeerManager for RecordingPeers {
    fn each_connected(&self, f: &mut dyn FnMut(&dyn Peer)) {
        f(self.peer.as_ref());
    }
}

struct Fixture {
    _dir: TempDir,
    settings: Arc<BlockchainSettings>,
    state: Arc<RwLock<StateManager>>,
    applier: Arc<BlockApplier<StateManager>>,
    utx: SharedUtx,
    interrupter: Arc<MinerInterrupter>,
    peer: Arc<RecordingPeer>,
    tip_rx: Receiver<()>,
}

fn fixture(max_rollback_depth: u64, funding: &[(u8, u64)]) -> Fixture {
    let chain = funded_state(funding);
    let settings = chain.settings.clone();
    let state = Arc::new(RwLock::new(chain.state));
    let utx = shared_utx(1000);
    let interrupter = Arc::new(MinerInterrupter::new());
    let peer = Arc::new(RecordingPeer {
        sent: Mutex::new(Vec::new()),
    });
    let peers = Arc::new(RecordingPeers { peer: peer.clone() });
    let (tip_tx, tip_rx) = unbounded();
    let applier = Arc::new(BlockApplier::new(
        state.clone(),
        peers,
        interrupter.clone(),
        utx.clone(),
        tip_tx,
        max_rollback_depth,
        settings.magic,
    ));
    Fixture {
        _dir: chain.dir,
        settings,
        state,
        applier,
        utx,
        interrupter,
        peer,
        tip_rx,
    }
}

impl Fixture {
    fn height(&self) -> u64 {
        self.state.read().unwrap().height()
    }

    fn top(&self) -> crest::proto::Block {
        self.state.read().unwrap().top_block().unwrap()
    }

    fn block_at(&self, height: u64) -> crest::proto::Block {
        self.state.read().unwrap().block_by_height(height).unwrap()
    }

    fn score(&self) -> num_bigint::BigUint {
        self.state.read().unwrap().current_score().unwrap()
    }
}

#[test]
fn appends_at_the_tip_and_gossips_the_score() {
    let fx = fixture(100, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    let block = {
        let state = fx.state.read().unwrap();
        build_block(&state, &miner, vec![])
    };
    let height = fx.applier.apply(&block).unwrap();
    assert_eq!(height, 2);
    assert_eq!(fx.height(), 2);

    // The scheduler was notified and the peer received the score.
    assert!(fx.tip_rx.try_recv().is_ok());
    let sent = fx.peer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let header = wire::Header::unmarshal_binary(&sent[0]).unwrap();
    assert_eq!(header.content_id, wire::CONTENT_ID_SCORE);
    assert_eq!(&sent[0][wire::HEADER_SIZE..], fx.score().to_bytes_be());
}

#[test]
fn duplicate_blocks_are_rejected() {
    let fx = fixture(100, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    let block = {
        let state = fx.state.read().unwrap();
        build_block(&state, &miner, vec![])
    };
    fx.applier.apply(&block).unwrap();
    assert!(matches!(
        fx.applier.apply(&block),
        Err(ApplyError::Duplicate)
    ));
}

#[test]
fn orphan_blocks_are_rejected() {
    let fx = fixture(100, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    let genesis = fx.top();
    let mut orphan_parent = genesis.clone();
    orphan_parent.signature = BlockSignature([0x77; 64]);
    let block = build_child(&orphan_parent, &miner, vec![], TEST_BASE_TARGET);

    assert!(matches!(fx.applier.apply(&block), Err(ApplyError::Orphan)));
    assert_eq!(fx.height(), 1);
}

#[test]
fn equal_score_fork_is_never_adopted() {
    let fx = fixture(100, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    let genesis = fx.top();
    let tip = build_child(&genesis, &miner, vec![], TEST_BASE_TARGET);
    fx.applier.apply(&tip).unwrap();

    // A competing child of genesis with the same base target reaches
    // exactly the current score.
    let rival = build_child(&genesis, &keypair(8), vec![], TEST_BASE_TARGET);
    assert!(matches!(
        fx.applier.apply(&rival),
        Err(ApplyError::LowScore)
    ));
    assert_eq!(fx.top().id(), tip.id());
}

#[test]
fn adopts_a_strictly_better_fork_with_rollback() {
    let fx = fixture(100, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    // Build genesis <- b2 <- b3 <- b4.
    for _ in 0..3 {
        let block = {
            let state = fx.state.read().unwrap();
            build_block(&state, &miner, vec![])
        };
        fx.applier.apply(&block).unwrap();
    }
    assert_eq!(fx.height(), 4);
    let b2 = fx.block_at(2);
    let b3 = fx.block_at(3);
    let old_score = fx.score();

    // A child of b2 with a much lower base target outscores b3 + b4.
    let fork = build_child(&b2, &keypair(8), vec![], 400);
    let height = fx.applier.apply(&fork).unwrap();
    assert_eq!(height, 3);
    assert_eq!(fx.top().id(), fork.id());
    assert!(fx.score() > old_score);
    // The dropped blocks are gone.
    assert!(!fx.state.read().unwrap().contains_block(&b3.id()));
}

#[test]
fn failed_fork_restores_the_saved_blocks() {
    let fx = fixture(100, &[(1, 1_000)]);
    let miner = keypair(MINER);

    for _ in 0..2 {
        let block = {
            let state = fx.state.read().unwrap();
            build_block(&state, &miner, vec![])
        };
        fx.applier.apply(&block).unwrap();
    }
    assert_eq!(fx.height(), 3);
    let b2 = fx.block_at(2);
    let b3 = fx.block_at(3);
    let old_score = fx.score();

    // Outscores the tip, but its transaction overdraws the sender, so it
    // fails mid-application.
    let overspend = transfer(&fx.settings, &keypair(1), 2, 5_000, FEE);
    let fork = build_child(&b2, &keypair(8), vec![overspend], 400);
    assert!(matches!(fx.applier.apply(&fork), Err(ApplyError::State(_))));

    // The saved blocks are back and the score is unchanged.
    assert_eq!(fx.height(), 3);
    assert_eq!(fx.top().id(), b3.id());
    assert_eq!(fx.score(), old_score);
    assert!(!fx.state.read().unwrap().contains_block(&fork.id()));
}

#[test]
fn rollback_deeper_than_the_cap_is_refused() {
    let fx = fixture(2, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    for _ in 0..4 {
        let block = {
            let state = fx.state.read().unwrap();
            build_block(&state, &miner, vec![])
        };
        fx.applier.apply(&block).unwrap();
    }
    assert_eq!(fx.height(), 5);
    let old_tip = fx.top().id();
    let old_score = fx.score();

    // Forking from genesis needs a 4-block rollback; the cap is 2.
    let genesis = fx.block_at(1);
    let fork = build_child(&genesis, &keypair(8), vec![], 1);
    match fx.applier.apply(&fork) {
        Err(ApplyError::TooDeepRollback { delta, max }) => {
            assert_eq!(delta, 4);
            assert_eq!(max, 2);
        }
        other => panic!("expected TooDeepRollback, got {other:?}"),
    }
    assert_eq!(fx.height(), 5);
    assert_eq!(fx.top().id(), old_tip);
    assert_eq!(fx.score(), old_score);
}

#[test]
fn confirmed_transactions_are_pruned_from_the_pool() {
    let fx = fixture(100, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    let tx = transfer(&fx.settings, &keypair(1), 2, 10, FEE);
    let tx_id = fx.utx.lock().unwrap().add(tx.clone()).unwrap();
    let other = transfer(&fx.settings, &keypair(1), 2, 20, FEE);
    fx.utx.lock().unwrap().add(other).unwrap();

    let block = {
        let state = fx.state.read().unwrap();
        build_block(&state, &miner, vec![tx])
    };
    fx.applier.apply(&block).unwrap();

    let utx = fx.utx.lock().unwrap();
    assert!(!utx.contains(&tx_id));
    assert_eq!(utx.size(), 1);
}

#[test]
fn applier_fires_the_miner_interrupter() {
    let fx = fixture(100, &[(1, INITIAL)]);
    let miner = keypair(MINER);

    assert!(!fx.interrupter.take());
    let block = {
        let state = fx.state.read().unwrap();
        build_block(&state, &miner, vec![])
    };
    fx.applier.apply(&block).unwrap();
    // The edge was raised before the state lock was taken and is still
    // pending for the miner to observe.
    assert!(fx.interrupter.take());
}

#[test]
fn miner_mints_fresh_proposals_and_drops_stale_ones() {
    let fx = fixture(100, &[(1, INITIAL), (MINER, INITIAL)]);
    let miner_kp = keypair(MINER);
    let shutdown = Arc::new(AtomicBool::new(false));

    let miner = Miner::new(
        fx.state.clone(),
        fx.applier.clone(),
        fx.utx.clone(),
        fx.interrupter.clone(),
        100,
        shutdown.clone(),
    );
    let (proposal_tx, proposal_rx) = unbounded::<MineProposal>();
    let handle = std::thread::spawn(move || miner.run(proposal_rx));

    fx.utx
        .lock()
        .unwrap()
        .add(transfer(&fx.settings, &keypair(1), 2, 10, FEE))
        .unwrap();

    let genesis = fx.top();
    proposal_tx
        .send(MineProposal {
            key_pair: miner_kp.clone(),
            parent: genesis.id(),
            parent_height: 1,
            base_target: TEST_BASE_TARGET,
            generation_signature: genesis
                .consensus
                .next_generation_signature(&miner_kp.public()),
        })
        .unwrap();

    // Wait for the mint to land.
    for _ in 0..100 {
        if fx.height() == 2 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(fx.height(), 2);
    let top = fx.top();
    assert_eq!(top.generator, miner_kp.public());
    assert_eq!(top.transactions.len(), 1);
    assert!(fx.utx.lock().unwrap().is_empty());

    // A proposal for the old tip is dropped after re-reading the tip.
    proposal_tx
        .send(MineProposal {
            key_pair: miner_kp.clone(),
            parent: genesis.id(),
            parent_height: 1,
            base_target: TEST_BASE_TARGET,
            generation_signature: genesis
                .consensus
                .next_generation_signature(&miner_kp.public()),
        })
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(fx.height(), 2);

    shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    drop(proposal_tx);
    handle.join().unwrap();
}

#[test]
fn scheduler_proposes_only_for_funded_key_pairs() {
    let fx = fixture(100, &[(MINER, INITIAL)]);
    let shutdown = Arc::new(AtomicBool::new(false));

    let funded = MiningScheduler::new(
        fx.state.clone(),
        vec![keypair(MINER)],
        fx.settings.clone(),
        shutdown.clone(),
    );
    let attempt = funded.next_attempt().unwrap();
    let (_, proposal) = attempt.expect("funded key pair should schedule");
    assert_eq!(proposal.parent, fx.top().id());
    assert_eq!(proposal.parent_height, 1);
    assert!(proposal.base_target <= fx.settings.max_base_target);

    let unfunded = MiningScheduler::new(
        fx.state.clone(),
        vec![keypair(42)],
        fx.settings.clone(),
        shutdown,
    );
    assert!(unfunded.next_attempt().unwrap().is_none());
}
