// Copyright (c) 2025 Crest Developers

//! Shared helpers for integration tests: a funded state on a scratch
//! directory and builders for signed blocks and transactions.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use num_bigint::BigUint;
use tempfile::TempDir;

use crest::crypto::{Address, BlockSignature, KeyPair};
use crest::proto::{Block, NxtConsensus, Recipient, Transaction, TransferTx, TxVersion};
use crest::settings::BlockchainSettings;
use crest::state::diff::BalanceProfile;
use crest::state::{Height, State, StateManager};

pub const TEST_BASE_TARGET: u64 = 1000;

pub fn keypair(tag: u8) -> KeyPair {
    KeyPair::from_seed([tag; 32])
}

pub fn address(settings: &BlockchainSettings, tag: u8) -> Address {
    Address::from_public_key(settings.address_scheme, &keypair(tag).public())
}

pub struct TestChain {
    // Held so the scratch directory outlives the state.
    pub dir: TempDir,
    pub settings: Arc<BlockchainSettings>,
    pub state: StateManager,
}

/// A fresh state whose genesis block funds the given accounts (by key
/// seed tag).
pub fn funded_state(funding: &[(u8, u64)]) -> TestChain {
    let dir = TempDir::new().unwrap();
    let mut settings = BlockchainSettings::testnet();
    settings.genesis_transfers = funding
        .iter()
        .map(|(tag, amount)| (address(&settings, *tag), *amount))
        .collect();
    let settings = Arc::new(settings);
    let state = StateManager::open(dir.path(), settings.clone(), None).unwrap();
    TestChain {
        dir,
        settings,
        state,
    }
}

/// A signed block on top of the current tip.
pub fn build_block(state: &StateManager, miner: &KeyPair, transactions: Vec<Transaction>) -> Block {
    build_block_with_target(state, miner, transactions, TEST_BASE_TARGET)
}

pub fn build_block_with_target(
    state: &StateManager,
    miner: &KeyPair,
    transactions: Vec<Transaction>,
    base_target: u64,
) -> Block {
    let top = state.top_block().unwrap();
    build_child(&top, miner, transactions, base_target)
}

/// A signed block chaining from an arbitrary parent (for forks).
pub fn build_child(
    parent: &Block,
    miner: &KeyPair,
    transactions: Vec<Transaction>,
    base_target: u64,
) -> Block {
    let mut block = Block {
        version: crest::proto::BLOCK_VERSION,
        timestamp: parent.timestamp + 60,
        parent: parent.id(),
        consensus: NxtConsensus {
            base_target,
            generation_signature: parent.consensus.next_generation_signature(&miner.public()),
        },
        features: Vec::new(),
        transactions,
        generator: miner.public(),
        signature: BlockSignature::ZERO,
    };
    block.sign(miner);
    block
}

pub fn transfer(
    settings: &BlockchainSettings,
    from: &KeyPair,
    to_tag: u8,
    amount: u64,
    fee: u64,
) -> Transaction {
    Transaction::Transfer {
        version: TxVersion::V2,
        tx: TransferTx {
            sender_pk: from.public(),
            recipient: Recipient::Address(address(settings, to_tag)),
            amount_asset: None,
            fee_asset: None,
            amount,
            fee,
            timestamp: amount + fee,
            attachment: Vec::new(),
        },
    }
}

/// Everything observable about a set of accounts, for rollback round-trip
/// comparisons.
#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub height: Height,
    pub score: BigUint,
    pub profiles: Vec<BalanceProfile>,
}

pub fn snapshot(state: &StateManager, addresses: &[Address]) -> Snapshot {
    Snapshot {
        height: state.height(),
        score: state.current_score().unwrap(),
        profiles: addresses
            .iter()
            .map(|addr| state.waves_balance(addr).unwrap())
            .collect(),
    }
}
