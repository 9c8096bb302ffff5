// Copyright (c) 2025 Crest Developers

//! End-to-end scenarios over the state engine: asset lifecycles, leasing,
//! rollback round-trips and balance invariants.

mod common;

use common::*;

use crest::proto::{
    BurnTx, CreateAliasTx, ExchangeTx, IssueTx, LeaseCancelTx, LeaseTx, Order, OrderType,
    Recipient, ReissueTx, Transaction, TxVersion,
};
use crest::state::differ::PRICE_CONSTANT;
use crest::state::{calculate_score, State, StateError, StateManager};

const INITIAL: u64 = 1_000_000;
const FEE: u64 = 100;

// Key seed tags used across the tests.
const ISSUER: u8 = 1;
const MINER: u8 = 9;

#[test]
fn genesis_funds_accounts() {
    let chain = funded_state(&[(ISSUER, INITIAL), (2, 500)]);
    assert_eq!(chain.state.height(), 1);

    let issuer = address(&chain.settings, ISSUER);
    assert_eq!(chain.state.waves_balance(&issuer).unwrap().balance, INITIAL);
    let other = address(&chain.settings, 2);
    assert_eq!(chain.state.waves_balance(&other).unwrap().balance, 500);

    let score = chain.state.current_score().unwrap();
    assert_eq!(
        score,
        calculate_score(chain.settings.initial_base_target).unwrap()
    );
}

#[test]
fn issue_then_reissue() {
    let mut chain = funded_state(&[(ISSUER, INITIAL)]);
    let issuer = keypair(ISSUER);
    let miner = keypair(MINER);
    let quantity = 10_000u64;

    let issue = Transaction::Issue {
        version: TxVersion::V1,
        tx: IssueTx {
            sender_pk: issuer.public(),
            name: "token".to_string(),
            description: String::new(),
            quantity,
            decimals: 2,
            reissuable: true,
            fee: FEE,
            timestamp: 10,
        },
    };
    let asset_id = issue.id();
    let block = build_block(&chain.state, &miner, vec![issue]);
    chain.state.add_block(&block).unwrap();

    let reissue = Transaction::Reissue {
        version: TxVersion::V1,
        tx: ReissueTx {
            sender_pk: issuer.public(),
            asset_id,
            quantity: 1,
            reissuable: false,
            fee: FEE,
            timestamp: 11,
        },
    };
    let block = build_block(&chain.state, &miner, vec![reissue]);
    chain.state.add_block(&block).unwrap();

    let info = chain.state.asset_info(asset_id).unwrap();
    assert_eq!(info.quantity, quantity + 1);
    assert!(!info.reissuable);

    let issuer_addr = address(&chain.settings, ISSUER);
    let profile = chain.state.waves_balance(&issuer_addr).unwrap();
    assert_eq!(profile.balance, INITIAL - 2 * FEE);
    assert_eq!(
        chain.state.asset_balance(&issuer_addr, &asset_id).unwrap(),
        quantity + 1
    );
    // The miner collected both fees.
    let miner_addr = address(&chain.settings, MINER);
    assert_eq!(
        chain.state.waves_balance(&miner_addr).unwrap().balance,
        2 * FEE
    );
}

#[test]
fn issue_then_burn() {
    let mut chain = funded_state(&[(ISSUER, INITIAL)]);
    let issuer = keypair(ISSUER);
    let miner = keypair(MINER);
    let quantity = 10_000u64;

    let issue = Transaction::Issue {
        version: TxVersion::V2,
        tx: IssueTx {
            sender_pk: issuer.public(),
            name: "token".to_string(),
            description: String::new(),
            quantity,
            decimals: 0,
            reissuable: false,
            fee: FEE,
            timestamp: 10,
        },
    };
    let asset_id = issue.id();
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![issue]))
        .unwrap();

    let burn = Transaction::Burn {
        version: TxVersion::V1,
        tx: BurnTx {
            sender_pk: issuer.public(),
            asset_id,
            amount: 1,
            fee: FEE,
            timestamp: 11,
        },
    };
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![burn]))
        .unwrap();

    let info = chain.state.asset_info(asset_id).unwrap();
    assert_eq!(info.quantity, quantity - 1);

    let issuer_addr = address(&chain.settings, ISSUER);
    assert_eq!(
        chain.state.waves_balance(&issuer_addr).unwrap().balance,
        INITIAL - 2 * FEE
    );
    assert_eq!(
        chain.state.asset_balance(&issuer_addr, &asset_id).unwrap(),
        quantity - 1
    );
}

#[test]
fn apply_then_rollback_is_identity() {
    let mut chain = funded_state(&[(1, INITIAL), (2, INITIAL)]);
    let sender = keypair(1);
    let miner = keypair(MINER);
    let watched = [
        address(&chain.settings, 1),
        address(&chain.settings, 2),
        address(&chain.settings, 3),
        address(&chain.settings, MINER),
    ];

    let before = snapshot(&chain.state, &watched);
    let block = build_block(
        &chain.state,
        &miner,
        vec![
            transfer(&chain.settings, &sender, 2, 1_000, FEE),
            transfer(&chain.settings, &sender, 3, 2_000, FEE),
        ],
    );
    chain.state.add_block(&block).unwrap();
    let after_apply = snapshot(&chain.state, &watched);
    assert_ne!(before, after_apply);

    chain.state.rollback_to_height(1).unwrap();
    assert_eq!(snapshot(&chain.state, &watched), before);

    // Re-applying the same block reproduces the same observable state.
    chain.state.add_block(&block).unwrap();
    assert_eq!(snapshot(&chain.state, &watched), after_apply);
}

#[test]
fn two_block_rollback_restores_the_snapshot() {
    let mut chain = funded_state(&[(1, INITIAL)]);
    let sender = keypair(1);
    let miner = keypair(MINER);
    let watched = [
        address(&chain.settings, 1),
        address(&chain.settings, 2),
        address(&chain.settings, MINER),
    ];

    let before = snapshot(&chain.state, &watched);
    let a = build_block(
        &chain.state,
        &miner,
        vec![transfer(&chain.settings, &sender, 2, 10, FEE)],
    );
    chain.state.add_block(&a).unwrap();
    let b = build_block(
        &chain.state,
        &miner,
        vec![transfer(&chain.settings, &sender, 2, 20, FEE)],
    );
    chain.state.add_block(&b).unwrap();
    assert_eq!(chain.state.height(), 3);

    chain.state.rollback_to_height(1).unwrap();
    assert_eq!(snapshot(&chain.state, &watched), before);
}

#[test]
fn overspending_block_is_rejected_atomically() {
    let mut chain = funded_state(&[(1, 1_000)]);
    let sender = keypair(1);
    let miner = keypair(MINER);
    let watched = [address(&chain.settings, 1), address(&chain.settings, 2)];

    let before = snapshot(&chain.state, &watched);
    // First transfer fits, the second overdraws; the whole block must fail.
    let block = build_block(
        &chain.state,
        &miner,
        vec![
            transfer(&chain.settings, &sender, 2, 500, FEE),
            transfer(&chain.settings, &sender, 2, 600, FEE),
        ],
    );
    let err = chain.state.add_block(&block).unwrap_err();
    assert!(matches!(err, StateError::TxValidation(_)));
    assert_eq!(snapshot(&chain.state, &watched), before);
}

#[test]
fn leased_out_balance_cannot_be_spent() {
    let mut chain = funded_state(&[(1, 1_000)]);
    let sender = keypair(1);
    let miner = keypair(MINER);

    let lease = Transaction::Lease {
        version: TxVersion::V1,
        tx: LeaseTx {
            sender_pk: sender.public(),
            recipient: Recipient::Address(address(&chain.settings, 2)),
            amount: 800,
            fee: FEE,
            timestamp: 10,
        },
    };
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![lease]))
        .unwrap();

    let sender_addr = address(&chain.settings, 1);
    let profile = chain.state.waves_balance(&sender_addr).unwrap();
    assert_eq!(profile.balance, 900);
    assert_eq!(profile.lease_out, 800);
    let recipient_profile = chain
        .state
        .waves_balance(&address(&chain.settings, 2))
        .unwrap();
    assert_eq!(recipient_profile.lease_in, 800);

    // Only 100 unleased waves remain; spending more must fail.
    let block = build_block(
        &chain.state,
        &miner,
        vec![transfer(&chain.settings, &sender, 3, 200, FEE)],
    );
    let err = chain.state.add_block(&block).unwrap_err();
    assert!(matches!(err, StateError::TxValidation(_)));
}

#[test]
fn lease_cancel_and_rollback_restore_state() {
    let mut chain = funded_state(&[(1, 1_000)]);
    let sender = keypair(1);
    let miner = keypair(MINER);

    let lease = Transaction::Lease {
        version: TxVersion::V2,
        tx: LeaseTx {
            sender_pk: sender.public(),
            recipient: Recipient::Address(address(&chain.settings, 2)),
            amount: 500,
            fee: FEE,
            timestamp: 10,
        },
    };
    let lease_id = lease.id();
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![lease]))
        .unwrap();
    assert!(chain.state.lease_info(lease_id).unwrap().is_active);

    let cancel = Transaction::LeaseCancel {
        version: TxVersion::V1,
        tx: LeaseCancelTx {
            sender_pk: sender.public(),
            lease_id,
            fee: FEE,
            timestamp: 11,
        },
    };
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![cancel]))
        .unwrap();
    assert!(!chain.state.lease_info(lease_id).unwrap().is_active);
    let sender_addr = address(&chain.settings, 1);
    assert_eq!(chain.state.waves_balance(&sender_addr).unwrap().lease_out, 0);

    // Rolling back the cancellation reactivates the lease.
    chain.state.rollback_to_height(2).unwrap();
    assert!(chain.state.lease_info(lease_id).unwrap().is_active);
    assert_eq!(
        chain.state.waves_balance(&sender_addr).unwrap().lease_out,
        500
    );
}

#[test]
fn exchange_overflow_leaves_state_unchanged() {
    let mut chain = funded_state(&[(1, INITIAL), (2, INITIAL), (3, INITIAL)]);
    let miner = keypair(MINER);
    let watched = [address(&chain.settings, 1), address(&chain.settings, 2)];
    let before = snapshot(&chain.state, &watched);

    let amount_asset = Some(crest::crypto::digest(b"asset"));
    let order = |tag: u8, order_type| Order {
        sender_pk: keypair(tag).public(),
        matcher_pk: keypair(3).public(),
        amount_asset,
        price_asset: None,
        order_type,
        price: 1 << 32,
        amount: 1 << 32,
        timestamp: 5,
        expiration: 50,
        matcher_fee: 1,
    };
    // amount * price / PRICE_CONSTANT = 2^64 / 1e8 * 2^32 >> i64::MAX.
    let exchange = Transaction::Exchange(ExchangeTx {
        buy_order: order(1, OrderType::Buy),
        sell_order: order(2, OrderType::Sell),
        price: 1 << 32,
        amount: 1 << 32,
        buy_matcher_fee: 1,
        sell_matcher_fee: 1,
        fee: 1,
        timestamp: 6,
    });

    let block = build_block(&chain.state, &miner, vec![exchange]);
    let err = chain.state.add_block(&block).unwrap_err();
    assert!(matches!(err, StateError::TxValidation(_)));
    assert_eq!(snapshot(&chain.state, &watched), before);
    assert_eq!(chain.state.height(), 1);
}

#[test]
fn exchange_settles_within_price_bounds() {
    let mut chain = funded_state(&[(1, INITIAL), (2, INITIAL), (3, INITIAL)]);
    let miner = keypair(MINER);

    // Seed the seller with the amount asset first.
    let issue = Transaction::Issue {
        version: TxVersion::V2,
        tx: IssueTx {
            sender_pk: keypair(2).public(),
            name: "base".to_string(),
            description: String::new(),
            quantity: 1_000,
            decimals: 0,
            reissuable: false,
            fee: FEE,
            timestamp: 3,
        },
    };
    let asset_id = issue.id();
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![issue]))
        .unwrap();

    let order = |tag: u8, order_type| Order {
        sender_pk: keypair(tag).public(),
        matcher_pk: keypair(3).public(),
        amount_asset: Some(asset_id),
        price_asset: None,
        order_type,
        price: 2 * PRICE_CONSTANT,
        amount: 100,
        timestamp: 5,
        expiration: 50,
        matcher_fee: 10,
    };
    let exchange = Transaction::Exchange(ExchangeTx {
        buy_order: order(1, OrderType::Buy),
        sell_order: order(2, OrderType::Sell),
        price: 2 * PRICE_CONSTANT,
        amount: 100,
        buy_matcher_fee: 10,
        sell_matcher_fee: 10,
        fee: 5,
        timestamp: 6,
    });
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![exchange]))
        .unwrap();

    let buyer = address(&chain.settings, 1);
    let seller = address(&chain.settings, 2);
    let matcher = address(&chain.settings, 3);
    assert_eq!(chain.state.asset_balance(&buyer, &asset_id).unwrap(), 100);
    assert_eq!(chain.state.asset_balance(&seller, &asset_id).unwrap(), 900);
    // Seller gains 200 waves minus the 10 matcher fee.
    assert_eq!(
        chain.state.waves_balance(&seller).unwrap().balance,
        INITIAL - FEE + 200 - 10
    );
    assert_eq!(
        chain.state.waves_balance(&buyer).unwrap().balance,
        INITIAL - 200 - 10
    );
    // Matcher collects both fees and pays the tx fee.
    assert_eq!(
        chain.state.waves_balance(&matcher).unwrap().balance,
        INITIAL + 10 + 10 - 5
    );
}

#[test]
fn alias_registration_and_transfer() {
    let mut chain = funded_state(&[(1, INITIAL), (2, INITIAL)]);
    let registrant = keypair(2);
    let sender = keypair(1);
    let miner = keypair(MINER);

    let create = Transaction::CreateAlias {
        version: TxVersion::V1,
        tx: CreateAliasTx {
            sender_pk: registrant.public(),
            alias: "merchant".to_string(),
            fee: FEE,
            timestamp: 4,
        },
    };
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![create]))
        .unwrap();
    assert_eq!(
        chain.state.resolve_alias("merchant").unwrap(),
        address(&chain.settings, 2)
    );

    let to_alias = Transaction::Transfer {
        version: TxVersion::V2,
        tx: crest::proto::TransferTx {
            sender_pk: sender.public(),
            recipient: Recipient::Alias("merchant".to_string()),
            amount_asset: None,
            fee_asset: None,
            amount: 250,
            fee: FEE,
            timestamp: 5,
            attachment: Vec::new(),
        },
    };
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![to_alias]))
        .unwrap();
    assert_eq!(
        chain
            .state
            .waves_balance(&address(&chain.settings, 2))
            .unwrap()
            .balance,
        INITIAL - FEE + 250
    );
}

#[test]
fn transactions_are_indexed_by_id() {
    let mut chain = funded_state(&[(1, INITIAL)]);
    let sender = keypair(1);
    let miner = keypair(MINER);

    let tx = transfer(&chain.settings, &sender, 2, 42, FEE);
    let tx_id = tx.id();
    chain
        .state
        .add_block(&build_block(&chain.state, &miner, vec![tx.clone()]))
        .unwrap();

    assert_eq!(chain.state.transaction_by_id(&tx_id).unwrap(), tx);

    // Rollback drops the index entry.
    chain.state.rollback_to_height(1).unwrap();
    let err = chain.state.transaction_by_id(&tx_id).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn score_accumulates_per_block() {
    let mut chain = funded_state(&[(1, INITIAL)]);
    let miner = keypair(MINER);

    let genesis_score = chain.state.current_score().unwrap();
    chain
        .state
        .add_block(&build_block_with_target(&chain.state, &miner, vec![], 500))
        .unwrap();
    let expected = genesis_score.clone() + calculate_score(500).unwrap();
    assert_eq!(chain.state.current_score().unwrap(), expected);
    assert!(chain.state.current_score().unwrap() > genesis_score);

    assert_eq!(chain.state.score_at_height(1).unwrap(), genesis_score);
}

#[test]
fn duplicate_block_is_rejected_by_state() {
    let mut chain = funded_state(&[(1, INITIAL)]);
    let miner = keypair(MINER);

    let block = build_block(&chain.state, &miner, vec![]);
    chain.state.add_block(&block).unwrap();
    let err = chain.state.add_block(&block).unwrap_err();
    assert!(matches!(err, StateError::BlockValidation(_)));
}

#[test]
fn state_survives_reopen() {
    let dir;
    let settings;
    let tip;
    {
        let mut chain = funded_state(&[(1, INITIAL)]);
        let sender = keypair(1);
        let miner = keypair(MINER);
        chain
            .state
            .add_block(&build_block(
                &chain.state,
                &miner,
                vec![transfer(&chain.settings, &sender, 2, 77, FEE)],
            ))
            .unwrap();
        tip = chain.state.top_block().unwrap();
        settings = chain.settings.clone();
        dir = chain.dir;
    }

    let state = StateManager::open(dir.path(), settings.clone(), None).unwrap();
    assert_eq!(state.height(), 2);
    assert_eq!(state.top_block().unwrap(), tip);
    assert_eq!(
        state
            .waves_balance(&address(&settings, 2))
            .unwrap()
            .balance,
        77
    );
}
