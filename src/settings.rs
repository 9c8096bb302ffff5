// Copyright (c) 2025 Crest Developers

//! Blockchain-wide constants: chain scheme, consensus parameters, feature
//! activation windows and the genesis distribution. These describe the
//! network itself; node-local knobs live in [`crate::config`].

use crate::crypto::Address;

#[derive(Debug, Clone)]
pub struct BlockchainSettings {
    /// Chain scheme byte mixed into every address.
    pub address_scheme: u8,
    /// Wire protocol magic.
    pub magic: u32,
    /// Block timestamps at or past this point track intermediate balances,
    /// so a transaction chain dipping below zero inside one block fails.
    pub check_temp_negative_after_time: u64,
    /// Until this block time, payments may spend balance that is leased
    /// away (historical network behaviour).
    pub allow_leased_balance_transfer_until: u64,
    /// Generator eligibility uses the balance this many blocks behind the
    /// tip.
    pub generation_balance_depth: u64,
    /// Target average spacing between blocks.
    pub average_block_delay_secs: u64,
    /// Cap on base-target growth, keeping difficulty finite.
    pub max_base_target: u64,
    pub initial_base_target: u64,
    pub genesis_timestamp: u64,
    /// Initial coin distribution applied by the genesis block.
    pub genesis_transfers: Vec<(Address, u64)>,
    /// Feature votes are tallied over windows of this many blocks.
    pub feature_activation_window: u64,
    /// Votes needed within a window to activate a feature.
    pub feature_activation_threshold: u64,
}

impl BlockchainSettings {
    pub fn testnet() -> Self {
        Self {
            address_scheme: b'T',
            magic: 0x1234_5678,
            check_temp_negative_after_time: 0,
            allow_leased_balance_transfer_until: 0,
            generation_balance_depth: 50,
            average_block_delay_secs: 60,
            max_base_target: 1_000_000_000,
            initial_base_target: 153_722_867,
            genesis_timestamp: 0,
            genesis_transfers: Vec::new(),
            feature_activation_window: 1000,
            feature_activation_threshold: 800,
        }
    }

    pub fn mainnet() -> Self {
        Self {
            address_scheme: b'W',
            magic: 0x5741_5645,
            generation_balance_depth: 1000,
            feature_activation_window: 5000,
            feature_activation_threshold: 4000,
            ..Self::testnet()
        }
    }
}
