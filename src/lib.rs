// Copyright (c) 2025 Crest Developers

//! Crest node library: a proof-of-stake full node speaking the Waves wire
//! protocol. The core is the rollback-capable state engine, the
//! cumulative-score fork choice, the stake-eligibility mining scheduler
//! and the unconfirmed transaction pool; peers and the admin surface plug
//! in through the seams in [`network`].

pub mod config;
pub mod crypto;
pub mod keyvalue;
pub mod network;
pub mod node;
pub mod proto;
pub mod settings;
pub mod state;
pub mod telemetry;
