// Copyright (c) 2025 Crest Developers

//! Peer-facing seams. Connection management and TCP framing live outside
//! the core; the node talks to peers through these traits and gossips the
//! chain score after every accepted block.

pub mod pool;

use std::io;
use std::sync::Arc;

use num_bigint::BigUint;
use tracing::{debug, warn};

use crate::keyvalue::KeyValue;
use crate::proto::wire;
use crate::state::keys::known_peers_key;
use crate::state::StateError;

/// A connected remote peer able to receive framed messages.
pub trait Peer: Send + Sync {
    fn id(&self) -> String;
    fn send(&self, message: &[u8]) -> io::Result<()>;
}

/// Supplies the currently connected peers. The core imposes no policy on
/// which peers this yields.
pub trait PeerManager: Send + Sync {
    fn each_connected(&self, f: &mut dyn FnMut(&dyn Peer));
}

/// Send the current chain score to every connected peer. Individual send
/// failures are logged and ignored; the peer manager handles disconnects on
/// its own.
pub fn broadcast_score(peers: &dyn PeerManager, magic: u32, score: &BigUint) {
    let message = wire::score_message(magic, &score.to_bytes_be());
    let mut sent = 0usize;
    peers.each_connected(&mut |peer| {
        match peer.send(&message) {
            Ok(()) => sent += 1,
            Err(e) => warn!(peer = %peer.id(), error = %e, "failed to send score"),
        }
    });
    debug!(peers = sent, score = %score, "score broadcast");
}

/// A peer manager with no connections, for nodes running detached.
pub struct NoPeers;

impl PeerManager for NoPeers {
    fn each_connected(&self, _f: &mut dyn FnMut(&dyn Peer)) {}
}

/// The known-peer address book, persisted in the shared key-value store so
/// it survives restarts.
pub struct KnownPeers {
    kv: Arc<dyn KeyValue>,
}

impl KnownPeers {
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self { kv }
    }

    pub fn load(&self) -> Result<Vec<String>, StateError> {
        match self
            .kv
            .get(&known_peers_key())
            .map_err(|e| StateError::Retrieval(e.to_string()))?
        {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| StateError::Deserialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    pub fn store(&self, peers: &[String]) -> Result<(), StateError> {
        let bytes =
            bincode::serialize(peers).map_err(|e| StateError::Serialization(e.to_string()))?;
        self.kv
            .put(&known_peers_key(), &bytes)
            .map_err(|e| StateError::Modification(e.to_string()))
    }
}
