// Copyright (c) 2025 Crest Developers

//! The edge-triggered interrupt signal from the block applier to the miner.

use std::sync::atomic::{AtomicBool, Ordering};

/// The applier raises the flag before taking the state lock; the miner
/// checks it at every quantum of block assembly. Observation consumes the
/// edge: once `take` returns `true` the miner drops its candidate and must
/// re-read the tip before mining again.
#[derive(Debug, Default)]
pub struct MinerInterrupter {
    flag: AtomicBool,
}

impl MinerInterrupter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Observe and clear the signal.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}
