// Copyright (c) 2025 Crest Developers

//! In-memory bloom filter used as a negative-lookup cache in front of the
//! key-value store. A `true` from [`BloomFilter::not_in_set`] is a hard
//! negative; `false` is inconclusive and the caller must read the store.

use xxhash_rust::xxh3::xxh3_64_with_seed;

#[derive(Debug, Clone)]
pub struct BloomFilterParams {
    /// Expected number of items added to the filter.
    pub n: usize,
    /// Acceptable false positive rate, in (0, 1).
    pub false_positive_rate: f64,
}

pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Size the filter optimally for `params.n` items at the requested
    /// false-positive rate.
    pub fn optimal(params: &BloomFilterParams) -> Self {
        let n = params.n.max(1) as f64;
        let p = params.false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    fn bit_index(&self, key: &[u8], seed: u32) -> u64 {
        xxh3_64_with_seed(key, seed as u64) % self.num_bits
    }

    pub fn add(&mut self, key: &[u8]) {
        for seed in 0..self.num_hashes {
            let idx = self.bit_index(key, seed);
            self.bits[(idx / 64) as usize] |= 1 << (idx % 64);
        }
    }

    /// `true` means the key was definitely never added.
    pub fn not_in_set(&self, key: &[u8]) -> bool {
        for seed in 0..self.num_hashes {
            let idx = self.bit_index(key, seed);
            if self.bits[(idx / 64) as usize] & (1 << (idx % 64)) == 0 {
                return true;
            }
        }
        false
    }
}
