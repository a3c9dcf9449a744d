//! Compact membership summaries exchanged between neighbours.
//!
//! A router periodically snapshots its cache into a Bloom filter and ships
//! the raw bit array to its neighbours. The receiver rebuilds the filter
//! with the same sizing parameters, so both sides must agree on capacity
//! and error rate.

use sha2::{Digest, Sha256};
use vrouter_common::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    nbits: usize,
    hashes: u32,
}

impl BloomFilter {
    /// Size the filter for `capacity` items at the given false-positive
    /// rate. Standard sizing: m = n·ln(1/e)/ln²2 bits, k = m/n·ln2 hashes.
    pub fn with_capacity(capacity: usize, error_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let nbits = ((n * (1.0 / error_rate).ln()) / (ln2 * ln2)).ceil() as usize;
        let nbits = nbits.max(8);
        let hashes = ((nbits as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            bits: vec![0u8; (nbits + 7) / 8],
            nbits,
            hashes,
        }
    }

    fn indices(&self, item: &[u8]) -> impl Iterator<Item = usize> + '_ {
        // Double hashing over one SHA-256 digest: h1 + i·h2 covers all k
        // positions without k separate hash passes.
        let digest = Sha256::digest(item);
        let h1 = u64::from_be_bytes(digest[..8].try_into().unwrap());
        let h2 = u64::from_be_bytes(digest[8..16].try_into().unwrap()) | 1;
        let nbits = self.nbits as u64;
        (0..self.hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % nbits) as usize)
    }

    pub fn insert(&mut self, item: &[u8]) {
        let positions: Vec<usize> = self.indices(item).collect();
        for pos in positions {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    /// Membership test; false positives at roughly the configured rate,
    /// never false negatives.
    pub fn may_contain(&self, item: &[u8]) -> bool {
        self.indices(item)
            .all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// Raw bit array, as shipped over the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.clone()
    }

    /// Rebuild a filter from a received bit array. The sizing parameters
    /// must match the sender's or the length check fails.
    pub fn from_bytes(capacity: usize, error_rate: f64, bytes: &[u8]) -> Result<Self> {
        let mut filter = Self::with_capacity(capacity, error_rate);
        if bytes.len() != filter.bits.len() {
            return Err(Error::MalformedFrame(format!(
                "bloom snapshot is {} bytes, expected {}",
                bytes.len(),
                filter.bits.len()
            )));
        }
        filter.bits.copy_from_slice(bytes);
        Ok(filter)
    }
}
