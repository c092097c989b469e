//! Bloom filter used for governance vote delta sync.
//!
//! False positives are possible, false negatives are not: a vote hash a
//! peer inserted before sending its sync request will always match, so we
//! never re-send a vote the peer already holds.

use serde::{Deserialize, Serialize};

/// Space-efficient probabilistic set membership over byte strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    /// Bit array, little-endian bit order within each byte.
    bits: Vec<u8>,
    /// Number of usable bits (m).
    n_bits: usize,
    /// Number of hash functions (k).
    n_hashes: u32,
    /// Per-filter randomization so repeated requests are not linkable.
    tweak: u32,
}

impl BloomFilter {
    /// Build a filter sized for `elements` insertions at the target false
    /// positive rate. m = -n*ln(p)/ln(2)^2, k = m/n*ln(2).
    pub fn with_params(elements: usize, fp_rate: f64, tweak: u32) -> Self {
        let n = elements.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * fp_rate.ln() / (ln2 * ln2)).ceil().max(8.0) as usize;
        let k = ((m as f64 / n) * ln2).round().max(1.0) as u32;
        BloomFilter {
            bits: vec![0u8; (m + 7) / 8],
            n_bits: m,
            n_hashes: k,
            tweak,
        }
    }

    pub fn insert(&mut self, element: &[u8]) {
        for i in 0..self.n_hashes {
            let pos = self.bit_position(i, element);
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    /// True if the element might be in the set; false means definitely not.
    pub fn contains(&self, element: &[u8]) -> bool {
        (0..self.n_hashes).all(|i| {
            let pos = self.bit_position(i, element);
            self.bits[pos / 8] & (1 << (pos % 8)) != 0
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    fn bit_position(&self, index: u32, element: &[u8]) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&index.to_le_bytes());
        hasher.update(&self.tweak.to_le_bytes());
        hasher.update(element);
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(word) % self.n_bits as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::with_params(100, 0.001, 42);
        let elements: Vec<[u8; 32]> = (0u8..100).map(|i| [i; 32]).collect();
        for e in &elements {
            filter.insert(e);
        }
        for e in &elements {
            assert!(filter.contains(e));
        }
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = BloomFilter::with_params(100, 0.001, 0);
        assert!(filter.is_empty());
        assert!(!filter.contains(&[1u8; 32]));
    }

    #[test]
    fn test_tweak_varies_positions() {
        let mut a = BloomFilter::with_params(10, 0.01, 1);
        let mut b = BloomFilter::with_params(10, 0.01, 2);
        a.insert(&[7u8; 32]);
        b.insert(&[7u8; 32]);
        assert_ne!(a.bits, b.bits);
    }
}
