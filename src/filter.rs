//! Probabilistic membership filter for duplicate-action detection.
//!
//! A Bloom filter attached to an actor (one per action class) recording
//! which targets the actor has already acted upon. The filter check is the
//! single gate for "has this action already happened": callers must skip
//! every mutation side effect when [`MembershipFilter::insert`] returns
//! `false`.
//!
//! False positives silently drop an action (acceptable, the guarded actions
//! are idempotent); false negatives must not occur. Exceeding the configured
//! capacity degrades the false-positive rate and is logged, never fatal.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::types::{EngineError, Result};

/// Serialization format version.
const FORMAT_VERSION: u8 = 1;

/// Fixed header length: version + hash_count + expected + insertions + bit_count.
const HEADER_LEN: usize = 1 + 4 + 8 + 8 + 8;

/// Bloom filter over target keys.
///
/// Sized from `(expected_insertions, false_positive_rate)` using the
/// standard formulas: `m = -n·ln(p)/ln(2)²` bits and `k = m/n·ln(2)` hash
/// functions. Hashing is double hashing derived from one SHA-256 digest of
/// the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipFilter {
    bits: Vec<u64>,
    bit_count: u64,
    hash_count: u32,
    expected_insertions: u64,
    insertions: u64,
}

impl MembershipFilter {
    /// Create an empty filter sized for the given capacity and rate.
    pub fn new(expected_insertions: u64, false_positive_rate: f64) -> Self {
        let n = expected_insertions.max(1) as f64;
        let p = false_positive_rate.clamp(1e-10, 0.5);

        let ln2 = std::f64::consts::LN_2;
        let bit_count = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hash_count = ((bit_count as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            bits: vec![0u64; bit_count.div_ceil(64) as usize],
            bit_count,
            hash_count,
            expected_insertions: expected_insertions.max(1),
            insertions: 0,
        }
    }

    /// Whether the filter may already contain `key`.
    ///
    /// `false` is authoritative; `true` may be a false positive at the
    /// configured rate.
    pub fn contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = digest_pair(key);
        (0..self.hash_count).all(|i| self.bit(self.index(h1, h2, i)))
    }

    /// Record `key`, returning `true` when it was newly added.
    ///
    /// A `false` return means the actor already acted on this target (or a
    /// false positive collided); the caller must skip all side effects.
    pub fn insert(&mut self, key: &[u8]) -> bool {
        let (h1, h2) = digest_pair(key);

        let mut newly_added = false;
        for i in 0..self.hash_count {
            let idx = self.index(h1, h2, i);
            if !self.bit(idx) {
                self.set_bit(idx);
                newly_added = true;
            }
        }

        if newly_added {
            self.insertions += 1;
            if self.insertions == self.expected_insertions + 1 {
                warn!(
                    insertions = self.insertions,
                    expected = self.expected_insertions,
                    "membership filter past configured capacity, false-positive rate degrading"
                );
            }
        }

        newly_added
    }

    /// Approximate number of distinct keys inserted.
    pub fn len(&self) -> u64 {
        self.insertions
    }

    pub fn is_empty(&self) -> bool {
        self.insertions == 0
    }

    /// Serialize to the wire format stored on the actor record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bits.len() * 8);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&self.hash_count.to_le_bytes());
        out.extend_from_slice(&self.expected_insertions.to_le_bytes());
        out.extend_from_slice(&self.insertions.to_le_bytes());
        out.extend_from_slice(&self.bit_count.to_le_bytes());
        for word in &self.bits {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Deserialize from stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(EngineError::Storage("membership filter bytes truncated".into()));
        }
        if bytes[0] != FORMAT_VERSION {
            return Err(EngineError::Storage(format!(
                "unsupported membership filter version {}",
                bytes[0]
            )));
        }

        let hash_count = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
        let expected_insertions = u64::from_le_bytes(bytes[5..13].try_into().unwrap());
        let insertions = u64::from_le_bytes(bytes[13..21].try_into().unwrap());
        let bit_count = u64::from_le_bytes(bytes[21..29].try_into().unwrap());

        let word_count = bit_count.div_ceil(64) as usize;
        let body = &bytes[HEADER_LEN..];
        if body.len() != word_count * 8 || hash_count == 0 || bit_count == 0 {
            return Err(EngineError::Storage("membership filter bytes corrupt".into()));
        }

        let bits = body
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        Ok(Self {
            bits,
            bit_count,
            hash_count,
            expected_insertions,
            insertions,
        })
    }

    fn index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.bit_count
    }

    fn bit(&self, idx: u64) -> bool {
        self.bits[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
    }

    fn set_bit(&mut self, idx: u64) {
        self.bits[(idx / 64) as usize] |= 1u64 << (idx % 64);
    }
}

/// Two independent 64-bit hashes from a single SHA-256 digest.
fn digest_pair(key: &[u8]) -> (u64, u64) {
    let digest = Sha256::digest(key);
    let h1 = u64::from_le_bytes(digest[0..8].try_into().unwrap());
    let h2 = u64::from_le_bytes(digest[8..16].try_into().unwrap());
    // An even h2 could cycle over a subset of bit positions
    (h1, h2 | 1)
}
