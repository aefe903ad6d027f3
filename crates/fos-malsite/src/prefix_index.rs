//! Hash Prefix Index
//!
//! In-memory set of hash prefixes for candidate hostnames. Checked on every
//! navigation and sub-resource load, so a lookup never touches disk.
//!
//! Key properties:
//! - Bloom filter in front rejects most non-members without hashing into the set
//! - Exact set behind it, so a positive answer has no false positives
//! - False negatives impossible for prefixes that were inserted
//!
//! The index is immutable once built. Refreshes build a new index and the
//! owning repository swaps it in whole.

use crate::hash::HashPrefix;
use bloomfilter::Bloom;
use std::collections::HashSet;
use tracing::debug;

/// False positive rate of the bloom front
const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Immutable prefix membership index
pub struct HashPrefixIndex {
    /// Probabilistic front filter
    bloom: Bloom<[u8]>,
    /// Exact membership
    prefixes: HashSet<HashPrefix>,
}

impl HashPrefixIndex {
    /// Build an index from a list of prefixes
    pub fn new<I>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = HashPrefix>,
    {
        let prefixes: HashSet<HashPrefix> = prefixes.into_iter().collect();
        // Bloom sizing needs at least one item
        let mut bloom = Bloom::new_for_fp_rate(prefixes.len().max(1), DEFAULT_FALSE_POSITIVE_RATE);
        for prefix in &prefixes {
            bloom.set(prefix.as_str().as_bytes());
        }

        debug!(
            "Hash prefix index built: {} prefixes, ~{} KB bloom",
            prefixes.len(),
            bloom.number_of_bits() / 8 / 1024
        );

        Self { bloom, prefixes }
    }

    /// Empty index (matches nothing)
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Check prefix membership
    #[inline]
    pub fn contains(&self, prefix: &HashPrefix) -> bool {
        if !self.bloom.check(prefix.as_str().as_bytes()) {
            return false;
        }
        self.prefixes.contains(prefix)
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl Default for HashPrefixIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<HashPrefix> for HashPrefixIndex {
    fn from_iter<T: IntoIterator<Item = HashPrefix>>(iter: T) -> Self {
        Self::new(iter)
    }
}
