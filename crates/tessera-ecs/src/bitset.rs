//! Fixed-width bitset backing entity signatures and signature masks.
//!
//! Bit positions follow the layout computed by [`Schema`](crate::schema::Schema):
//! component presence bits first, tag presence bits after them.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Number of `u64` words backing a [`Bitset`].
pub const BITSET_WORDS: usize = 4;

/// Maximum number of component + tag bits a schema can lay out.
pub const BITSET_CAPACITY: usize = BITSET_WORDS * 64;

// ---------------------------------------------------------------------------
// Bitset
// ---------------------------------------------------------------------------

/// A `Copy` bitset of [`BITSET_CAPACITY`] bits.
///
/// Matching is a word-wise AND/compare, so checking an entity against a
/// signature mask never looks at component lists.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bitset {
    words: [u64; BITSET_WORDS],
}

impl Bitset {
    /// The bitset with no bits set.
    pub const EMPTY: Self = Self {
        words: [0; BITSET_WORDS],
    };

    /// Create an empty bitset.
    #[inline]
    pub fn new() -> Self {
        Self::EMPTY
    }

    /// Set `bit`.
    ///
    /// # Panics
    ///
    /// Panics if `bit >= BITSET_CAPACITY`.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    /// Clear `bit`.
    #[inline]
    pub fn clear(&mut self, bit: usize) {
        self.words[bit / 64] &= !(1u64 << (bit % 64));
    }

    /// Whether `bit` is set. Out-of-range bits read as unset.
    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        self.words
            .get(bit / 64)
            .is_some_and(|word| (word >> (bit % 64)) & 1 == 1)
    }

    /// Clear every bit.
    #[inline]
    pub fn reset(&mut self) {
        self.words = [0; BITSET_WORDS];
    }

    /// Returns `true` if every bit set in `mask` is also set in `self`,
    /// i.e. `self & mask == mask`.
    #[inline]
    pub fn contains_all(&self, mask: &Bitset) -> bool {
        self.words
            .iter()
            .zip(mask.words.iter())
            .all(|(word, required)| word & required == *required)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterate the positions of all set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(base + tz)
                })
            })
    }

    /// Render the low `width` bits most-significant first, e.g. `"101110"`.
    pub fn to_bit_string(&self, width: usize) -> String {
        (0..width.min(BITSET_CAPACITY))
            .rev()
            .map(|bit| if self.test(bit) { '1' } else { '0' })
            .collect()
    }
}

impl BitAnd for Bitset {
    type Output = Bitset;

    fn bitand(self, rhs: Self) -> Self::Output {
        let mut out = self;
        for (word, other) in out.words.iter_mut().zip(rhs.words.iter()) {
            *word &= other;
        }
        out
    }
}

impl BitOr for Bitset {
    type Output = Bitset;

    fn bitor(self, rhs: Self) -> Self::Output {
        let mut out = self;
        for (word, other) in out.words.iter_mut().zip(rhs.words.iter()) {
            *word |= other;
        }
        out
    }
}

impl FromIterator<usize> for Bitset {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bitset = Bitset::new();
        for bit in iter {
            bitset.set(bit);
        }
        bitset
    }
}

impl fmt::Debug for Bitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter_ones()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
