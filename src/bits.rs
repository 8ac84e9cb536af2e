//! A module for viewing a path as a range of bits.
use crate::utils::*;
use crate::*;
use std::cmp;
use std::ops::Range;

#[derive(Debug, Clone)]
/// A window `range` over the bits of `path`, most significant bit first.
///
/// Bit indices are absolute: `Bits::with_range(path, 8, 16).bit(0)` is bit 8 of `path`.
pub struct Bits<'a> {
    pub path: &'a [u8],
    pub range: Range<BitsLen>,
}

impl<'a> Bits<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Bits {
            path: bytes,
            range: 0..(bytes.len() as BitsLen * 8),
        }
    }

    pub fn with_range(bytes: &'a [u8], start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= bytes.len() * 8);
        Bits {
            path: bytes,
            range: cast(start)..cast(end),
        }
    }

    pub fn len(&self) -> BitsLen {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the first `n` bits of the window.
    pub fn shift(&self, n: BitsLen) -> Self {
        let start = min!(self.range.start + n, self.range.end);
        Self {
            path: self.path,
            range: start..self.range.end,
        }
    }

    /// Get length of the longest common prefix bits for the given two `Bits`.
    pub fn len_common_bits(a: &Self, b: &Self) -> BitsLen {
        len_lcp(a.path, &a.range, b.path, &b.range)
    }

    /// Get the bit at position `i` within this Bits range
    pub fn bit(&self, i: BitsLen) -> bool {
        assert!(i < self.len(), "Bit index out of range");
        bit(self.path, self.range.start + i)
    }

    /// Copy the window into a full-width path with every bit outside the window cleared.
    pub fn to_masked(&self) -> Hash {
        let mut out = [0u8; HASH_LEN];
        let (start, end): (usize, usize) = (cast(self.range.start), cast(self.range.end));
        for i in start..end {
            if bit(self.path, i) {
                set_bit(&mut out, i, true);
            }
        }
        out
    }
}

// Equality is on the bit values of the windows, not on the underlying bytes.
impl PartialEq for Bits<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && Self::len_common_bits(self, other) == self.len()
    }
}

impl Eq for Bits<'_> {}

/// Length of the common prefix of two paths, counted in bits from `from`.
pub fn common_prefix_from(a: &[u8], b: &[u8], from: usize) -> usize {
    let (a, b) = (Bits::new(a), Bits::new(b));
    let n = Bits::len_common_bits(&a.shift(cast(from)), &b.shift(cast(from)));
    cast(n)
}
