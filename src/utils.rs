//! A module for implementing some helpful functions for `lazysmt`.
use crate::*;
use num::{NumCast, PrimInt};
use rand::Rng;
use std::cmp;
use std::ops::Range;

#[macro_export]
/// std::cmp::min() extension for use with multiple arguments.
macro_rules! min {
    ($x:expr) => ($x);
    ($x:expr, $($e:expr),+) => (cmp::min($x, min!($($e),+)));
}

#[macro_export]
/// Convert `bytes` slice into `hex` string.
macro_rules! hex {
    ($bytes:expr) => {{
        hex::encode($bytes)
    }};
}

/// Cast from a typed scalar to another based on `num_traits`
pub fn cast<T: NumCast, U: NumCast>(n: T) -> U {
    NumCast::from(n).expect("cast(): Numcast")
}

/// Generate a random byte based on `rand::random`.
pub fn random_byte() -> u8 {
    rand::random::<u8>()
}

/// Generate random bytes of the given length.
pub fn random_bytes(n: usize) -> Vec<u8> {
    (0..n).map(|_| random_byte()).collect()
}

/// Generate a random `Hash`, byte-array of `HASH_LEN` length.
pub fn random_hash() -> Hash {
    slice_to_hash(&random_bytes(HASH_LEN))
}

/// Generate a vector of random `Hash` with the given length.
pub fn random_hashes(n: usize) -> Vec<Hash> {
    (0..n).map(|_| random_hash()).collect()
}

/// Get a fixed length byte-array or `Hash` from slice.
///
/// Shorter slices are zero-padded on the right, longer ones truncated.
pub fn slice_to_hash(slice: &[u8]) -> Hash {
    let mut hash = [0x00; HASH_LEN];
    let n = min!(slice.len(), HASH_LEN);
    hash[..n].copy_from_slice(&slice[..n]);
    hash
}

/// Shuffle a slice using _Fisher-Yates_ algorithm.
pub fn shuffle<T>(slice: &mut [T]) {
    let mut rng = rand::thread_rng();
    let s = slice.len();
    (0..s).rev().for_each(|i| {
        let q = rng.gen_range(0..=i);
        slice.swap(i, q);
    });
}

/// Get length of the longest common prefix bits for the given two slices.
pub fn len_lcp<T>(a: &[u8], m: &Range<T>, b: &[u8], n: &Range<T>) -> T
where
    T: PrimInt + NumCast,
{
    let len: usize = cast(min!(m.end - m.start, n.end - n.start));
    let count = (0..len)
        .take_while(|&i| {
            let i: T = cast(i);
            bit(a, m.start + i) == bit(b, n.start + i)
        })
        .count();
    cast(count)
}

/// Get `i`-th bit from bytes slice. Index `i` starts from 0 at the most significant bit.
pub fn bit<T: PrimInt + NumCast>(bytes: &[u8], i: T) -> bool {
    let i: usize = cast(i);
    (bytes[i / 8] >> (7 - i % 8)) & 0x01 == 0x01
}

/// Set or clear `i`-th bit of bytes slice, counted from the most significant bit.
pub fn set_bit(bytes: &mut [u8], i: usize, on: bool) {
    let mask = 0x80u8 >> (i % 8);
    if on {
        bytes[i / 8] |= mask;
    } else {
        bytes[i / 8] &= !mask;
    }
}
