//! Constants fixing the hash width and the record layouts.

/// Size of fixed length byte-array from a `Hasher`. Equivalent to the path length of a key.
pub const HASH_LEN: usize = 32;

/// Number of bits in a path, i.e. the maximum depth of a leaf.
pub const DEPTH: usize = HASH_LEN * 8;

/// Domain byte leading a leaf record: `LEAF_PREFIX || path || value_hash`.
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain byte leading an inner record: `NODE_PREFIX || left || right`.
pub const NODE_PREFIX: u8 = 0x01;

/// Domain byte leading an extension record: `EXT_PREFIX || start || end || path || child`.
pub const EXT_PREFIX: u8 = 0x02;

/// Length of a serialized leaf.
pub const LEAF_LEN: usize = 1 + 2 * HASH_LEN;

/// Length of a serialized inner node.
pub const INNER_LEN: usize = 1 + 2 * HASH_LEN;

/// Length of a serialized extension.
pub const EXT_LEN: usize = 1 + 2 + 2 * HASH_LEN;
