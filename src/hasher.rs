//! Hash functions and the hashing parameters of a tree.
//!
//! A tree is parameterised by two functions: a path hasher turning user keys into
//! fixed-width paths, and a node hasher digesting values and node records.
//! [`TreeHasher`] bundles both together with the domain bytes of [`crate::consts`]:
//!
//! * leaf: `H(LEAF_PREFIX || path || value_hash)`
//! * inner: `H(NODE_PREFIX || left || right)`
//! * extension: the digest of the inner chain it stands for
//! * value: `H(value)`, no prefix
//!
//! All hashing is length-prefix-free, so `LEAF_PREFIX`, `NODE_PREFIX` and `EXT_PREFIX`
//! differ pairwise.
use crate::bits::Bits;
use crate::consts::*;
use crate::node::Record;
use crate::utils::*;
use crate::*;
use digest::Digest;

/// A node hasher: a deterministic function from bytes to a `Hash`.
pub trait Hasher {
    fn new() -> Self;
    fn digest(&self, bytes: &[u8]) -> Hash;
}

/// A path hasher: maps user keys onto paths of `HASH_LEN` bytes.
pub trait PathHasher {
    fn path(&self, key: &[u8]) -> Hash;
}

/// Every node hasher doubles as a path hasher.
impl<H: Hasher> PathHasher for H {
    fn path(&self, key: &[u8]) -> Hash {
        self.digest(key)
    }
}

#[derive(Clone, Debug, Default)]
/// A path hasher returning the key itself. Keys are expected to be `HASH_LEN` bytes long;
/// shorter keys are zero-padded and longer keys truncated.
pub struct IdentityPath;

impl PathHasher for IdentityPath {
    fn path(&self, key: &[u8]) -> Hash {
        slice_to_hash(key)
    }
}

#[derive(Clone, Debug)]
pub struct Blake2s;
impl Hasher for Blake2s {
    fn new() -> Self {
        Blake2s
    }

    fn digest(&self, bytes: &[u8]) -> Hash {
        let mut hasher = blake2_rfc::blake2s::Blake2s::new(HASH_LEN);
        hasher.update(bytes);
        let hash = hasher.finalize();
        slice_to_hash(hash.as_bytes())
    }
}

#[derive(Clone, Debug)]
pub struct Blake2b;
impl Hasher for Blake2b {
    fn new() -> Self {
        Blake2b
    }

    fn digest(&self, bytes: &[u8]) -> Hash {
        let mut hasher = blake2_rfc::blake2b::Blake2b::new(HASH_LEN);
        hasher.update(bytes);
        let hash = hasher.finalize();
        slice_to_hash(hash.as_bytes())
    }
}

#[derive(Clone, Debug)]
pub struct Blake3;
impl Hasher for Blake3 {
    fn new() -> Self {
        Blake3
    }

    fn digest(&self, bytes: &[u8]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(bytes);
        let hash = hasher.finalize();
        slice_to_hash(hash.as_bytes())
    }
}

fn digest_with<D: Digest>(bytes: &[u8]) -> Hash {
    let mut hasher = D::new();
    hasher.update(bytes);
    slice_to_hash(hasher.finalize().as_slice())
}

#[derive(Clone, Debug)]
/// SHA-256.
pub struct Sha2;
impl Hasher for Sha2 {
    fn new() -> Self {
        Sha2
    }

    fn digest(&self, bytes: &[u8]) -> Hash {
        digest_with::<sha2::Sha256>(bytes)
    }
}

#[derive(Clone, Debug)]
/// SHA3-256.
pub struct Sha3;
impl Hasher for Sha3 {
    fn new() -> Self {
        Sha3
    }

    fn digest(&self, bytes: &[u8]) -> Hash {
        digest_with::<sha3::Sha3_256>(bytes)
    }
}

/// The hashing parameters shared by a tree, its proofs and its verifiers.
#[derive(Clone, Debug)]
pub struct TreeHasher<H = DefaultHasher, P = H> {
    hasher: H,
    path_hasher: P,
    placeholder: Hash,
}

impl<H: Hasher + Clone> TreeHasher<H, H> {
    pub fn new() -> Self {
        let hasher = H::new();
        Self::with_path_hasher(hasher.clone(), hasher)
    }
}

impl<H: Hasher + Clone> Default for TreeHasher<H, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Hasher, P: PathHasher> TreeHasher<H, P> {
    pub fn with_path_hasher(hasher: H, path_hasher: P) -> Self {
        let empty = [0u8; HASH_LEN];
        let placeholder = hasher.digest(&Record::leaf(&empty, &empty));
        TreeHasher {
            hasher,
            path_hasher,
            placeholder,
        }
    }

    /// The digest of an empty subtree, at any height.
    pub fn placeholder(&self) -> Hash {
        self.placeholder
    }

    pub fn is_placeholder(&self, hash: &[u8]) -> bool {
        hash == &self.placeholder[..]
    }

    pub fn path(&self, key: &[u8]) -> Hash {
        self.path_hasher.path(key)
    }

    pub fn value_hash(&self, value: &[u8]) -> Hash {
        self.hasher.digest(value)
    }

    pub fn digest_leaf(&self, path: &Hash, value_hash: &Hash) -> Hash {
        self.hasher.digest(&Record::leaf(path, value_hash))
    }

    pub fn digest_node(&self, left: &[u8], right: &[u8]) -> Hash {
        self.hasher.digest(&Record::inner(left, right))
    }

    /// Hash `child` up through the chain of single-branch inner nodes spanning
    /// bits `[start, end)` of `path`.
    pub fn digest_extension(&self, path: &Hash, start: usize, end: usize, child: &Hash) -> Hash {
        let bits = Bits::with_range(path, start, end);
        (0..bits.len()).rev().fold(*child, |hash, i| {
            if bits.bit(i) {
                self.digest_node(&self.placeholder, &hash)
            } else {
                self.digest_node(&hash, &self.placeholder)
            }
        })
    }

    /// The digest a record is stored under. Extension records do not hash to their own
    /// bytes but to the chain they expand to.
    pub fn digest_record(&self, bytes: &[u8]) -> Result<Hash> {
        match Record::parse(bytes)? {
            Record::Extension {
                path,
                start,
                end,
                child,
            } => Ok(self.digest_extension(&path, start, end, &child)),
            _ => Ok(self.hasher.digest(bytes)),
        }
    }
}
