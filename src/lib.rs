//! # lazysmt
//! A Sparse Merkle Tree (SMT) with lazily loaded nodes, path-compressed extensions
//! and deferred garbage collection.
//!
//! Every committed state has a single root digest, and membership or non-membership of
//! any key can be proven to a verifier that knows only that root.
//!
//! ## Features
//! - Nodes are loaded from the database only when a traversal reaches them.
//! - Runs of single-branch inner nodes are stored as one __extension__ node, which hashes
//!   exactly like the chain it stands for.
//! - Mutations only touch memory. Replaced records are collected as __orphans__ and
//!   removed from the database on `commit()`.
//! - Inclusion and non-inclusion proofs, a compact proof encoding, and a
//!   __deep subtree__ that rebuilds a partial tree from verified proofs.
//!
//! _Databases include_:
//! - [`HashMap`](https://lib.rs/crates/hashbrown)
//! - [`RocksDB`](https://lib.rs/crates/rocksdb) (feature `db_rocksdb`)
//! - [`Sled`](https://lib.rs/crates/sled) (feature `db_sled`)
//! - a write-back `CachedDB` wrapper around any of them
//!
//! _Hashers include_:
//! - [`Blake3`](https://lib.rs/crates/blake3)
//! - [`Blake2s`](https://lib.rs/crates/blake2-rfc) and [`Blake2b`](https://lib.rs/crates/blake2-rfc)
//! - [`SHA-2`](https://lib.rs/crates/sha2)
//! - [`SHA-3`](https://lib.rs/crates/sha3)
//!
//! # Quick start
//! ```
//! use lazysmt::hasher::Sha2;
//! use lazysmt::{verify_proof, MemoryDB, Result, SparseMerkleTree, TreeHasher};
//!
//! fn example() -> Result<()> {
//!     let mut tree = SparseMerkleTree::new(MemoryDB::default(), TreeHasher::<Sha2>::new());
//!
//!     tree.update(b"key", b"value")?;
//!     let value_hash = tree.hasher().value_hash(b"value");
//!     assert_eq!(tree.get(b"key")?, Some(value_hash));
//!
//!     // Prove the entry against the current root
//!     let root = tree.root();
//!     let proof = tree.prove(b"key")?;
//!     assert!(verify_proof(&proof, &root, b"key", b"value", tree.hasher()));
//!
//!     // Write the new nodes into the database
//!     tree.commit()?;
//!
//!     tree.delete(b"key")?;
//!     assert_eq!(tree.get(b"key")?, None);
//!     assert_eq!(tree.root(), tree.hasher().placeholder());
//!     Ok(())
//! }
//! # example().unwrap();
//! ```
//!
//! # Lazy loading
//! `get()` and `prove()` take `&mut self`: reaching a node that has not been loaded yet
//! replaces it in memory with its decoded record. This never changes the tree's logical
//! content, but requires exclusive access during the traversal.

pub use self::consts::HASH_LEN;

/// A type representing length of `Bits`.
pub type BitsLen = u16;

/// A `Result` type redefined for error handling. The same as `std::result::Result<T, Errors>`.
pub type Result<T> = std::result::Result<T, Errors>;

/// A type indicating fixed length byte-array. This has the length of `HASH_LEN`.
pub type Hash = [u8; HASH_LEN];

/// A type indicating database selected by default.
pub type DefaultDatabase = database::MemoryDB;

/// A type indicating hasher selected by default.
pub type DefaultHasher = hasher::Blake3;

pub use self::bits::Bits;
pub use self::database::{CachedDB, Database, MemoryDB};
pub use self::deepsubtree::DeepSubTree;
pub use self::hasher::{Hasher, IdentityPath, PathHasher, TreeHasher};
pub use self::node::{Kind, Node, Record};
pub use self::proof::{
    compact_proof, decompact_proof, verify_compact_proof, verify_proof, SparseCompactMerkleProof,
    SparseMerkleProof,
};
pub use self::tree::{Options, SparseMerkleTree};

#[derive(Debug, thiserror::Error)]
/// An `Error` type defined for handling general errors.
pub enum Errors {
    /// `delete()` was asked to remove a key the tree does not hold.
    #[error("key not present")]
    KeyNotPresent,
    /// A traversal reached a node whose record is not in the database.
    #[error("node {0} is not loaded")]
    KeyNotLoaded(String),
    #[error("bad proof: {0}")]
    BadProof(String),
    /// An error surfaced by the database, verbatim.
    #[error("database: {0}")]
    Store(String),
    /// A record does not parse, or does not hash to the digest it was stored under.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[macro_use]
pub mod utils;
pub mod bits;
pub mod consts;
pub mod database;
pub mod deepsubtree;
pub mod hasher;
pub mod node;
pub mod proof;
pub mod tree;
