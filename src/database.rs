//! A module for the key/value stores node records are persisted in.
//!
//! Records are stored under their digests. No other keys are reserved: the identity of a
//! tree is entirely the root digest its owner holds.
use crate::*;
use hashbrown::{HashMap, HashSet};

/// The key/value store contract the tree relies on.
pub trait Database {
    fn new(dbpath: &str) -> Result<Self>
    where
        Self: Sized;

    /// Get the value stored under `key`, `None` if there is none.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Called before a batch of writes.
    fn init_batch(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once a batch of writes is complete.
    fn finish_batch(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryDB {
    db: HashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryDB {
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.db.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.db.keys().map(|k| k.as_slice())
    }
}

impl Database for MemoryDB {
    fn new(_dbname: &str) -> Result<Self> {
        Ok(MemoryDB::default())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.db.insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.db.remove(key);
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
/// A write-back cache over another `Database`.
///
/// Writes and deletes are buffered in memory. Reads consult the write buffer, then the
/// delete set, then the underlying database. `finish_batch()` flushes the deletes first,
/// then the writes, and clears both buffers.
pub struct CachedDB<D> {
    db: D,
    writes: HashMap<Vec<u8>, Vec<u8>>,
    deletes: HashSet<Vec<u8>>,
}

impl<D: Database> CachedDB<D> {
    pub fn wrap(db: D) -> Self {
        CachedDB {
            db,
            writes: HashMap::new(),
            deletes: HashSet::new(),
        }
    }

    pub fn inner(&self) -> &D {
        &self.db
    }

    pub fn into_inner(self) -> D {
        self.db
    }

    /// Number of buffered writes and deletes.
    pub fn pending(&self) -> usize {
        self.writes.len() + self.deletes.len()
    }

    /// Drop every buffered operation.
    pub fn discard(&mut self) {
        self.writes.clear();
        self.deletes.clear();
    }

    pub fn flush(&mut self) -> Result<()> {
        let (writes, deletes) = (self.writes.len(), self.deletes.len());
        for key in self.deletes.drain() {
            self.db.delete(&key)?;
        }
        for (key, value) in self.writes.drain() {
            self.db.put(&key, value)?;
        }
        self.db.finish_batch()?;
        log::debug!("cached db: flushed {} deletes, {} writes", deletes, writes);
        Ok(())
    }
}

impl<D: Database> Database for CachedDB<D> {
    fn new(dbpath: &str) -> Result<Self> {
        Ok(CachedDB::wrap(D::new(dbpath)?))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        if self.deletes.contains(key) {
            return Ok(None);
        }
        self.db.get(key)
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.deletes.remove(key);
        self.writes.insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writes.remove(key);
        self.deletes.insert(key.to_vec());
        Ok(())
    }

    fn finish_batch(&mut self) -> Result<()> {
        self.flush()
    }
}

#[cfg(feature = "db_rocksdb")]
pub use self::rocks::RocksDB;

#[cfg(feature = "db_rocksdb")]
mod rocks {
    use crate::{Database, Errors, Result};
    use rocksdb::DB;

    impl From<rocksdb::Error> for Errors {
        fn from(err: rocksdb::Error) -> Self {
            Errors::Store(err.to_string())
        }
    }

    #[derive(Debug)]
    pub struct RocksDB {
        db: DB,
    }

    impl Database for RocksDB {
        fn new(dbpath: &str) -> Result<Self> {
            let db = DB::open_default(dbpath)?;
            Ok(RocksDB { db })
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.db.get(key)?)
        }

        fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
            Ok(self.db.put(key, value)?)
        }

        fn delete(&mut self, key: &[u8]) -> Result<()> {
            Ok(self.db.delete(key)?)
        }
    }
}

#[cfg(feature = "db_sled")]
pub use self::sled_db::Sled;

#[cfg(feature = "db_sled")]
mod sled_db {
    use crate::{Database, Errors, Result};

    impl From<sled::Error> for Errors {
        fn from(err: sled::Error) -> Self {
            Errors::Store(err.to_string())
        }
    }

    #[derive(Clone, Debug)]
    pub struct Sled {
        db: sled::Db,
    }

    impl Database for Sled {
        fn new(dbpath: &str) -> Result<Self> {
            let db = sled::open(dbpath)?;
            Ok(Sled { db })
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.db.get(key)?.map(|v| v.to_vec()))
        }

        fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
            self.db.insert(key, value)?;
            Ok(())
        }

        fn delete(&mut self, key: &[u8]) -> Result<()> {
            self.db.remove(key)?;
            Ok(())
        }

        fn finish_batch(&mut self) -> Result<()> {
            self.db.flush()?;
            Ok(())
        }
    }
}
