use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, DB};

use crate::errors::ChainResult;

/// Buffered mutations committed atomically by [`KeyValueStore::write`].
/// A batch is the only durability boundary; readers never observe a
/// partially applied batch.
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn reset(&mut self) {
        self.ops.clear();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Durable ordered byte map. Iteration is lexicographic over keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> ChainResult<()>;
    fn delete(&self, key: &[u8]) -> ChainResult<()>;
    fn has(&self, key: &[u8]) -> ChainResult<bool>;
    fn iter(&self) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>;
    fn write(&self, batch: WriteBatch) -> ChainResult<()>;
}

pub struct RocksDb {
    db: DB,
}

impl RocksDb {
    pub fn open(path: &Path) -> ChainResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl KeyValueStore for RocksDb {
    fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> ChainResult<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> ChainResult<()> {
        self.db.delete(key)?;
        Ok(())
    }

    fn has(&self, key: &[u8]) -> ChainResult<bool> {
        Ok(self.db.get(key)?.is_some())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        Box::new(
            self.db
                .iterator(IteratorMode::Start)
                .filter_map(|entry| entry.ok())
                .map(|(key, value)| (key.to_vec(), value.to_vec())),
        )
    }

    fn write(&self, batch: WriteBatch) -> ChainResult<()> {
        let mut inner = rocksdb::WriteBatch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => inner.put(key, value),
                BatchOp::Delete(key) => inner.delete(key),
            }
        }
        self.db.write(inner)?;
        Ok(())
    }
}

/// In-memory backend for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryDb {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryDb {
    fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> ChainResult<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> ChainResult<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> ChainResult<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = self
            .map
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Box::new(snapshot.into_iter())
    }

    fn write(&self, batch: WriteBatch) -> ChainResult<()> {
        let mut map = self.map.write();
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        store.put(b"b", b"2").unwrap();
        store.put(b"a", b"1").unwrap();
        assert!(store.has(b"a").unwrap());
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));

        let keys: Vec<Vec<u8>> = store.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        let mut batch = WriteBatch::new();
        batch.put(b"c".to_vec(), b"3".to_vec());
        batch.delete(b"a".to_vec());
        store.write(batch).unwrap();
        assert!(!store.has(b"a").unwrap());
        assert_eq!(store.get(b"c").unwrap(), Some(b"3".to_vec()));

        store.delete(b"b").unwrap();
        assert!(!store.has(b"b").unwrap());
    }

    #[test]
    fn memory_backend() {
        exercise(&MemoryDb::new());
    }

    #[test]
    fn rocksdb_backend() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&RocksDb::open(dir.path()).unwrap());
    }

    #[test]
    fn batch_reset_discards_buffered_ops() {
        let store = MemoryDb::new();
        let mut batch = WriteBatch::new();
        batch.put(b"x".to_vec(), b"1".to_vec());
        assert_eq!(batch.len(), 1);
        batch.reset();
        assert!(batch.is_empty());
        store.write(batch).unwrap();
        assert!(!store.has(b"x").unwrap());
    }
}
