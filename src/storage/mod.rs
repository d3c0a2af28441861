//! The transactional key/value storage seam.
//!
//! The counter engine never talks to a storage backend directly; it goes
//! through [`Storage`], which provides plain reads and writes plus a
//! [`Storage::transaction`] higher-order function. Transaction bodies must
//! be safe to re-execute: the collaborator is free to retry them on
//! conflict, so the only side effects a body may have are the buffered
//! writes it stages on its [`StorageTx`] handle.

mod rocks;

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;

pub use rocks::RocksStorage;

/// Handle scoped to one transaction. Writes are buffered and become visible
/// only if the enclosing [`Storage::transaction`] call returns `Ok`.
pub trait StorageTx {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Non-transactional bulk read. Entries come back in key order, `None`
    /// for absent keys.
    fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Runs `body` atomically. The body may be invoked more than once; a
    /// body error aborts the transaction and discards its writes.
    fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: FnMut(&mut dyn StorageTx) -> Result<T>,
        Self: Sized;
}

/// In-process storage backed by a `BTreeMap`, used by tests and embedded
/// deployments. Transactions are serialized by a write lock, so a body runs
/// at most once here.
#[derive(Default)]
pub struct MemoryStorage {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    write_lock: Mutex<()>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTx<'a> {
    store: &'a MemoryStorage,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl StorageTx for MemoryTx<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.store.map.read().get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.pending.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let map = self.map.read();
        Ok(keys.iter().map(|key| map.get(key).cloned()).collect())
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.map.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn transaction<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut dyn StorageTx) -> Result<T>,
    {
        let _guard = self.write_lock.lock();
        let mut tx = MemoryTx {
            store: self,
            pending: BTreeMap::new(),
        };
        let value = body(&mut tx)?;
        let mut map = self.map.write();
        for (key, update) in tx.pending {
            match update {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(value)
    }
}
