//! Persistent storage on rocksdb.
//!
//! Transactions take a process-wide write lock and stage their writes in
//! memory; the commit is a single `WriteBatch`, so either every staged write
//! lands or none do. Reads inside a transaction see the staged overlay
//! first, then the database.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use metrics::{counter, histogram};
use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, MultiThreaded, Options, WriteBatch};

use crate::error::{CounterError, Result};

use super::{Storage, StorageTx};

pub struct RocksStorage {
    db: DBWithThreadMode<MultiThreaded>,
    write_lock: Mutex<()>,
}

impl RocksStorage {
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, path)
            .map_err(|err| CounterError::Storage(err.to_string()))?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }
}

struct RocksTx<'a> {
    db: &'a DBWithThreadMode<MultiThreaded>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl StorageTx for RocksTx<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.get(key) {
            return Ok(staged.clone());
        }
        self.db
            .get(key)
            .map_err(|err| CounterError::Storage(err.to_string()))
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

impl Storage for RocksStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let result = self
            .db
            .get(key)
            .map_err(|err| CounterError::Storage(err.to_string()));
        record_store_op(
            "rocksdb_get",
            if result.is_ok() { "ok" } else { "err" },
            start.elapsed().as_secs_f64(),
        );
        result
    }

    fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let start = Instant::now();
        let result: Result<Vec<Option<Vec<u8>>>> = self
            .db
            .multi_get(keys)
            .into_iter()
            .map(|value| value.map_err(|err| CounterError::Storage(err.to_string())))
            .collect();
        record_store_op(
            "rocksdb_multi_get",
            if result.is_ok() { "ok" } else { "err" },
            start.elapsed().as_secs_f64(),
        );
        result
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let start = Instant::now();
        let result = self
            .db
            .put(key, value)
            .map_err(|err| CounterError::Storage(err.to_string()));
        record_store_op(
            "rocksdb_put",
            if result.is_ok() { "ok" } else { "err" },
            start.elapsed().as_secs_f64(),
        );
        result
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let start = Instant::now();
        let result = self
            .db
            .delete(key)
            .map_err(|err| CounterError::Storage(err.to_string()));
        record_store_op(
            "rocksdb_delete",
            if result.is_ok() { "ok" } else { "err" },
            start.elapsed().as_secs_f64(),
        );
        result
    }

    fn transaction<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut dyn StorageTx) -> Result<T>,
    {
        let _guard = self.write_lock.lock();
        let mut tx = RocksTx {
            db: &self.db,
            pending: BTreeMap::new(),
        };
        let value = body(&mut tx)?;

        let mut batch = WriteBatch::default();
        for (key, update) in tx.pending {
            match update {
                Some(value) => batch.put(&key, &value),
                None => batch.delete(&key),
            }
        }
        let start = Instant::now();
        let result = self
            .db
            .write(batch)
            .map_err(|err| CounterError::Storage(err.to_string()));
        record_store_op(
            "rocksdb_write_batch",
            if result.is_ok() { "ok" } else { "err" },
            start.elapsed().as_secs_f64(),
        );
        result?;
        Ok(value)
    }
}

fn record_store_op(operation: &'static str, status: &'static str, duration: f64) {
    let labels = [("operation", operation), ("status", status)];
    counter!("countdbx_store_operations_total", &labels).increment(1);
    histogram!("countdbx_store_operation_duration_seconds", &labels).record(duration);
}
