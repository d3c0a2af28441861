//! Sharded counters over a transactional key/value store.
//!
//! A single logical counter that takes heavy concurrent write traffic will
//! serialize every mutation on one record. This crate spreads that traffic
//! across independently writable shard records: each increment or decrement
//! lands on one randomly chosen shard inside a minimal transaction, and a
//! read sums all shards. Writes scale with the shard count; reads pay an
//! O(shard_count) aggregation, softened by a best-effort cache with a
//! bounded TTL.
//!
//! The storage engine, cache backend, and work queue are trait seams
//! ([`Storage`], [`CounterCache`], [`WorkQueue`]); in-memory
//! implementations back the tests and single-process deployments, and
//! [`storage::RocksStorage`] persists on rocksdb.
//!
//! ```
//! use std::sync::Arc;
//! use countdbx::{CounterConfig, CounterService, MemoryCache, MemoryQueue, MemoryStorage};
//!
//! let service = CounterService::new(
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(MemoryCache::new(1024).expect("capacity")),
//!     Arc::new(MemoryQueue::new()),
//!     CounterConfig::default(),
//! )
//! .expect("config");
//!
//! service.increment("page-views", 1, None).expect("increment");
//! let counter = service.get_counter("page-views", false).expect("read");
//! assert_eq!(counter.count, 1);
//! ```

pub mod cache;
pub mod config;
pub mod counter;
pub mod error;
pub mod logging;
pub mod queue;
pub mod service;
pub mod shard;
pub mod storage;

pub use cache::{CachedCount, CounterCache, MemoryCache};
pub use config::CounterConfig;
pub use counter::{
    Counter, CounterData, CounterOperation, CounterShardData, CounterStatus, CounterUpdate,
    OperationKind, ShardKey,
};
pub use error::{CounterError, Result};
pub use queue::{DeletionJob, MemoryQueue, WorkQueue};
pub use service::CounterService;
pub use storage::{MemoryStorage, RocksStorage, Storage, StorageTx};
