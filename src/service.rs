//! The counter engine.
//!
//! `CounterService` orchestrates reads (shard aggregation plus the cache),
//! writes (a transaction scoped to the aggregate and exactly one shard),
//! detail updates, and the two-phase deletion protocol. The storage, cache,
//! and queue collaborators are trait seams so deployments can swap backends
//! without touching counter semantics.
//!
//! Consistency model: each shard mutation is atomic within its own
//! transaction, the aggregated sum is eventually consistent, and the cache
//! is advisory. Cache failures of any kind are logged and swallowed here;
//! they never reach the caller, because every cached value can be rebuilt
//! by summing shard records.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    cache::CounterCache,
    config::CounterConfig,
    counter::{
        counter_key, ensure_counter_name, Counter, CounterData, CounterOperation,
        CounterShardData, CounterStatus, CounterUpdate, OperationKind, ShardKey,
    },
    error::{CounterError, Result},
    queue::{DeletionJob, WorkQueue},
    shard,
    storage::{Storage, StorageTx},
};

/// How many read-compute-swap rounds a cache increment attempts before
/// giving up and evicting the entry.
const CACHE_CAS_ATTEMPTS: usize = 10;

pub struct CounterService<S, C, Q> {
    storage: Arc<S>,
    cache: Arc<C>,
    queue: Arc<Q>,
    config: CounterConfig,
}

impl<S, C, Q> CounterService<S, C, Q>
where
    S: Storage,
    C: CounterCache,
    Q: WorkQueue,
{
    pub fn new(storage: Arc<S>, cache: Arc<C>, queue: Arc<Q>, config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            cache,
            queue,
            config,
        })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<S> {
        Arc::clone(&self.storage)
    }

    // /////////////////////////////
    // Read path
    // /////////////////////////////

    /// Creates a counter explicitly. Fails when one already exists.
    pub fn create_counter(&self, name: &str) -> Result<Counter> {
        ensure_counter_name(name)?;
        let data = self.storage.transaction(|tx| {
            if tx.get(&counter_key(name))?.is_some() {
                return Err(CounterError::CounterExists(name.to_string()));
            }
            let data = CounterData::new(name, self.config.initial_shard_count);
            tx.put(&counter_key(name), serde_json::to_vec(&data)?)?;
            Ok(data)
        })?;
        Ok(Counter::from_data(data, 0))
    }

    /// Returns the counter, creating the aggregate implicitly when absent.
    ///
    /// A counter in the deleting state always reads as zero. Otherwise the
    /// cached sum is returned when present (unless `skip_cache`); a miss
    /// aggregates every shard record and writes the sum back to the cache
    /// with the configured TTL. The aggregation is O(shard_count) and runs
    /// outside any transaction: a single transaction cannot span arbitrary
    /// numbers of shard records, and per-shard reads are consistent enough
    /// for an eventually consistent sum.
    pub fn get_counter(&self, name: &str, skip_cache: bool) -> Result<Counter> {
        ensure_counter_name(name)?;
        let (data, _) = self.get_or_create_counter_data(name)?;

        if data.status == CounterStatus::Deleting {
            return Ok(Counter::from_data(data, 0));
        }

        if !skip_cache {
            match self.cache.get(name) {
                Ok(Some(cached)) => {
                    debug!(counter = name, value = cached, "cache hit");
                    return Ok(Counter::from_data(data, cached));
                }
                Ok(None) => debug!(counter = name, "cache miss; aggregating shards"),
                Err(err) => warn!(
                    counter = name,
                    error = %err,
                    "cache read failed; aggregating shards"
                ),
            }
        }

        let sum = self.aggregate_shards(&data)?;
        if let Err(err) = self.cache.put(name, sum, self.config.cache_ttl()) {
            warn!(counter = name, error = %err, "cache write failed after aggregation");
        }
        Ok(Counter::from_data(data, sum))
    }

    /// Transactionally loads the aggregate, creating it with the configured
    /// initial shard count when absent. The flag reports whether creation
    /// happened, which lets the mutation path skip a shard lookup that
    /// cannot succeed.
    pub fn get_or_create_counter_data(&self, name: &str) -> Result<(CounterData, bool)> {
        ensure_counter_name(name)?;
        self.storage.transaction(|tx| self.get_or_create_in(tx, name))
    }

    fn get_or_create_in(&self, tx: &mut dyn StorageTx, name: &str) -> Result<(CounterData, bool)> {
        if let Some(raw) = tx.get(&counter_key(name))? {
            Ok((serde_json::from_slice(&raw)?, false))
        } else {
            let data = CounterData::new(name, self.config.initial_shard_count);
            tx.put(&counter_key(name), serde_json::to_vec(&data)?)?;
            Ok((data, true))
        }
    }

    fn aggregate_shards(&self, data: &CounterData) -> Result<i64> {
        let keys: Vec<Vec<u8>> = (0..data.shard_count)
            .map(|index| ShardKey::new(&data.name, index).storage_key())
            .collect();
        let mut sum = 0i64;
        for raw in self.storage.multi_get(&keys)? {
            if let Some(raw) = raw {
                let shard: CounterShardData = serde_json::from_slice(&raw)?;
                sum = sum.saturating_add(shard.count);
            }
        }
        Ok(sum)
    }

    // /////////////////////////////
    // Mutation path
    // /////////////////////////////

    pub fn increment(
        &self,
        name: &str,
        amount: u64,
        operation_id: Option<Uuid>,
    ) -> Result<CounterOperation> {
        let signed = signed_amount(amount)?;
        self.mutate_shard(name, signed, operation_id)
    }

    pub fn decrement(
        &self,
        name: &str,
        amount: u64,
        operation_id: Option<Uuid>,
    ) -> Result<CounterOperation> {
        let signed = signed_amount(amount)?;
        self.mutate_shard(name, -signed, operation_id)
    }

    /// Increment inside a caller-managed transaction. The cache entry is
    /// evicted instead of incremented: this call cannot know whether the
    /// caller's transaction will commit, and the cache must not reflect an
    /// uncertain write.
    pub fn increment_in(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
        amount: u64,
        operation_id: Option<Uuid>,
    ) -> Result<CounterOperation> {
        ensure_counter_name(name)?;
        let signed = signed_amount(amount)?;
        let operation =
            self.mutate_shard_in(tx, name, signed, operation_id.unwrap_or_else(Uuid::new_v4))?;
        self.evict_cache(name);
        Ok(operation)
    }

    /// Decrement counterpart of [`CounterService::increment_in`].
    pub fn decrement_in(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
        amount: u64,
        operation_id: Option<Uuid>,
    ) -> Result<CounterOperation> {
        ensure_counter_name(name)?;
        let signed = signed_amount(amount)?;
        let operation =
            self.mutate_shard_in(tx, name, -signed, operation_id.unwrap_or_else(Uuid::new_v4))?;
        self.evict_cache(name);
        Ok(operation)
    }

    fn mutate_shard(
        &self,
        name: &str,
        signed_amount: i64,
        operation_id: Option<Uuid>,
    ) -> Result<CounterOperation> {
        ensure_counter_name(name)?;
        let operation_id = operation_id.unwrap_or_else(Uuid::new_v4);
        let operation = self
            .storage
            .transaction(|tx| self.mutate_shard_in(tx, name, signed_amount, operation_id))?;

        // The transaction committed; fold the applied amount into the cached
        // sum so readers inside the TTL window stay close to accurate.
        let delta = if signed_amount < 0 {
            -(operation.applied_amount as i64)
        } else {
            operation.applied_amount as i64
        };
        self.increment_cache_atomic(name, delta);
        Ok(operation)
    }

    /// The transactional mutation body. Scoped to the aggregate plus exactly
    /// one shard record so transactions stay small and concurrent mutations
    /// of different shards never conflict. Re-executable: all writes go
    /// through `tx`.
    fn mutate_shard_in(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
        signed_amount: i64,
        operation_id: Uuid,
    ) -> Result<CounterOperation> {
        // Re-check the guard inside the transaction so a concurrent status
        // change is observed before commit.
        let (data, created) = self.get_or_create_in(tx, name)?;
        data.status.ensure_amount_mutatable(name)?;

        let index = shard::select(None, data.shard_count, &mut rand::thread_rng())?;
        let shard_key = ShardKey::new(name, index);

        // A freshly created aggregate cannot own shard records yet, so the
        // lookup is skipped.
        let mut shard = if created {
            CounterShardData::new(name, index)
        } else {
            match tx.get(&shard_key.storage_key())? {
                Some(raw) => serde_json::from_slice(&raw)?,
                None => CounterShardData::new(name, index),
            }
        };

        // Saturate rather than wrap at the i64 bounds.
        shard.count = shard.count.saturating_add(signed_amount);
        shard.updated_at = Utc::now();
        debug!(
            counter = name,
            shard = shard_key.id(),
            amount = signed_amount,
            new_count = shard.count,
            "applying shard mutation"
        );
        tx.put(&shard_key.storage_key(), serde_json::to_vec(&shard)?)?;

        Ok(CounterOperation {
            operation_id,
            shard_key,
            kind: if signed_amount < 0 {
                OperationKind::Decrement
            } else {
                OperationKind::Increment
            },
            applied_amount: signed_amount.unsigned_abs(),
            applied_at: shard.updated_at,
        })
    }

    // /////////////////////////////
    // Cache coherency
    // /////////////////////////////

    /// Atomically folds `amount` into the cached sum for `name`.
    ///
    /// When nothing is cached this does nothing and returns `None`: only the
    /// read path may seed the cache, since only it knows the full sum. A
    /// lost swap race is retried up to the attempt budget; exhaustion or any
    /// cache backend error evicts the entry so the next read repopulates it.
    pub fn increment_cache_atomic(&self, name: &str, amount: i64) -> Option<i64> {
        for attempt in 0..CACHE_CAS_ATTEMPTS {
            let cached = match self.cache.get_versioned(name) {
                Ok(Some(cached)) => cached,
                Ok(None) => {
                    debug!(counter = name, "nothing cached; skipping atomic increment");
                    return None;
                }
                Err(err) => {
                    warn!(counter = name, error = %err, "cache read failed during atomic increment");
                    return self.evict_cache(name);
                }
            };

            let next = cached.value.saturating_add(amount);
            match self
                .cache
                .compare_and_swap(name, cached.version, next, self.config.cache_ttl())
            {
                Ok(true) => return Some(next),
                Ok(false) => {
                    debug!(counter = name, attempt, "lost cache swap race; retrying");
                }
                Err(err) => {
                    warn!(counter = name, error = %err, "cache swap failed during atomic increment");
                    return self.evict_cache(name);
                }
            }
        }

        warn!(
            counter = name,
            attempts = CACHE_CAS_ATTEMPTS,
            "cache swap budget exhausted; evicting entry"
        );
        self.evict_cache(name)
    }

    fn evict_cache(&self, name: &str) -> Option<i64> {
        if let Err(err) = self.cache.delete(name) {
            warn!(counter = name, error = %err, "cache eviction failed");
        }
        None
    }

    // /////////////////////////////
    // Detail updates
    // /////////////////////////////

    /// Updates description, shard count, status, and index tags. The count
    /// itself is never updated here. Shard counts may only grow; shrinking
    /// would orphan counted data in shards above the new bound.
    pub fn update_counter_details(&self, update: &CounterUpdate) -> Result<()> {
        ensure_counter_name(&update.name)?;
        self.storage.transaction(|tx| {
            let Some(raw) = tx.get(&counter_key(&update.name))? else {
                return Err(CounterError::CounterNotFound(update.name.clone()));
            };
            let mut existing: CounterData = serde_json::from_slice(&raw)?;
            existing.status.ensure_detail_mutatable(&update.name)?;

            if !update.status.is_settable_target() {
                return Err(CounterError::StatusNotSettable {
                    name: update.name.clone(),
                    status: update.status.as_str(),
                });
            }
            if update.shard_count < existing.shard_count {
                return Err(CounterError::ShardCountShrink {
                    name: update.name.clone(),
                    current: existing.shard_count,
                    requested: update.shard_count,
                });
            }

            existing.description = update.description.clone();
            existing.shard_count = update.shard_count;
            existing.status = update.status;
            existing.index_tags = update.index_tags.clone();
            tx.put(&counter_key(&update.name), serde_json::to_vec(&existing)?)?;
            Ok(())
        })
    }

    // /////////////////////////////
    // Deletion protocol
    // /////////////////////////////

    /// Phase one: marks the counter as deleting and schedules the sweep.
    ///
    /// The status flip commits first; the job is enqueued only once the flip
    /// is durable, so a job can never observe a counter that was not marked.
    pub fn delete_counter(&self, name: &str) -> Result<()> {
        ensure_counter_name(name)?;
        self.storage.transaction(|tx| {
            let Some(raw) = tx.get(&counter_key(name))? else {
                return Err(CounterError::CounterNotFound(name.to_string()));
            };
            let mut data: CounterData = serde_json::from_slice(&raw)?;
            data.status = CounterStatus::Deleting;
            tx.put(&counter_key(name), serde_json::to_vec(&data)?)?;
            Ok(())
        })?;

        self.queue.enqueue(DeletionJob {
            counter_name: name.to_string(),
            routing: self.config.deletion_queue.clone(),
            enqueued_at: Utc::now(),
        })?;
        info!(counter = name, "counter marked for deletion");
        Ok(())
    }

    /// Phase two: the queue-consumer entrypoint. Idempotent under
    /// at-least-once delivery.
    ///
    /// An absent aggregate means a duplicate or late delivery and is a
    /// no-op. A present aggregate in any state other than deleting means
    /// something mutated the counter mid-deletion; that is a protocol
    /// violation surfaced as an error, not retried.
    pub fn on_deletion_job(&self, name: &str) -> Result<()> {
        ensure_counter_name(name)?;
        let Some(raw) = self.storage.get(&counter_key(name))? else {
            info!(counter = name, "deletion job found no counter record");
            self.evict_cache(name);
            return Ok(());
        };
        let data: CounterData = serde_json::from_slice(&raw)?;
        if data.status != CounterStatus::Deleting {
            return Err(CounterError::DeletionProtocol {
                name: name.to_string(),
                status: data.status.as_str(),
            });
        }

        // Shard counts can exceed what one transaction may span, so the
        // sweep is a plain bulk delete. Each delete is idempotent.
        for index in 0..data.shard_count {
            self.storage
                .delete(&ShardKey::new(name, index).storage_key())?;
        }
        self.storage.delete(&counter_key(name))?;
        self.evict_cache(name);
        info!(counter = name, shards = data.shard_count, "counter deleted");
        Ok(())
    }
}

fn signed_amount(amount: u64) -> Result<i64> {
    if amount == 0 {
        return Err(CounterError::InvalidAmount);
    }
    i64::try_from(amount).map_err(|_| CounterError::InvalidAmount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_amount_rejects_zero_and_overflow() {
        assert!(matches!(
            signed_amount(0).unwrap_err(),
            CounterError::InvalidAmount
        ));
        assert!(matches!(
            signed_amount(u64::MAX).unwrap_err(),
            CounterError::InvalidAmount
        ));
        assert_eq!(signed_amount(21).unwrap(), 21);
    }
}
