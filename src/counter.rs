//! Record types and key construction for sharded counters.
//!
//! A logical counter is one aggregate record ([`CounterData`]) plus up to
//! `shard_count` shard records ([`CounterShardData`]). The aggregate carries
//! metadata and the lifecycle status; the shards carry the partial counts
//! that are summed on read. Shard records are created lazily on first write
//! to their index, so an absent shard reads as zero.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CounterError, Result};

const SEP: u8 = 0x1F;
const PREFIX_COUNTER: &str = "cnt";
const PREFIX_SHARD: &str = "shard";

/// Separator between the counter name and the shard index in a shard id.
///
/// Kept for compatibility with the historical `"{name}-{index}"` layout. The
/// index is recovered by taking the substring after the *last* separator,
/// which is ambiguous for counter names that themselves end in `-<digits>`:
/// shard 2 of counter `"c-1"` has the same id as shard 12 of counter `"c"`.
/// Counter and shard records live under distinct key prefixes, so the
/// ambiguity affects only callers that parse shard ids.
pub const SHARD_KEY_SEPARATOR: char = '-';

/// Lifecycle status of a counter aggregate.
///
/// `ExpandingShards`, `ContractingShards`, and `Resetting` are reserved for
/// shard-rebalancing flows; no operation in this crate moves a counter into
/// them, but counters found in those states have their guards enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStatus {
    Available,
    ReadOnlyCount,
    ExpandingShards,
    ContractingShards,
    Resetting,
    Deleting,
}

impl CounterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterStatus::Available => "available",
            CounterStatus::ReadOnlyCount => "read_only_count",
            CounterStatus::ExpandingShards => "expanding_shards",
            CounterStatus::ContractingShards => "contracting_shards",
            CounterStatus::Resetting => "resetting",
            CounterStatus::Deleting => "deleting",
        }
    }

    /// Whether increments and decrements are allowed in this state.
    pub fn is_amount_mutatable(self) -> bool {
        matches!(self, CounterStatus::Available)
    }

    /// Whether description, shard count, status, and tags may change.
    pub fn is_detail_mutatable(self) -> bool {
        matches!(
            self,
            CounterStatus::Available | CounterStatus::ReadOnlyCount
        )
    }

    /// Whether callers may move a counter into this state via a detail
    /// update. Deletion and rebalancing states are entered only by their
    /// own protocols.
    pub fn is_settable_target(self) -> bool {
        self.is_detail_mutatable()
    }

    pub fn ensure_amount_mutatable(self, name: &str) -> Result<()> {
        if self.is_amount_mutatable() {
            Ok(())
        } else {
            Err(CounterError::CounterNotMutable {
                name: name.to_string(),
                status: self.as_str(),
                required: "available",
            })
        }
    }

    pub fn ensure_detail_mutatable(self, name: &str) -> Result<()> {
        if self.is_detail_mutatable() {
            Ok(())
        } else {
            Err(CounterError::CounterNotMutable {
                name: name.to_string(),
                status: self.as_str(),
                required: "available, read_only_count",
            })
        }
    }
}

/// The aggregate record, one per counter name.
///
/// `shard_count` is monotonically non-decreasing over the aggregate's
/// lifetime; [`crate::service::CounterService::update_counter_details`]
/// rejects any reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterData {
    pub name: String,
    pub status: CounterStatus,
    pub shard_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub index_tags: BTreeSet<String>,
}

impl CounterData {
    pub fn new(name: impl Into<String>, shard_count: u32) -> Self {
        Self {
            name: name.into(),
            status: CounterStatus::Available,
            shard_count,
            description: None,
            index_tags: BTreeSet::new(),
        }
    }

    pub fn storage_key(&self) -> Vec<u8> {
        counter_key(&self.name)
    }
}

/// One shard record. Absent shards are equivalent to a zero count.
///
/// `count` is not floored at zero: a shard may go negative when decrements
/// land on a shard that recorded fewer increments, as long as the logical
/// sum stays meaningful to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterShardData {
    pub id: String,
    pub count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CounterShardData {
    pub fn new(name: &str, index: u32) -> Self {
        let now = Utc::now();
        Self {
            id: ShardKey::new(name, index).into_id(),
            count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Composite key of a shard record: `"{name}-{index}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardKey {
    id: String,
}

impl ShardKey {
    pub fn new(name: &str, index: u32) -> Self {
        Self {
            id: format!("{name}{SHARD_KEY_SEPARATOR}{index}"),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_id(self) -> String {
        self.id
    }

    /// Recovers the shard index from the substring after the last separator.
    /// Returns `None` when the id does not end in a parseable index.
    pub fn shard_index(&self) -> Option<u32> {
        let (_, suffix) = self.id.rsplit_once(SHARD_KEY_SEPARATOR)?;
        suffix.parse().ok()
    }

    pub fn storage_key(&self) -> Vec<u8> {
        key_with_segments(&[PREFIX_SHARD, &self.id])
    }
}

pub fn counter_key(name: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_COUNTER, name])
}

pub(crate) fn ensure_counter_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(CounterError::BlankName)
    } else {
        Ok(())
    }
}

fn key_with_segments(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    let mut iter = parts.iter();
    if let Some(first) = iter.next() {
        key.extend_from_slice(first.as_bytes());
    }
    for part in iter {
        key.push(SEP);
        key.extend_from_slice(part.as_bytes());
    }
    key
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Increment,
    Decrement,
}

/// Result of a single shard mutation. Not persisted.
#[derive(Debug, Clone)]
pub struct CounterOperation {
    pub operation_id: Uuid,
    pub shard_key: ShardKey,
    pub kind: OperationKind,
    /// Magnitude of the mutation, always non-negative.
    pub applied_amount: u64,
    pub applied_at: DateTime<Utc>,
}

/// Read view of a counter: the aggregate plus an observed count.
///
/// The count may come from the cache and lag the shard records by up to the
/// configured cache TTL.
#[derive(Debug, Clone)]
pub struct Counter {
    pub name: String,
    pub count: i64,
    pub status: CounterStatus,
    pub shard_count: u32,
    pub description: Option<String>,
    pub index_tags: BTreeSet<String>,
}

impl Counter {
    pub(crate) fn from_data(data: CounterData, count: i64) -> Self {
        Self {
            name: data.name,
            count,
            status: data.status,
            shard_count: data.shard_count,
            description: data.description,
            index_tags: data.index_tags,
        }
    }
}

/// Input for a detail update. The count itself is never updated this way;
/// increments and decrements are the only count mutations.
#[derive(Debug, Clone)]
pub struct CounterUpdate {
    pub name: String,
    pub description: Option<String>,
    pub shard_count: u32,
    pub status: CounterStatus,
    pub index_tags: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_guard_only_allows_available() {
        assert!(CounterStatus::Available.ensure_amount_mutatable("c").is_ok());
        for status in [
            CounterStatus::ReadOnlyCount,
            CounterStatus::ExpandingShards,
            CounterStatus::ContractingShards,
            CounterStatus::Resetting,
            CounterStatus::Deleting,
        ] {
            let err = status.ensure_amount_mutatable("c").unwrap_err();
            assert!(matches!(
                err,
                CounterError::CounterNotMutable { status: s, .. } if s == status.as_str()
            ));
        }
    }

    #[test]
    fn detail_guard_allows_read_only_count() {
        assert!(CounterStatus::Available.ensure_detail_mutatable("c").is_ok());
        assert!(CounterStatus::ReadOnlyCount
            .ensure_detail_mutatable("c")
            .is_ok());
        assert!(CounterStatus::Deleting.ensure_detail_mutatable("c").is_err());
        assert!(CounterStatus::Resetting.ensure_detail_mutatable("c").is_err());
    }

    #[test]
    fn settable_targets_exclude_protocol_states() {
        assert!(CounterStatus::Available.is_settable_target());
        assert!(CounterStatus::ReadOnlyCount.is_settable_target());
        assert!(!CounterStatus::Deleting.is_settable_target());
        assert!(!CounterStatus::ExpandingShards.is_settable_target());
        assert!(!CounterStatus::ContractingShards.is_settable_target());
        assert!(!CounterStatus::Resetting.is_settable_target());
    }

    #[test]
    fn shard_key_round_trips_index() {
        let key = ShardKey::new("requests", 7);
        assert_eq!(key.id(), "requests-7");
        assert_eq!(key.shard_index(), Some(7));
    }

    #[test]
    fn shard_key_parsing_is_ambiguous_for_dashed_names() {
        // Shard 2 of "c-1" and shard 12 of "c" collide at the id level.
        let dashed = ShardKey::new("c-1", 2);
        let plain = ShardKey::new("c", 12);
        assert_eq!(dashed.id(), plain.id());
        // Last-separator parsing attributes the whole suffix to the index.
        assert_eq!(dashed.shard_index(), Some(12));
    }

    #[test]
    fn counter_and_shard_keys_use_distinct_prefixes() {
        let counter = counter_key("c");
        let shard = ShardKey::new("c", 0).storage_key();
        assert_ne!(counter, shard);
        assert!(counter.starts_with(b"cnt"));
        assert!(shard.starts_with(b"shard"));
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(ensure_counter_name("visits").is_ok());
        assert!(matches!(
            ensure_counter_name("").unwrap_err(),
            CounterError::BlankName
        ));
        assert!(matches!(
            ensure_counter_name("   ").unwrap_err(),
            CounterError::BlankName
        ));
    }

    #[test]
    fn new_counter_data_starts_available() {
        let data = CounterData::new("c", 3);
        assert_eq!(data.status, CounterStatus::Available);
        assert_eq!(data.shard_count, 3);
        assert!(data.description.is_none());
        assert!(data.index_tags.is_empty());
    }
}
