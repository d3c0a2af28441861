use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{CounterError, Result};

pub const DEFAULT_INITIAL_SHARD_COUNT: u32 = 1;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Service configuration.
///
/// `initial_shard_count` sets how many shards newly created counters start
/// with; existing counters keep whatever count they were created or updated
/// with. `deletion_queue` routes deletion jobs; `None` means the default
/// queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    #[serde(default = "default_initial_shard_count")]
    pub initial_shard_count: u32,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_queue: Option<String>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            initial_shard_count: DEFAULT_INITIAL_SHARD_COUNT,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            deletion_queue: None,
        }
    }
}

impl CounterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|err| CounterError::Serialization(err.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_shard_count == 0 {
            return Err(CounterError::InvalidShardCount);
        }
        if let Some(queue) = &self.deletion_queue {
            if queue.trim().is_empty() {
                return Err(CounterError::Config(
                    "deletion queue must be omitted or a non-blank string".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_initial_shard_count() -> u32 {
    DEFAULT_INITIAL_SHARD_COUNT
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CounterConfig::default();
        assert_eq!(config.initial_shard_count, DEFAULT_INITIAL_SHARD_COUNT);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: CounterConfig = toml::from_str("initial_shard_count = 8").unwrap();
        assert_eq!(config.initial_shard_count, 8);
        assert_eq!(config.cache_ttl_secs, DEFAULT_CACHE_TTL_SECS);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(config.deletion_queue.is_none());
    }

    #[test]
    fn zero_shard_count_is_rejected() {
        let config: CounterConfig = toml::from_str("initial_shard_count = 0").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            CounterError::InvalidShardCount
        ));
    }

    #[test]
    fn blank_deletion_queue_is_rejected() {
        let config: CounterConfig = toml::from_str("deletion_queue = \"  \"").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            CounterError::Config(_)
        ));
    }
}
