use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CounterError>;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter names may not be blank")]
    BlankName,
    #[error("mutation amounts must be positive")]
    InvalidAmount,
    #[error("shard count must be greater than zero")]
    InvalidShardCount,
    #[error("counter '{0}' already exists")]
    CounterExists(String),
    #[error("counter '{0}' was not found")]
    CounterNotFound(String),
    #[error("counter '{name}' is in the {status} state but must be in one of [{required}]")]
    CounterNotMutable {
        name: String,
        status: &'static str,
        required: &'static str,
    },
    #[error("counter '{name}' cannot be moved to the {status} state directly")]
    StatusNotSettable { name: String, status: &'static str },
    #[error("cannot reduce counter '{name}' from {current} to {requested} shards")]
    ShardCountShrink {
        name: String,
        current: u32,
        requested: u32,
    },
    #[error("deletion job for counter '{name}' found it in the {status} state instead of deleting")]
    DeletionProtocol { name: String, status: &'static str },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CounterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CounterError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
