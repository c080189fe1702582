//! Storage backends for ingested records.
//!
//! Every backend offers the same three operations over JSON objects named by
//! key: write one record, enumerate every key, read one record back. Which
//! backend a process uses is decided once at startup (see `main.rs`); nothing
//! below branches on the deployment environment.

mod local;
mod s3;

pub use local::LocalBackend;
pub use s3::S3Backend;

use crate::codec::Record;
use async_trait::async_trait;
use std::path::{Component, Path};
use thiserror::Error;

/// Suffix every storage key must carry.
pub const KEY_SUFFIX: &str = ".json";

/// Errors raised by storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record {key} is not a valid JSON object: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Uniform write/list/read contract over a storage medium.
///
/// Implementations must tolerate arbitrary interleavings of calls from
/// concurrent requests. Keys are never rewritten, so no locking is needed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist `record` under `key`. Returns once the medium has accepted
    /// the data.
    async fn write(&self, key: &str, record: &Record) -> Result<(), StorageError>;

    /// Enumerate every stored key in the backend's listing order.
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;

    /// Load the record stored under `key`.
    async fn read(&self, key: &str) -> Result<Record, StorageError>;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// Check that a key is usable as a record object name.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let stem = key
        .strip_suffix(KEY_SUFFIX)
        .ok_or_else(|| invalid("key must end in .json"))?;
    if stem.is_empty() || stem.ends_with('/') {
        return Err(invalid("key has an empty name"));
    }
    check_relative(key)
}

/// Reject keys that are absolute or climb out of the storage root.
pub(crate) fn check_relative(key: &str) -> Result<(), StorageError> {
    let path = Path::new(key);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(StorageError::InvalidKey {
                    key: key.to_string(),
                    reason: "key must be a relative path inside the store".to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Parse stored bytes into a record, labelling failures with the key.
pub(crate) fn parse_record(key: &str, bytes: &[u8]) -> Result<Record, StorageError> {
    serde_json::from_slice::<Record>(bytes).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
