//! POST handling: decode, stamp, key, store.

use crate::codec::{self, DecodeError};
use crate::key::{format_timestamp, key_for_instant, TimeSource};
use crate::storage::{StorageBackend, StorageError, KEY_SUFFIX};
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Field stamped with the server's receipt time.
pub const RECEIVED_FIELD: &str = "received";

/// Errors that can occur while ingesting a record
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Bad payload: {0}")]
    BadPayload(#[from] DecodeError),

    #[error("Failed to store record: {0}")]
    StoreFailed(#[from] StorageError),
}

/// Ingest one payload and return a confirmation for the caller.
///
/// The clock is read once; the same instant becomes the record's `received`
/// field and the leading part of its key. A caller-supplied `received` is
/// overwritten. The write is attempted exactly once.
#[instrument(skip(payload, storage, clock), fields(backend = storage.name(), payload_len = payload.len()))]
pub async fn ingest(
    payload: &str,
    storage: &dyn StorageBackend,
    clock: &dyn TimeSource,
) -> Result<String, IngestError> {
    let started = Instant::now();

    let mut record = codec::decode(payload).map_err(|e| {
        warn!(error = %e, "Rejected malformed payload");
        metrics::counter!("receiver.records.rejected").increment(1);
        e
    })?;

    let now = clock.now();
    let received = format_timestamp(&now);
    record.insert(RECEIVED_FIELD.to_string(), Value::String(received));

    let key = format!("{}{}", key_for_instant(&now), KEY_SUFFIX);
    debug!(key = %key, fields = record.len(), "Writing record");

    storage.write(&key, &record).await.map_err(|e| {
        warn!(key = %key, error = %e, "Failed to store record");
        metrics::counter!("receiver.records.failed").increment(1);
        e
    })?;

    metrics::counter!("receiver.records.ingested").increment(1);
    metrics::histogram!("receiver.ingest.duration_seconds")
        .record(started.elapsed().as_secs_f64());

    info!(key = %key, "Record stored");
    Ok(format!("Record stored as {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Record;
    use crate::key::{FixedClock, DEFAULT_TIME_ZONE};
    use crate::storage::{LocalBackend, MockStorageBackend};
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashSet;

    fn clock() -> FixedClock {
        FixedClock::new(
            DEFAULT_TIME_ZONE
                .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
                .single()
                .unwrap(),
        )
    }

    fn local(dir: &tempfile::TempDir) -> LocalBackend {
        LocalBackend::new(dir.path(), vec![".git".to_string()])
    }

    #[tokio::test]
    async fn test_ingest_stamps_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local(&dir);

        let reply = ingest("{'name': 'Ann', 'rank': 'Colonel'}", &storage, &clock())
            .await
            .unwrap();

        let keys = storage.list_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        let key = &keys[0];
        assert!(key.starts_with("2024-01-02T030405-0500."));
        assert!(key.ends_with(".json"));
        assert!(reply.contains(key.as_str()));

        let stored = storage.read(key).await.unwrap();
        assert_eq!(
            Value::Object(stored.clone()),
            json!({"name": "Ann", "rank": "Colonel", "received": "2024-01-02T030405-0500"})
        );
        assert_eq!(
            codec::encode_text(&stored),
            "{'name': 'Ann', 'rank': 'Colonel', 'received': '2024-01-02T030405-0500'}"
        );
    }

    #[tokio::test]
    async fn test_ingest_overwrites_caller_received() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local(&dir);

        ingest("{'received': 'yesterday', 'n': 1}", &storage, &clock())
            .await
            .unwrap();

        let key = storage.list_keys().await.unwrap().remove(0);
        let stored = storage.read(&key).await.unwrap();
        assert_eq!(stored["received"], json!("2024-01-02T030405-0500"));
        assert_eq!(stored["n"], json!(1));
        // Field keeps its original position.
        assert_eq!(stored.keys().next().map(String::as_str), Some("received"));
    }

    #[tokio::test]
    async fn test_ingest_bad_payload_never_writes() {
        let mut storage = MockStorageBackend::new();
        storage.expect_name().return_const("mock");
        storage.expect_write().never();

        let result = ingest("__import__('os')", &storage, &clock()).await;
        assert!(matches!(result, Err(IngestError::BadPayload(_))));
    }

    #[tokio::test]
    async fn test_ingest_store_failure_single_attempt() {
        let mut storage = MockStorageBackend::new();
        storage.expect_name().return_const("mock");
        storage
            .expect_write()
            .times(1)
            .returning(|_, _| Err(StorageError::Unavailable("disk offline".to_string())));

        let result = ingest("{'a': 1}", &storage, &clock()).await;
        assert!(matches!(
            result,
            Err(IngestError::StoreFailed(StorageError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_ingest_passes_decoded_fields_to_storage() {
        let mut storage = MockStorageBackend::new();
        storage.expect_name().return_const("mock");
        storage
            .expect_write()
            .withf(|key: &str, record: &Record| {
                key.starts_with("2024-01-02T030405-0500.")
                    && key.ends_with(".json")
                    && record.get("platform") == Some(&json!("linux"))
                    && record.get("ok") == Some(&json!(true))
                    && record.get("received") == Some(&json!("2024-01-02T030405-0500"))
            })
            .times(1)
            .returning(|_, _| Ok(()));

        ingest("{'platform': 'linux', 'ok': True}", &storage, &clock())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_ingest_same_payload_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local(&dir);
        let clock = clock();

        let tasks = (0..32).map(|_| ingest("{'name': 'Ann'}", &storage, &clock));
        let results = futures::future::join_all(tasks).await;
        assert!(results.iter().all(Result::is_ok));

        let keys: HashSet<String> = storage.list_keys().await.unwrap().into_iter().collect();
        assert_eq!(keys.len(), 32);
    }
}
