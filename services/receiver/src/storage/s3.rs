use super::{parse_record, validate_key, StorageBackend, StorageError};
use crate::codec::Record;
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// Backend storing one JSON object per record in an S3 bucket
pub struct S3Backend {
    client: S3Client,
    bucket: String,
}

impl S3Backend {
    /// Create a new S3 backend
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 storage backend initialized"
        );

        Self::with_client(client, config.bucket.clone())
    }

    /// Wrap an already configured client
    pub fn with_client(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn unavailable<E, R>(action: &str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    StorageError::Unavailable(format!("{action}: {}", DisplayErrorContext(err)))
}

/// Map a failed conditional put. An object already stored under the key
/// surfaces as `PreconditionFailed` (or `ConditionalRequestConflict` when a
/// concurrent write raced this one).
fn put_error<R>(key: &str, err: SdkError<PutObjectError, R>) -> StorageError
where
    R: std::fmt::Debug,
{
    let exists = matches!(
        err.as_service_error().and_then(|e| e.code()),
        Some("PreconditionFailed" | "ConditionalRequestConflict")
    );

    if exists {
        StorageError::InvalidKey {
            key: key.to_string(),
            reason: "a record with this key already exists".to_string(),
        }
    } else {
        unavailable("put object", err)
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    #[instrument(skip(self, record), fields(backend = "s3"))]
    async fn write(&self, key: &str, record: &Record) -> Result<(), StorageError> {
        validate_key(key)?;

        let bytes = serde_json::to_vec(record).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let size_bytes = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type("application/json")
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| put_error(key, e))?;

        debug!(size_bytes, "Record object written");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| unavailable("list objects", e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(count = keys.len(), "Listed record objects");
        Ok(keys)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn read(&self, key: &str) -> Result<Record, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                return Err(unavailable("get object", e));
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Unavailable(format!("read object body: {e}")))?
            .into_bytes();

        parse_record(key, &bytes)
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
