//! Object store abstraction over AWS S3.
//!
//! This crate provides a thin wrapper around the S3 operations the log
//! curation pipeline needs (paginated listing, metadata lookups, streamed
//! reads and whole-object writes), with consistent error classification.
//!
//! Follows the common-redis pattern: trait-based design with manual mock implementation
//! that's always available for testing.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::Client as AwsS3SdkClient;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum S3Error {
    #[error("Object not found: {0}")]
    NotFound(String),
    /// The endpoint could not be reached at all (dispatch failure or timeout).
    #[error("S3 unreachable: {0}")]
    Unreachable(String),
    #[error("S3 operation failed: {0}")]
    OperationFailed(String),
}

impl S3Error {
    /// Connectivity failures abort the caller's whole unit of work, everything
    /// else is scoped to the object it happened on.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, S3Error::Unreachable(_))
    }
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The subset of `HeadObject` the pipeline looks at. Storage class and
/// restore status are kept as the raw strings S3 returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub storage_class: Option<String>,
    pub restore: Option<String>,
}

/// An object body being read from the store. Bytes are pulled as the reader
/// is polled, so large archives are never held in memory whole.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// S3 client trait that both real and mock implementations use
#[async_trait]
pub trait S3Client: Send + Sync {
    /// List every object under `prefix`, following continuation tokens until exhausted
    async fn list_objects(&self, bucket: &str, prefix: &str)
        -> Result<Vec<ObjectSummary>, S3Error>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, S3Error>;

    /// Whether an object exists at `key`. A missing object is `Ok(false)`, not an error.
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, S3Error>;

    /// Open an object for streaming reads. Errors that happen after the
    /// response headers arrive surface as `io::Error` from the reader.
    async fn get_reader(&self, bucket: &str, key: &str) -> Result<ObjectReader, S3Error>;

    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), S3Error>;
}

fn to_chrono(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn map_sdk_error<E, R>(
    err: SdkError<E, R>,
    operation: &str,
    key: &str,
    is_not_found: fn(&E) -> bool,
) -> S3Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => S3Error::Unreachable(format!(
            "S3 {operation} failed for {key}: {}",
            DisplayErrorContext(&err)
        )),
        SdkError::ServiceError(service) if is_not_found(service.err()) => {
            S3Error::NotFound(key.to_string())
        }
        _ => S3Error::OperationFailed(format!(
            "S3 {operation} failed for {key}: {}",
            DisplayErrorContext(&err)
        )),
    }
}

/// Real S3 client implementation
pub struct S3Impl {
    client: AwsS3SdkClient,
}

impl S3Impl {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl S3Client for S3Impl {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, S3Error> {
        debug!("Listing keys in bucket {} with prefix {}", bucket, prefix);
        let mut objects = Vec::new();
        let mut continuation_token = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(|e| {
                    map_sdk_error(e, "list objects", prefix, |e: &ListObjectsV2Error| {
                        e.is_no_such_bucket()
                    })
                })?;

            if let Some(contents) = output.contents {
                objects.extend(contents.iter().filter_map(|o| {
                    Some(ObjectSummary {
                        key: o.key.clone()?,
                        last_modified: o.last_modified.as_ref().and_then(to_chrono),
                    })
                }));
            }
            match output.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, S3Error> {
        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(e, "head object", key, |e: &HeadObjectError| e.is_not_found())
            })?;

        Ok(ObjectMetadata {
            storage_class: head.storage_class.map(|class| class.as_str().to_string()),
            restore: head.restore,
        })
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, S3Error> {
        match self.head_object(bucket, key).await {
            Ok(_) => Ok(true),
            Err(S3Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_reader(&self, bucket: &str, key: &str) -> Result<ObjectReader, S3Error> {
        let get_object_output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(e, "get object", key, |e: &GetObjectError| e.is_no_such_key())
            })?;

        Ok(Box::pin(get_object_output.body.into_async_read()))
    }

    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), S3Error> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "put object", key, |_| false))?;
        Ok(())
    }
}

/// An object held by [`MockS3Client`].
#[derive(Debug, Clone, Default)]
pub struct MockObject {
    pub body: Vec<u8>,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
    pub restore: Option<String>,
}

impl MockObject {
    pub fn new(body: Vec<u8>, last_modified: DateTime<Utc>) -> Self {
        Self {
            body,
            last_modified: Some(last_modified),
            storage_class: None,
            restore: None,
        }
    }

    pub fn storage_class(mut self, class: &str) -> Self {
        self.storage_class = Some(class.to_string());
        self
    }

    pub fn restore(mut self, header: &str) -> Self {
        self.restore = Some(header.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockS3Call {
    List { bucket: String, prefix: String },
    Head { bucket: String, key: String },
    Exists { bucket: String, key: String },
    Get { bucket: String, key: String },
    Put { bucket: String, key: String },
}

/// Mock S3 client for testing - always available, no conditional compilation needed.
///
/// Objects live in a shared in-memory map, so writes made through `put_bytes`
/// are visible to later reads, and clones of the mock see the same buckets.
#[derive(Clone, Default)]
pub struct MockS3Client {
    objects: Arc<Mutex<BTreeMap<(String, String), MockObject>>>,
    list_error: Option<S3Error>,
    head_errors: HashMap<String, S3Error>,
    get_errors: HashMap<String, S3Error>,
    put_errors: HashMap<String, S3Error>,
    calls: Arc<Mutex<Vec<MockS3Call>>>,
}

impl MockS3Client {
    pub fn new() -> Self {
        Self::default()
    }

    // Helper method to safely lock the object map
    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), MockObject>> {
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, call: MockS3Call) {
        match self.calls.lock() {
            Ok(mut guard) => guard.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    pub fn with_object(self, bucket: &str, key: &str, object: MockObject) -> Self {
        self.lock_objects()
            .insert((bucket.to_string(), key.to_string()), object);
        self
    }

    pub fn list_error(mut self, err: S3Error) -> Self {
        self.list_error = Some(err);
        self
    }

    pub fn head_error(mut self, bucket: &str, key: &str, err: S3Error) -> Self {
        self.head_errors.insert(format!("{bucket}:{key}"), err);
        self
    }

    pub fn get_error(mut self, bucket: &str, key: &str, err: S3Error) -> Self {
        self.get_errors.insert(format!("{bucket}:{key}"), err);
        self
    }

    pub fn put_error(mut self, bucket: &str, key: &str, err: S3Error) -> Self {
        self.put_errors.insert(format!("{bucket}:{key}"), err);
        self
    }

    pub fn get_calls(&self) -> Vec<MockS3Call> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of `put_bytes` calls made against `bucket`
    pub fn put_count(&self, bucket: &str) -> usize {
        self.get_calls()
            .iter()
            .filter(|call| matches!(call, MockS3Call::Put { bucket: b, .. } if b == bucket))
            .count()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<MockObject> {
        self.lock_objects()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl S3Client for MockS3Client {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, S3Error> {
        self.record(MockS3Call::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        if let Some(err) = &self.list_error {
            return Err(err.clone());
        }
        Ok(self
            .lock_objects()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), object)| ObjectSummary {
                key: k.clone(),
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, S3Error> {
        self.record(MockS3Call::Head {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if let Some(err) = self.head_errors.get(&format!("{bucket}:{key}")) {
            return Err(err.clone());
        }
        match self.object(bucket, key) {
            Some(object) => Ok(ObjectMetadata {
                storage_class: object.storage_class,
                restore: object.restore,
            }),
            None => Err(S3Error::NotFound(key.to_string())),
        }
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, S3Error> {
        self.record(MockS3Call::Exists {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if let Some(err) = self.head_errors.get(&format!("{bucket}:{key}")) {
            return Err(err.clone());
        }
        Ok(self.object(bucket, key).is_some())
    }

    async fn get_reader(&self, bucket: &str, key: &str) -> Result<ObjectReader, S3Error> {
        self.record(MockS3Call::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if let Some(err) = self.get_errors.get(&format!("{bucket}:{key}")) {
            return Err(err.clone());
        }
        match self.object(bucket, key) {
            Some(object) => Ok(Box::pin(Cursor::new(object.body))),
            None => Err(S3Error::NotFound(key.to_string())),
        }
    }

    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), S3Error> {
        self.record(MockS3Call::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if let Some(err) = self.put_errors.get(&format!("{bucket}:{key}")) {
            return Err(err.clone());
        }
        self.lock_objects().insert(
            (bucket.to_string(), key.to_string()),
            MockObject {
                body,
                last_modified: Some(Utc::now()),
                storage_class: None,
                restore: None,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncReadExt;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_mock_list_filters_by_bucket_and_prefix() {
        let client = MockS3Client::new()
            .with_object("src", "logs/a/1.gz", MockObject::new(vec![1], at(1)))
            .with_object("src", "logs/b/2.gz", MockObject::new(vec![2], at(2)))
            .with_object("other", "logs/a/3.gz", MockObject::new(vec![3], at(3)));

        let listed = client.list_objects("src", "logs/a/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "logs/a/1.gz");
        assert_eq!(listed[0].last_modified, Some(at(1)));
    }

    #[tokio::test]
    async fn test_mock_put_is_visible_to_exists_and_get() {
        let client = MockS3Client::new();
        assert!(!client.object_exists("dst", "k").await.unwrap());

        client.put_bytes("dst", "k", b"hello".to_vec()).await.unwrap();

        assert!(client.object_exists("dst", "k").await.unwrap());
        let mut body = Vec::new();
        client
            .get_reader("dst", "k")
            .await
            .unwrap()
            .read_to_end(&mut body)
            .await
            .unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(client.put_count("dst"), 1);
    }

    #[tokio::test]
    async fn test_mock_head_reports_storage_class_and_restore() {
        let client = MockS3Client::new().with_object(
            "src",
            "k",
            MockObject::new(vec![], at(1))
                .storage_class("DEEP_ARCHIVE")
                .restore("ongoing-request=\"true\""),
        );

        let head = client.head_object("src", "k").await.unwrap();
        assert_eq!(head.storage_class.as_deref(), Some("DEEP_ARCHIVE"));
        assert_eq!(head.restore.as_deref(), Some("ongoing-request=\"true\""));
    }

    #[tokio::test]
    async fn test_mock_default_not_found() {
        let client = MockS3Client::new();

        // Should return NotFound for any key not explicitly configured
        let result = client.get_reader("test-bucket", "nonexistent-key").await;
        assert!(matches!(result, Err(S3Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mock_injected_errors() {
        let client = MockS3Client::new()
            .list_error(S3Error::Unreachable("down".to_string()))
            .head_error("src", "k", S3Error::OperationFailed("boom".to_string()))
            .get_error("src", "k", S3Error::Unreachable("reset".to_string()));

        let listed = client.list_objects("src", "").await;
        assert!(matches!(listed, Err(ref e) if e.is_unreachable()));
        assert!(matches!(
            client.head_object("src", "k").await,
            Err(S3Error::OperationFailed(_))
        ));
        assert!(matches!(
            client.get_reader("src", "k").await,
            Err(ref e) if e.is_unreachable()
        ));
    }
}
