use chrono::Utc;
use common_mongo::{DocumentStore, DocumentStoreError, IndexSpec, InsertOutcome};
use common_s3::{S3Client, S3Error};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics_consts::{
    ARTIFACT_WRITE_FAILED, RECORDS_DUPLICATE, RECORDS_FAILED, RECORDS_INSERTED, RECORD_PARSE_ERROR,
};
use crate::transform::TransformResult;

pub mod destination;
pub mod record;
pub mod service;

pub use destination::destination_key;
pub use record::{parse_line, RecordParseError, StructuredRecord};

pub const UNIQUE_INDEX_NAME: &str = "timestamp_serviceName_message_unique";

/// Indexes every device collection carries. The unique one is what makes
/// re-inserting the same records safe.
pub fn collection_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new(UNIQUE_INDEX_NAME, &["timestamp", "serviceName", "message"]).unique(),
        IndexSpec::new("timestamp_1", &["timestamp"]),
        IndexSpec::new("serviceName_1", &["serviceName"]),
        IndexSpec::new("timestamp_serviceName_1", &["timestamp", "serviceName"]),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub records: usize,
    pub parse_errors: usize,
    pub outcome: InsertOutcome,
    pub artifact_written: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("document store unreachable: {0}")]
    Unreachable(DocumentStoreError),
    /// The collection or its unique index couldn't be put in place; nothing was inserted
    #[error("collection indexes unavailable: {0}")]
    IndexUnavailable(DocumentStoreError),
}

impl PersistError {
    fn from_store(err: DocumentStoreError) -> Self {
        if err.is_unreachable() {
            PersistError::Unreachable(err)
        } else {
            PersistError::IndexUnavailable(err)
        }
    }
}

/// Writes a curated archive to both stores. The destination artifact is
/// written last and its presence is what marks the archive as done.
pub struct IdempotentSink<'a> {
    s3: &'a dyn S3Client,
    store: &'a dyn DocumentStore,
    bucket: &'a str,
    batch_size: usize,
}

impl<'a> IdempotentSink<'a> {
    pub fn new(
        s3: &'a dyn S3Client,
        store: &'a dyn DocumentStore,
        bucket: &'a str,
        batch_size: usize,
    ) -> Self {
        Self {
            s3,
            store,
            bucket,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn already_materialized(&self, dest_key: &str) -> Result<bool, S3Error> {
        self.s3.object_exists(self.bucket, dest_key).await
    }

    /// Parses and inserts the curated lines into `collection`, then writes the
    /// artifact. Inserts only start once the collection carries its unique
    /// index; otherwise neither store is written.
    pub async fn persist(
        &self,
        collection: &str,
        source_key: &str,
        dest_key: &str,
        result: &TransformResult,
    ) -> Result<PersistReport, PersistError> {
        let processed_at = Utc::now();
        let mut report = PersistReport::default();

        let mut documents = Vec::with_capacity(result.ordered_lines.len());
        for line in &result.ordered_lines {
            match parse_line(line, source_key, processed_at) {
                Ok(record) => documents.push(record.to_document()),
                Err(e) => {
                    warn!(key = %source_key, line = %line, "dropping unparseable line: {}", e);
                    metrics::counter!(RECORD_PARSE_ERROR).increment(1);
                    report.parse_errors += 1;
                }
            }
        }
        report.records = documents.len();

        if !documents.is_empty() {
            self.store
                .ensure_collection(collection, &collection_indexes())
                .await
                .map_err(PersistError::from_store)?;
        }

        let mut remaining = documents.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<_> = remaining.by_ref().take(self.batch_size).collect();
            let attempted = batch.len();
            let outcome = match self.store.insert_unordered(collection, batch).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_unreachable() => return Err(PersistError::Unreachable(e)),
                Err(e) => {
                    warn!(collection = %collection, "batch insert failed: {}", e);
                    InsertOutcome {
                        failed: attempted,
                        ..Default::default()
                    }
                }
            };
            debug!(
                collection = %collection,
                inserted = outcome.inserted,
                duplicates = outcome.duplicates,
                failed = outcome.failed,
                "inserted batch"
            );
            report.outcome += outcome;
        }

        metrics::counter!(RECORDS_INSERTED).increment(report.outcome.inserted as u64);
        metrics::counter!(RECORDS_DUPLICATE).increment(report.outcome.duplicates as u64);
        metrics::counter!(RECORDS_FAILED).increment(report.outcome.failed as u64);

        match self
            .s3
            .put_bytes(self.bucket, dest_key, result.to_artifact())
            .await
        {
            Ok(()) => report.artifact_written = true,
            Err(e) => {
                // Records are in; the next run re-inserts them as duplicates and retries the write
                warn!(dest_key = %dest_key, "failed to write artifact: {}", e);
                metrics::counter!(ARTIFACT_WRITE_FAILED).increment(1);
            }
        }

        info!(
            collection = %collection,
            dest_key = %dest_key,
            inserted = report.outcome.inserted,
            duplicates = report.outcome.duplicates,
            failed = report.outcome.failed,
            parse_errors = report.parse_errors,
            "persisted archive"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_mongo::{MockDocumentStore, MockDocumentStoreCall};
    use common_s3::MockS3Client;

    const BUCKET: &str = "processed";
    const DEST: &str = "logs/2025/d1/logfile-airfi-x-STM_LOG.txt";

    fn result(lines: Vec<String>) -> TransformResult {
        TransformResult {
            ordered_lines: lines,
            termination: None,
        }
    }

    fn line(second: usize, address: &str, message: &str) -> String {
        format!(
            "2025-10-03T08:{:02}:{:02}Z {} init: {}",
            second / 60,
            second % 60,
            address,
            message
        )
    }

    #[tokio::test]
    async fn test_persist_inserts_records_and_writes_artifact() {
        let s3 = MockS3Client::new();
        let store = MockDocumentStore::new();
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 1000);
        let curated = result(vec![
            line(0, "10.0.10.101", "SWver 4.2"),
            "garbage".to_string(),
            line(1, "10.0.10.101", "Box power-up"),
        ]);

        assert!(!sink.already_materialized(DEST).await.unwrap());
        let report = sink.persist("log-d1", "logs/d1/a.gz", DEST, &curated).await.unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.outcome.inserted, 2);
        assert!(report.artifact_written);
        assert!(sink.already_materialized(DEST).await.unwrap());
        assert_eq!(
            s3.object(BUCKET, DEST).unwrap().body,
            curated.to_artifact()
        );
        assert_eq!(store.index_names("log-d1"), vec![UNIQUE_INDEX_NAME.to_string()]);
    }

    #[tokio::test]
    async fn test_batch_with_duplicates_counts_them_separately() {
        let s3 = MockS3Client::new();
        let store = MockDocumentStore::new();
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 1000);

        // Same (timestamp, service, message) from a different address is a duplicate
        let mut lines: Vec<String> = (0..800).map(|i| line(i, "10.0.10.101", "ok")).collect();
        lines.extend((0..200).map(|i| line(i, "10.0.10.102", "ok")));

        let report = sink.persist("log-d1", "k", DEST, &result(lines)).await.unwrap();

        assert_eq!(report.outcome.inserted, 800);
        assert_eq!(report.outcome.duplicates, 200);
        assert_eq!(store.documents("log-d1").len(), 800);
    }

    #[tokio::test]
    async fn test_inserts_are_batched() {
        let s3 = MockS3Client::new();
        let store = MockDocumentStore::new();
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 2);
        let lines = (0..5).map(|i| line(i, "a", "x")).collect();

        sink.persist("log-d1", "k", DEST, &result(lines)).await.unwrap();

        let batches: Vec<usize> = store
            .get_calls()
            .into_iter()
            .filter_map(|call| match call {
                MockDocumentStoreCall::Insert { documents, .. } => Some(documents),
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal_and_skips_artifact() {
        let s3 = MockS3Client::new();
        let store = MockDocumentStore::new()
            .insert_error(DocumentStoreError::Unreachable("timeout".to_string()));
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 1000);

        let err = sink
            .persist("log-d1", "k", DEST, &result(vec![line(0, "a", "x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, PersistError::Unreachable(_)));
        assert_eq!(s3.put_count(BUCKET), 0);
    }

    #[tokio::test]
    async fn test_other_insert_failures_are_counted() {
        let s3 = MockS3Client::new();
        let store = MockDocumentStore::new()
            .insert_error(DocumentStoreError::OperationFailed("bad doc".to_string()));
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 1000);

        let report = sink
            .persist("log-d1", "k", DEST, &result(vec![line(0, "a", "x"), line(1, "a", "y")]))
            .await
            .unwrap();

        assert_eq!(report.outcome.failed, 2);
        assert!(report.artifact_written);
    }

    #[tokio::test]
    async fn test_artifact_write_failure_is_not_fatal() {
        let s3 = MockS3Client::new().put_error(
            BUCKET,
            DEST,
            S3Error::OperationFailed("AccessDenied".to_string()),
        );
        let store = MockDocumentStore::new();
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 1000);

        let report = sink
            .persist("log-d1", "k", DEST, &result(vec![line(0, "a", "x")]))
            .await
            .unwrap();

        assert_eq!(report.outcome.inserted, 1);
        assert!(!report.artifact_written);
    }

    #[tokio::test]
    async fn test_index_failure_skips_inserts_and_artifact() {
        let s3 = MockS3Client::new();
        let store = MockDocumentStore::new()
            .ensure_error(DocumentStoreError::OperationFailed("IndexOptionsConflict".to_string()));
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 1000);
        let curated = result(vec![line(0, "a", "x"), line(1, "a", "y")]);

        for _ in 0..2 {
            let err = sink.persist("log-d1", "k", DEST, &curated).await.unwrap_err();
            assert!(matches!(err, PersistError::IndexUnavailable(_)));
        }

        let inserts = store
            .get_calls()
            .into_iter()
            .filter(|call| matches!(call, MockDocumentStoreCall::Insert { .. }))
            .count();
        assert_eq!(inserts, 0);
        assert!(store.documents("log-d1").is_empty());
        assert_eq!(s3.put_count(BUCKET), 0);
        assert!(!sink.already_materialized(DEST).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_store_while_ensuring_indexes_is_fatal() {
        let s3 = MockS3Client::new();
        let store = MockDocumentStore::new()
            .ensure_error(DocumentStoreError::Unreachable("no route".to_string()));
        let sink = IdempotentSink::new(&s3, &store, BUCKET, 1000);

        let err = sink
            .persist("log-d1", "k", DEST, &result(vec![line(0, "a", "x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, PersistError::Unreachable(_)));
        assert_eq!(s3.put_count(BUCKET), 0);
    }
}
