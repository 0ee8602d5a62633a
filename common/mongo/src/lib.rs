//! Document store abstraction over MongoDB.
//!
//! Follows the common-redis pattern: a small trait covering the operations
//! services need, a real implementation, and a manual mock that's always
//! available for testing. The mock enforces unique indexes the same way the
//! server does, so duplicate handling can be exercised without a database.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

pub use mongodb::bson;

/// Server error code for a unique index violation
pub const DUPLICATE_KEY_CODE: i32 = 11000;
/// Server error code returned when creating a collection that already exists
pub const NAMESPACE_EXISTS_CODE: i32 = 48;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentStoreError {
    #[error("Document store unreachable: {0}")]
    Unreachable(String),
    #[error("Document store operation failed: {0}")]
    OperationFailed(String),
}

impl DocumentStoreError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DocumentStoreError::Unreachable(_))
    }
}

impl From<MongoError> for DocumentStoreError {
    fn from(err: MongoError) -> Self {
        match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => {
                DocumentStoreError::Unreachable(err.to_string())
            }
            _ => DocumentStoreError::OperationFailed(err.to_string()),
        }
    }
}

/// An ascending index over `keys`, optionally unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: &str, keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn to_model(&self) -> IndexModel {
        let mut keys = Document::new();
        for key in &self.keys {
            keys.insert(key.clone(), 1);
        }
        IndexModel::builder()
            .keys(keys)
            .options(
                IndexOptions::builder()
                    .name(self.name.clone())
                    .unique(self.unique)
                    .build(),
            )
            .build()
    }
}

/// Per-document result counts of an unordered insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    /// Documents rejected for any reason other than a unique index violation
    pub failed: usize,
}

impl AddAssign for InsertOutcome {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create `collection` and `indexes` if they don't exist yet. Safe to call
    /// concurrently; "already exists" is treated as success.
    async fn ensure_collection(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
    ) -> Result<(), DocumentStoreError>;

    /// Insert `documents` without stopping at the first failure. Individual
    /// write failures are reported in the outcome, only store-level failures
    /// are returned as errors.
    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, DocumentStoreError>;
}

pub struct MongoImpl {
    database: Database,
}

impl MongoImpl {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, DocumentStoreError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::new(client.database(database)))
    }

    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Cheap round trip used at start-up to fail fast on a bad URI or unreachable cluster
    pub async fn ping(&self) -> Result<(), DocumentStoreError> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

/// Splits an unordered insert of `attempted` documents into inserted,
/// duplicate and failed counts, given the codes of the per-document write errors.
pub fn count_outcome(
    attempted: usize,
    error_codes: impl IntoIterator<Item = i32>,
) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();
    let mut errors = 0;
    for code in error_codes {
        errors += 1;
        if code == DUPLICATE_KEY_CODE {
            outcome.duplicates += 1;
        } else {
            outcome.failed += 1;
        }
    }
    outcome.inserted = attempted.saturating_sub(errors);
    outcome
}

fn outcome_from_insert_error(
    err: MongoError,
    attempted: usize,
) -> Result<InsertOutcome, DocumentStoreError> {
    let ErrorKind::InsertMany(failure) = err.kind.as_ref() else {
        return Err(err.into());
    };
    if failure.write_concern_error.is_some() {
        return Err(DocumentStoreError::OperationFailed(err.to_string()));
    }
    let write_errors = failure.write_errors.as_deref().unwrap_or_default();
    Ok(count_outcome(attempted, write_errors.iter().map(|e| e.code)))
}

#[async_trait]
impl DocumentStore for MongoImpl {
    async fn ensure_collection(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
    ) -> Result<(), DocumentStoreError> {
        let existing = self
            .database
            .list_collection_names()
            .filter(doc! { "name": collection })
            .await?;

        if !existing.iter().any(|name| name == collection) {
            match self.database.create_collection(collection).await {
                Ok(()) => info!("created collection: {}", collection),
                Err(e) if matches!(e.kind.as_ref(), ErrorKind::Command(c) if c.code == NAMESPACE_EXISTS_CODE) => {
                    debug!("collection {} created concurrently", collection);
                }
                Err(e) => return Err(e.into()),
            }
        }

        // createIndexes is a no-op for indexes that already exist with the same keys and options
        let models: Vec<IndexModel> = indexes.iter().map(IndexSpec::to_model).collect();
        if !models.is_empty() {
            self.database
                .collection::<Document>(collection)
                .create_indexes(models)
                .await?;
        }
        Ok(())
    }

    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, DocumentStoreError> {
        if documents.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let attempted = documents.len();
        let result = self
            .database
            .collection::<Document>(collection)
            .insert_many(documents)
            .ordered(false)
            .await;

        match result {
            Ok(result) => Ok(InsertOutcome {
                inserted: result.inserted_ids.len(),
                ..Default::default()
            }),
            Err(e) => outcome_from_insert_error(e, attempted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockDocumentStoreCall {
    EnsureCollection { collection: String },
    Insert { collection: String, documents: usize },
}

#[derive(Default)]
struct MockCollection {
    documents: Vec<Document>,
    unique_indexes: Vec<IndexSpec>,
    unique_keys: HashSet<(String, String)>,
}

impl MockCollection {
    fn unique_key(index: &IndexSpec, document: &Document) -> String {
        index
            .keys
            .iter()
            .map(|k| format!("{:?}", document.get(k).unwrap_or(&Bson::Null)))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    fn insert(&mut self, document: Document) -> bool {
        let keys: Vec<(String, String)> = self
            .unique_indexes
            .iter()
            .map(|index| (index.name.clone(), Self::unique_key(index, &document)))
            .collect();
        if keys.iter().any(|key| self.unique_keys.contains(key)) {
            return false;
        }
        self.unique_keys.extend(keys);
        self.documents.push(document);
        true
    }
}

/// Mock document store for testing - always available, no conditional compilation needed
#[derive(Clone, Default)]
pub struct MockDocumentStore {
    collections: Arc<Mutex<HashMap<String, MockCollection>>>,
    ensure_error: Option<DocumentStoreError>,
    insert_error: Option<DocumentStoreError>,
    calls: Arc<Mutex<Vec<MockDocumentStoreCall>>>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Helper method to safely lock the collection map
    fn lock_collections(&self) -> std::sync::MutexGuard<'_, HashMap<String, MockCollection>> {
        match self.collections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, call: MockDocumentStoreCall) {
        match self.calls.lock() {
            Ok(mut guard) => guard.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    pub fn ensure_error(mut self, err: DocumentStoreError) -> Self {
        self.ensure_error = Some(err);
        self
    }

    pub fn insert_error(mut self, err: DocumentStoreError) -> Self {
        self.insert_error = Some(err);
        self
    }

    pub fn get_calls(&self) -> Vec<MockDocumentStoreCall> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock_collections()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.lock_collections()
            .get(collection)
            .map(|c| c.unique_indexes.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn collection_exists(&self, collection: &str) -> bool {
        self.lock_collections().contains_key(collection)
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
    ) -> Result<(), DocumentStoreError> {
        self.record(MockDocumentStoreCall::EnsureCollection {
            collection: collection.to_string(),
        });
        if let Some(err) = &self.ensure_error {
            return Err(err.clone());
        }
        let mut collections = self.lock_collections();
        let entry = collections.entry(collection.to_string()).or_default();
        for index in indexes.iter().filter(|i| i.unique) {
            if !entry.unique_indexes.iter().any(|i| i.name == index.name) {
                entry.unique_indexes.push(index.clone());
            }
        }
        Ok(())
    }

    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, DocumentStoreError> {
        self.record(MockDocumentStoreCall::Insert {
            collection: collection.to_string(),
            documents: documents.len(),
        });
        if let Some(err) = &self.insert_error {
            return Err(err.clone());
        }
        let mut collections = self.lock_collections();
        let entry = collections.entry(collection.to_string()).or_default();
        let attempted = documents.len();
        let rejected: Vec<i32> = documents
            .into_iter()
            .filter_map(|document| (!entry.insert(document)).then_some(DUPLICATE_KEY_CODE))
            .collect();
        Ok(count_outcome(attempted, rejected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_index() -> IndexSpec {
        IndexSpec::new("a_b_unique", &["a", "b"]).unique()
    }

    #[tokio::test]
    async fn test_mock_enforces_unique_index() {
        let store = MockDocumentStore::new();
        store
            .ensure_collection("c", &[unique_index(), IndexSpec::new("a_1", &["a"])])
            .await
            .unwrap();

        let docs = vec![
            doc! { "a": 1, "b": "x" },
            doc! { "a": 1, "b": "x" },
            doc! { "a": 1, "b": "y" },
        ];
        let outcome = store.insert_unordered("c", docs).await.unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(store.documents("c").len(), 2);
        assert_eq!(store.index_names("c"), vec!["a_b_unique".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_ensure_collection_is_idempotent() {
        let store = MockDocumentStore::new();
        store.ensure_collection("c", &[unique_index()]).await.unwrap();
        store.ensure_collection("c", &[unique_index()]).await.unwrap();

        assert!(store.collection_exists("c"));
        assert_eq!(store.index_names("c").len(), 1);
    }

    #[tokio::test]
    async fn test_mock_insert_error_is_returned() {
        let store = MockDocumentStore::new()
            .insert_error(DocumentStoreError::Unreachable("no route".to_string()));
        let result = store.insert_unordered("c", vec![doc! { "a": 1 }]).await;
        assert!(matches!(result, Err(ref e) if e.is_unreachable()));
    }

    #[test]
    fn test_count_outcome_splits_duplicates_from_other_errors() {
        let codes = std::iter::repeat(DUPLICATE_KEY_CODE)
            .take(200)
            .chain([121, 2, 121]);
        assert_eq!(
            count_outcome(1000, codes),
            InsertOutcome {
                inserted: 797,
                duplicates: 200,
                failed: 3
            }
        );
    }

    #[test]
    fn test_count_outcome_without_errors_inserts_everything() {
        assert_eq!(
            count_outcome(42, []),
            InsertOutcome {
                inserted: 42,
                duplicates: 0,
                failed: 0
            }
        );
    }

    #[test]
    fn test_insert_outcome_accumulates() {
        let mut total = InsertOutcome::default();
        total += InsertOutcome {
            inserted: 3,
            duplicates: 1,
            failed: 0,
        };
        total += InsertOutcome {
            inserted: 2,
            duplicates: 0,
            failed: 1,
        };
        assert_eq!(
            total,
            InsertOutcome {
                inserted: 5,
                duplicates: 1,
                failed: 1
            }
        );
    }
}
