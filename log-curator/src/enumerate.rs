use std::fmt;

use chrono::{DateTime, Utc};
use common_s3::{ObjectSummary, S3Client, S3Error};
use tracing::{debug, info, warn};

use crate::job::Job;
use crate::metrics_consts::ENUMERATION_SKIPPED;

const ARCHIVE_SUFFIX: &str = ".gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageClass {
    Standard,
    GlacierIr,
    DeepArchive,
    Other(String),
}

impl StorageClass {
    /// S3 omits the storage class for STANDARD objects
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            None | Some("") | Some("STANDARD") => StorageClass::Standard,
            Some("GLACIER_IR") => StorageClass::GlacierIr,
            Some("DEEP_ARCHIVE") => StorageClass::DeepArchive,
            Some(other) => StorageClass::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageClass::Standard => write!(f, "STANDARD"),
            StorageClass::GlacierIr => write!(f, "GLACIER_IR"),
            StorageClass::DeepArchive => write!(f, "DEEP_ARCHIVE"),
            StorageClass::Other(other) => write!(f, "{other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreState {
    None,
    InProgress,
    Completed { expiry: Option<DateTime<Utc>> },
}

impl RestoreState {
    /// Parses the `x-amz-restore` header, e.g.
    /// `ongoing-request="false", expiry-date="Fri, 21 Dec 2012 00:00:00 GMT"`
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(header) = value else {
            return RestoreState::None;
        };
        if header.contains("ongoing-request=\"true\"") {
            return RestoreState::InProgress;
        }
        if !header.contains("ongoing-request=\"false\"") {
            return RestoreState::None;
        }
        let expiry = header
            .split_once("expiry-date=\"")
            .and_then(|(_, rest)| rest.split_once('"'))
            .and_then(|(raw, _)| DateTime::parse_from_rfc2822(raw).ok())
            .map(|at| at.with_timezone(&Utc));
        RestoreState::Completed { expiry }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub storage_class: StorageClass,
    pub restore_state: RestoreState,
}

/// Why a listed object did not become a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationSkip {
    OutsideWindow,
    NotAnArchive,
    /// Deep archive restore requested but not finished; a redelivered job may pick it up
    RestoreInProgress,
    /// Deep archive with no restore requested; needs an external restore first
    NotRestored,
    UnsupportedStorageClass(String),
    MetadataUnavailable(String),
}

impl EnumerationSkip {
    pub fn label(&self) -> &'static str {
        match self {
            EnumerationSkip::OutsideWindow => "outside_window",
            EnumerationSkip::NotAnArchive => "not_an_archive",
            EnumerationSkip::RestoreInProgress => "restore_in_progress",
            EnumerationSkip::NotRestored => "not_restored",
            EnumerationSkip::UnsupportedStorageClass(_) => "unsupported_storage_class",
            EnumerationSkip::MetadataUnavailable(_) => "metadata_unavailable",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// In listing order
    pub candidates: Vec<CandidateObject>,
    pub skipped: Vec<(String, EnumerationSkip)>,
}

impl Enumeration {
    pub fn skipped_for(&self, reason: &str) -> usize {
        self.skipped
            .iter()
            .filter(|(_, skip)| skip.label() == reason)
            .count()
    }
}

pub struct ArchiveEnumerator<'a> {
    s3: &'a dyn S3Client,
    bucket: &'a str,
    name_marker: &'a str,
}

impl<'a> ArchiveEnumerator<'a> {
    pub fn new(s3: &'a dyn S3Client, bucket: &'a str, name_marker: &'a str) -> Self {
        Self {
            s3,
            bucket,
            name_marker,
        }
    }

    fn is_archive_name(&self, key: &str) -> bool {
        let filename = key.rsplit('/').next().unwrap_or(key);
        filename.contains(self.name_marker) && filename.ends_with(ARCHIVE_SUFFIX)
    }

    /// Lists the device's archives and keeps the readable ones inside the job window.
    /// Only a listing failure is an error; per-object problems end up in `skipped`.
    pub async fn enumerate(&self, job: &Job) -> Result<Enumeration, S3Error> {
        let prefix = job.source_prefix();
        let listed = self.s3.list_objects(self.bucket, &prefix).await?;
        info!(
            device = %job.device_id,
            prefix = %prefix,
            listed = listed.len(),
            "listed source objects"
        );

        let mut enumeration = Enumeration::default();
        for object in listed {
            match self.resolve(job, &object).await {
                Ok(candidate) => enumeration.candidates.push(candidate),
                Err(skip) => {
                    metrics::counter!(ENUMERATION_SKIPPED, "reason" => skip.label()).increment(1);
                    enumeration.skipped.push((object.key, skip));
                }
            }
        }
        Ok(enumeration)
    }

    async fn resolve(
        &self,
        job: &Job,
        object: &ObjectSummary,
    ) -> Result<CandidateObject, EnumerationSkip> {
        let key = object.key.as_str();
        let last_modified = object
            .last_modified
            .filter(|at| job.window.contains(*at))
            .ok_or(EnumerationSkip::OutsideWindow)?;

        if !self.is_archive_name(key) {
            return Err(EnumerationSkip::NotAnArchive);
        }

        let head = self.s3.head_object(self.bucket, key).await.map_err(|e| {
            warn!(device = %job.device_id, key, "head-object failed: {e}");
            EnumerationSkip::MetadataUnavailable(e.to_string())
        })?;

        let storage_class = StorageClass::from_header(head.storage_class.as_deref());
        let restore_state = RestoreState::from_header(head.restore.as_deref());

        match (&storage_class, &restore_state) {
            (StorageClass::Standard | StorageClass::GlacierIr, _) => {}
            (StorageClass::DeepArchive, RestoreState::Completed { expiry }) => {
                debug!(device = %job.device_id, key, ?expiry, "deep archive object restored");
            }
            (StorageClass::DeepArchive, RestoreState::InProgress) => {
                info!(device = %job.device_id, key, "restore still in progress, skipping for now");
                return Err(EnumerationSkip::RestoreInProgress);
            }
            (StorageClass::DeepArchive, RestoreState::None) => {
                info!(device = %job.device_id, key, "deep archive object not yet requested for restore");
                return Err(EnumerationSkip::NotRestored);
            }
            (StorageClass::Other(class), _) => {
                info!(device = %job.device_id, key, storage_class = %class, "unsupported storage class");
                return Err(EnumerationSkip::UnsupportedStorageClass(class.clone()));
            }
        }

        Ok(CandidateObject {
            key: object.key.clone(),
            last_modified,
            storage_class,
            restore_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ArchiveWindow;
    use chrono::TimeZone;
    use common_s3::{MockObject, MockS3Client};

    const BUCKET: &str = "src";

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn job() -> Job {
        Job {
            device_id: "10.0.10.101".to_string(),
            window: ArchiveWindow::new(at(1), at(20)),
        }
    }

    fn key(name: &str) -> String {
        format!("logs/10.0.10.101/{name}")
    }

    #[test]
    fn test_restore_header_parsing() {
        assert_eq!(RestoreState::from_header(None), RestoreState::None);
        assert_eq!(
            RestoreState::from_header(Some("ongoing-request=\"true\"")),
            RestoreState::InProgress
        );
        assert_eq!(
            RestoreState::from_header(Some(
                "ongoing-request=\"false\", expiry-date=\"Fri, 21 Dec 2012 00:00:00 GMT\""
            )),
            RestoreState::Completed {
                expiry: Some(Utc.with_ymd_and_hms(2012, 12, 21, 0, 0, 0).unwrap())
            }
        );
        assert_eq!(
            RestoreState::from_header(Some("ongoing-request=\"false\"")),
            RestoreState::Completed { expiry: None }
        );
    }

    #[test]
    fn test_storage_class_defaults_to_standard() {
        assert_eq!(StorageClass::from_header(None), StorageClass::Standard);
        assert_eq!(
            StorageClass::from_header(Some("GLACIER")),
            StorageClass::Other("GLACIER".to_string())
        );
    }

    #[tokio::test]
    async fn test_window_boundaries() {
        let s3 = MockS3Client::new()
            .with_object(BUCKET, &key("logfile-a.gz"), MockObject::new(vec![], at(1)))
            .with_object(BUCKET, &key("logfile-b.gz"), MockObject::new(vec![], at(20)));
        let enumeration = ArchiveEnumerator::new(&s3, BUCKET, "logfile-")
            .enumerate(&job())
            .await
            .unwrap();

        assert_eq!(enumeration.candidates.len(), 1);
        assert_eq!(enumeration.candidates[0].key, key("logfile-a.gz"));
        assert_eq!(
            enumeration.skipped,
            vec![(key("logfile-b.gz"), EnumerationSkip::OutsideWindow)]
        );
    }

    #[tokio::test]
    async fn test_name_filter() {
        let s3 = MockS3Client::new()
            .with_object(BUCKET, &key("logfile-a.txt"), MockObject::new(vec![], at(2)))
            .with_object(BUCKET, &key("syslog.gz"), MockObject::new(vec![], at(2)))
            .with_object(BUCKET, &key("logfile-maintenance-1.gz"), MockObject::new(vec![], at(2)));
        let enumeration = ArchiveEnumerator::new(&s3, BUCKET, "logfile-")
            .enumerate(&job())
            .await
            .unwrap();

        assert_eq!(enumeration.candidates.len(), 1);
        assert_eq!(enumeration.skipped_for("not_an_archive"), 2);
    }

    #[tokio::test]
    async fn test_storage_tiers() {
        let s3 = MockS3Client::new()
            .with_object(BUCKET, &key("logfile-1.gz"), MockObject::new(vec![], at(2)))
            .with_object(
                BUCKET,
                &key("logfile-2.gz"),
                MockObject::new(vec![], at(2)).storage_class("GLACIER_IR"),
            )
            .with_object(
                BUCKET,
                &key("logfile-3.gz"),
                MockObject::new(vec![], at(2))
                    .storage_class("DEEP_ARCHIVE")
                    .restore("ongoing-request=\"false\""),
            )
            .with_object(
                BUCKET,
                &key("logfile-4.gz"),
                MockObject::new(vec![], at(2))
                    .storage_class("DEEP_ARCHIVE")
                    .restore("ongoing-request=\"true\""),
            )
            .with_object(
                BUCKET,
                &key("logfile-5.gz"),
                MockObject::new(vec![], at(2)).storage_class("DEEP_ARCHIVE"),
            )
            .with_object(
                BUCKET,
                &key("logfile-6.gz"),
                MockObject::new(vec![], at(2)).storage_class("STANDARD_IA"),
            );
        let enumeration = ArchiveEnumerator::new(&s3, BUCKET, "logfile-")
            .enumerate(&job())
            .await
            .unwrap();

        let keys: Vec<_> = enumeration.candidates.iter().map(|c| c.key.clone()).collect();
        assert_eq!(
            keys,
            vec![key("logfile-1.gz"), key("logfile-2.gz"), key("logfile-3.gz")]
        );
        assert_eq!(enumeration.skipped_for("restore_in_progress"), 1);
        assert_eq!(enumeration.skipped_for("not_restored"), 1);
        assert_eq!(enumeration.skipped_for("unsupported_storage_class"), 1);
    }

    #[tokio::test]
    async fn test_metadata_failure_skips_only_that_object() {
        let s3 = MockS3Client::new()
            .with_object(BUCKET, &key("logfile-1.gz"), MockObject::new(vec![], at(2)))
            .with_object(BUCKET, &key("logfile-2.gz"), MockObject::new(vec![], at(2)))
            .head_error(
                BUCKET,
                &key("logfile-1.gz"),
                S3Error::OperationFailed("throttled".to_string()),
            );
        let enumeration = ArchiveEnumerator::new(&s3, BUCKET, "logfile-")
            .enumerate(&job())
            .await
            .unwrap();

        assert_eq!(enumeration.candidates.len(), 1);
        assert_eq!(enumeration.skipped_for("metadata_unavailable"), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let s3 = MockS3Client::new().list_error(S3Error::Unreachable("down".to_string()));
        let result = ArchiveEnumerator::new(&s3, BUCKET, "logfile-")
            .enumerate(&job())
            .await;
        assert!(result.is_err());
    }
}
