use std::sync::Arc;
use std::time::Instant;

use chrono::Datelike;
use common_s3::{ObjectReader, S3Error};
use tokio_util::io::SyncIoBridge;
use tracing::{error, info, warn};

use crate::classify::{Classification, LogType};
use crate::context::AppContext;
use crate::enumerate::{ArchiveEnumerator, CandidateObject, EnumerationSkip};
use crate::error::PipelineError;
use crate::job::Job;
use crate::metrics_consts::{
    JOB_DURATION, OBJECTS_CLASSIFIED, OBJECTS_PROCESSED, OBJECTS_SKIPPED, OBJECT_PROCESS_TIME,
};
use crate::sink::{destination_key, IdempotentSink, PersistError, PersistReport};
use crate::transform::{TerminationReason, TransformEngine};

/// What happened to one candidate archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    Persisted {
        dest_key: String,
        log_type: LogType,
        report: PersistReport,
    },
    /// The destination artifact already exists
    AlreadyMaterialized { dest_key: String },
    TerminatedEarly(TerminationReason),
    /// Nothing survived the filters
    EmptyExtract,
    ObjectStoreFailed(S3Error),
    DecodeFailed(String),
    /// The device collection's indexes couldn't be ensured; nothing was written
    IndexUnavailable(String),
}

impl ObjectOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectOutcome::Persisted { .. } => "persisted",
            ObjectOutcome::AlreadyMaterialized { .. } => "already_materialized",
            ObjectOutcome::TerminatedEarly(reason) => reason.label(),
            ObjectOutcome::EmptyExtract => "empty_extract",
            ObjectOutcome::ObjectStoreFailed(_) => "object_store_failed",
            ObjectOutcome::DecodeFailed(_) => "decode_failed",
            ObjectOutcome::IndexUnavailable(_) => "index_unavailable",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub device_id: String,
    /// Listed objects that never became candidates
    pub skipped: Vec<(String, EnumerationSkip)>,
    /// Candidates in the order they were processed
    pub objects: Vec<(String, ObjectOutcome)>,
}

impl JobReport {
    pub fn count(&self, label: &str) -> usize {
        self.objects
            .iter()
            .filter(|(_, outcome)| outcome.label() == label)
            .count()
    }

    pub fn outcome(&self, key: &str) -> Option<&ObjectOutcome> {
        self.objects
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    pub fn records_inserted(&self) -> usize {
        self.objects
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                ObjectOutcome::Persisted { report, .. } => Some(report.outcome.inserted),
                _ => None,
            })
            .sum()
    }
}

/// Runs jobs against the stores held by the context. Candidates are handled
/// one at a time; archives are streamed from the object store and decoded on
/// the blocking pool.
#[derive(Clone)]
pub struct Pipeline {
    context: Arc<AppContext>,
}

impl Pipeline {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn run_job(&self, job: &Job) -> Result<JobReport, PipelineError> {
        let started = Instant::now();
        let config = &self.context.config;

        let enumeration = ArchiveEnumerator::new(
            self.context.s3.as_ref(),
            &config.source_bucket,
            &config.archive_name_marker,
        )
        .enumerate(job)
        .await
        .map_err(PipelineError::Listing)?;

        info!(
            device = %job.device_id,
            candidates = enumeration.candidates.len(),
            skipped = enumeration.skipped.len(),
            "enumerated archives"
        );

        let mut report = JobReport {
            device_id: job.device_id.clone(),
            skipped: enumeration.skipped,
            objects: Vec::with_capacity(enumeration.candidates.len()),
        };

        for candidate in &enumeration.candidates {
            let object_started = Instant::now();
            let outcome = self.process_object(job, candidate).await?;

            match &outcome {
                ObjectOutcome::Persisted { .. } => {
                    metrics::counter!(OBJECTS_PROCESSED).increment(1);
                }
                skipped => {
                    metrics::counter!(OBJECTS_SKIPPED, "reason" => skipped.label()).increment(1);
                }
            }
            metrics::histogram!(OBJECT_PROCESS_TIME)
                .record(object_started.elapsed().as_millis() as f64);

            report.objects.push((candidate.key.clone(), outcome));
        }

        metrics::histogram!(JOB_DURATION).record(started.elapsed().as_millis() as f64);
        info!(
            device = %job.device_id,
            persisted = report.count("persisted"),
            already_materialized = report.count("already_materialized"),
            records_inserted = report.records_inserted(),
            "job finished"
        );
        Ok(report)
    }

    async fn process_object(
        &self,
        job: &Job,
        candidate: &CandidateObject,
    ) -> Result<ObjectOutcome, PipelineError> {
        let config = &self.context.config;
        let key = candidate.key.as_str();

        let body = match self.open(job, key).await? {
            Ok(body) => body,
            Err(outcome) => return Ok(outcome),
        };
        let body = SyncIoBridge::new(body);
        let classifier = self.context.classifier.clone();
        let classification = match tokio::task::spawn_blocking(move || {
            classifier.classify_compressed(body)
        })
        .await?
        {
            Ok(classification) => classification,
            Err(e) => {
                warn!(device = %job.device_id, key = %key, "failed to decode archive: {}", e);
                return Ok(ObjectOutcome::DecodeFailed(e.to_string()));
            }
        };
        log_classification(key, &classification);

        let dest_key = destination_key(
            candidate.last_modified.year(),
            &job.device_id,
            key,
            classification.log_type,
        );

        let sink = IdempotentSink::new(
            self.context.s3.as_ref(),
            self.context.store.as_ref(),
            &config.destination_bucket,
            config.insert_batch_size,
        );
        match sink.already_materialized(&dest_key).await {
            Ok(true) => {
                info!(key = %key, dest_key = %dest_key, "already processed, skipping");
                return Ok(ObjectOutcome::AlreadyMaterialized { dest_key });
            }
            Ok(false) => {}
            Err(e) if e.is_unreachable() => return Err(PipelineError::ObjectStoreUnreachable(e)),
            Err(e) => {
                warn!(dest_key = %dest_key, "failed to check destination: {}", e);
                return Ok(ObjectOutcome::ObjectStoreFailed(e));
            }
        }

        // Classification only read a prefix; the transform needs the whole archive
        let body = match self.open(job, key).await? {
            Ok(body) => body,
            Err(outcome) => return Ok(outcome),
        };
        let body = SyncIoBridge::new(body);
        let engine = TransformEngine::new(self.context.rules.clone());
        let result = match tokio::task::spawn_blocking(move || engine.run_compressed(body)).await? {
            Ok(result) => result,
            Err(e) => {
                warn!(device = %job.device_id, key = %key, "failed to decode archive: {}", e);
                return Ok(ObjectOutcome::DecodeFailed(e.to_string()));
            }
        };

        if let Some(reason) = result.termination {
            info!(device = %job.device_id, key = %key, reason = %reason, "skipped archive");
            return Ok(ObjectOutcome::TerminatedEarly(reason));
        }
        if result.ordered_lines.is_empty() {
            info!(device = %job.device_id, key = %key, "empty extract");
            return Ok(ObjectOutcome::EmptyExtract);
        }

        match sink
            .persist(&job.collection_name(), key, &dest_key, &result)
            .await
        {
            Ok(report) => Ok(ObjectOutcome::Persisted {
                dest_key,
                log_type: classification.log_type,
                report,
            }),
            Err(PersistError::IndexUnavailable(e)) => {
                warn!(device = %job.device_id, key = %key, "skipping archive: {}", e);
                Ok(ObjectOutcome::IndexUnavailable(e.to_string()))
            }
            Err(PersistError::Unreachable(e)) => {
                error!(device = %job.device_id, key = %key, "document store unreachable: {}", e);
                Err(e.into())
            }
        }
    }

    /// Opens a source archive. A connectivity failure is fatal to the job, any
    /// other failure becomes the object's outcome.
    async fn open(
        &self,
        job: &Job,
        key: &str,
    ) -> Result<Result<ObjectReader, ObjectOutcome>, PipelineError> {
        match self
            .context
            .s3
            .get_reader(&self.context.config.source_bucket, key)
            .await
        {
            Ok(body) => Ok(Ok(body)),
            Err(e) if e.is_unreachable() => Err(PipelineError::ObjectStoreUnreachable(e)),
            Err(e) => {
                warn!(device = %job.device_id, key = %key, "failed to fetch archive: {}", e);
                Ok(Err(ObjectOutcome::ObjectStoreFailed(e)))
            }
        }
    }
}

fn log_classification(key: &str, classification: &Classification) {
    metrics::counter!(OBJECTS_CLASSIFIED, "type" => classification.log_type.label()).increment(1);
    info!(
        key = %key,
        log_type = %classification.log_type,
        negative = classification.negative,
        positive = classification.positive,
        "classified archive"
    );
}
