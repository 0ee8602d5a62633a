use common_mongo::DocumentStoreError;
use common_s3::S3Error;
use thiserror::Error;

/// Failures that abort a whole job. Anything scoped to a single object is
/// recorded in the job report instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to list source archives: {0}")]
    Listing(#[source] S3Error),
    #[error("object store unreachable: {0}")]
    ObjectStoreUnreachable(#[source] S3Error),
    #[error("document store unreachable: {0}")]
    DocumentStoreUnreachable(#[from] DocumentStoreError),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineError::Listing(_) => "listing",
            PipelineError::ObjectStoreUnreachable(_) => "object_store_unreachable",
            PipelineError::DocumentStoreUnreachable(_) => "document_store_unreachable",
            PipelineError::Task(_) => "task",
        }
    }
}
