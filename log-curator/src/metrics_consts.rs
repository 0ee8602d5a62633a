pub const JOBS_RECEIVED: &str = "log_curator_jobs_received";
pub const JOBS_DROPPED: &str = "log_curator_jobs_dropped";
pub const JOBS_COMPLETED: &str = "log_curator_jobs_completed";
pub const JOBS_FAILED: &str = "log_curator_jobs_failed";
pub const JOB_DURATION: &str = "log_curator_job_duration_ms";

pub const ENUMERATION_SKIPPED: &str = "log_curator_enumeration_skipped";
pub const OBJECTS_PROCESSED: &str = "log_curator_objects_processed";
pub const OBJECTS_SKIPPED: &str = "log_curator_objects_skipped";
pub const OBJECTS_CLASSIFIED: &str = "log_curator_objects_classified";
pub const OBJECT_PROCESS_TIME: &str = "log_curator_object_process_time_ms";

pub const RECORDS_INSERTED: &str = "log_curator_records_inserted";
pub const RECORDS_DUPLICATE: &str = "log_curator_records_duplicate";
pub const RECORDS_FAILED: &str = "log_curator_records_failed";
pub const RECORD_PARSE_ERROR: &str = "log_curator_record_parse_error";
pub const ARTIFACT_WRITE_FAILED: &str = "log_curator_artifact_write_failed";

pub const QUEUE_RECEIVE_ERROR: &str = "log_curator_queue_receive_error";
pub const QUEUE_DELETE_ERROR: &str = "log_curator_queue_delete_error";
