use chrono::{DateTime, Utc};
use common_mongo::bson::{doc, DateTime as BsonDateTime, Document};
use thiserror::Error;

use super::service::split_service;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("expected '<timestamp> <address> <message>'")]
    MissingFields,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// One curated log line, as stored in the device's collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredRecord {
    pub timestamp: DateTime<Utc>,
    pub source_address: String,
    pub service_name: String,
    pub message: String,
    pub source_object_key: String,
    pub processed_at: DateTime<Utc>,
}

impl StructuredRecord {
    pub fn to_document(&self) -> Document {
        doc! {
            "timestamp": BsonDateTime::from_millis(self.timestamp.timestamp_millis()),
            "sourceAddress": self.source_address.as_str(),
            "serviceName": self.service_name.as_str(),
            "message": self.message.as_str(),
            "sourceObjectKey": self.source_object_key.as_str(),
            "processedAt": BsonDateTime::from_millis(self.processed_at.timestamp_millis()),
        }
    }
}

pub fn parse_line(
    line: &str,
    source_object_key: &str,
    processed_at: DateTime<Utc>,
) -> Result<StructuredRecord, RecordParseError> {
    let mut parts = line.splitn(3, ' ');
    let (Some(raw_timestamp), Some(source_address), Some(remainder)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(RecordParseError::MissingFields);
    };

    let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
        .map_err(|_| RecordParseError::InvalidTimestamp(raw_timestamp.to_string()))?
        .with_timezone(&Utc);
    let (service_name, message) = split_service(remainder);

    Ok(StructuredRecord {
        timestamp,
        source_address: source_address.to_string(),
        service_name,
        message,
        source_object_key: source_object_key.to_string(),
        processed_at,
    })
}
