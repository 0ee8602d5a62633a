use serde::Deserialize;
use thiserror::Error;

pub mod window;

pub use window::{ArchiveWindow, DateGranularity, JobDate};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobParseError {
    #[error("invalid job message: {0}")]
    InvalidMessage(String),
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    #[error("invalid device id {0:?}")]
    InvalidDevice(String),
    #[error("invalid {field} {value:?}")]
    InvalidDate { field: &'static str, value: String },
    #[error("empty window: {start} is not before {end}")]
    EmptyWindow { start: String, end: String },
}

/// The wire shape of a queued job. `boxId` is accepted for older producers.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    #[serde(alias = "boxId")]
    pub device_id: String,
    pub start_date: String,
    pub end_date: String,
}

impl JobMessage {
    pub fn from_json(body: &str) -> Result<Self, JobParseError> {
        serde_json::from_str(body).map_err(|e| JobParseError::InvalidMessage(e.to_string()))
    }
}

/// A validated unit of work: one device over one archive window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub device_id: String,
    pub window: ArchiveWindow,
}

impl Job {
    pub fn parse(body: &str) -> Result<Self, JobParseError> {
        Self::try_from(JobMessage::from_json(body)?)
    }

    /// Object key prefix holding this device's archives
    pub fn source_prefix(&self) -> String {
        format!("logs/{}/", self.device_id)
    }

    pub fn collection_name(&self) -> String {
        format!("log-{}", self.device_id)
    }
}

impl TryFrom<JobMessage> for Job {
    type Error = JobParseError;

    fn try_from(message: JobMessage) -> Result<Self, Self::Error> {
        if message.device_id.is_empty() {
            return Err(JobParseError::MissingField("deviceId"));
        }
        if message.start_date.is_empty() {
            return Err(JobParseError::MissingField("startDate"));
        }
        if message.end_date.is_empty() {
            return Err(JobParseError::MissingField("endDate"));
        }
        // The device id becomes a key prefix and a collection name
        if message
            .device_id
            .chars()
            .any(|c| c == '/' || c.is_whitespace() || c.is_control())
        {
            return Err(JobParseError::InvalidDevice(message.device_id));
        }

        let start = JobDate::parse(&message.start_date).ok_or_else(|| JobParseError::InvalidDate {
            field: "startDate",
            value: message.start_date.clone(),
        })?;
        let end = JobDate::parse(&message.end_date).ok_or_else(|| JobParseError::InvalidDate {
            field: "endDate",
            value: message.end_date.clone(),
        })?;
        let window =
            ArchiveWindow::from_dates(&start, &end).ok_or_else(|| JobParseError::InvalidDate {
                field: "endDate",
                value: message.end_date.clone(),
            })?;
        if window.is_empty() {
            return Err(JobParseError::EmptyWindow {
                start: message.start_date,
                end: message.end_date,
            });
        }

        Ok(Self {
            device_id: message.device_id,
            window,
        })
    }
}
