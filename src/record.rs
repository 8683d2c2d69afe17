use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub enum Priority {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Priority {
    /// Maps a producer-supplied priority onto the three known levels.
    /// Anything other than 1 or 3 (including a missing value) becomes medium.
    pub fn normalize(raw: Option<i64>) -> Self {
        match raw {
            Some(1) => Priority::High,
            Some(3) => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.as_u8()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing fields")]
    MissingFields,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// One validated sensor reading. Fields are private so a `Record` can only
/// exist once `device_id`, `metric_name` and `timestamp` have been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    timestamp: DateTime<Utc>,
    device_id: String,
    metric_name: String,
    value: f64,
    priority: Priority,
    payload: String,
}

impl Record {
    pub fn new(
        timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
        priority: Priority,
        payload: impl Into<String>,
    ) -> Result<Self, RecordError> {
        let device_id = device_id.into();
        let metric_name = metric_name.into();
        if device_id.is_empty() || metric_name.is_empty() {
            return Err(RecordError::MissingFields);
        }
        Ok(Self {
            timestamp,
            device_id,
            metric_name,
            value,
            priority,
            payload: payload.into(),
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Wire shape of a reading as producers post it. Every field is optional
/// here so that absence is reported as "missing fields" rather than as a
/// decode failure.
#[derive(Debug, Default, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default, alias = "payload")]
    pub data: Option<String>,
}

impl RawReading {
    pub fn into_record(self) -> Result<Record, RecordError> {
        let timestamp = self.timestamp.unwrap_or_default();
        let device_id = self.device_id.unwrap_or_default();
        let metric_name = self.metric_name.unwrap_or_default();
        if timestamp.is_empty() || device_id.is_empty() || metric_name.is_empty() {
            return Err(RecordError::MissingFields);
        }

        let timestamp = parse_timestamp(&timestamp)?;
        Record::new(
            timestamp,
            device_id,
            metric_name,
            self.value.unwrap_or(0.0),
            Priority::normalize(self.priority),
            self.data.unwrap_or_default(),
        )
    }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RecordError::InvalidTimestamp(raw.to_string()))
}
