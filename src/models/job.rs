use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Stage name under which the worker records its timestamps.
pub const APP_TIER_STAGE: &str = "apptier";

/// Request/response wall-clock pair for one processing stage, in epoch millis.
///
/// Other keys a stage carries are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A classification job envelope as it travels through the queues.
///
/// Fields this service does not interpret are kept in `extra` so the
/// response envelope carries everything the producer sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Job {
    /// Producer-assigned identifier, carried as-is for logging.
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Location of the input image in the input bucket.
    #[garde(length(min = 1, max = 1024))]
    #[serde(rename = "s3_key", alias = "storage_key")]
    pub storage_key: String,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub timestamps: BTreeMap<String, StageTimestamps>,

    #[garde(skip)]
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            id: Some(Value::String(Uuid::new_v4().to_string())),
            storage_key: storage_key.into(),
            result: None,
            timestamps: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Parse and validate a queue message body.
    pub fn parse(body: &str) -> Result<Self, JobError> {
        let job: Job = serde_json::from_str(body).map_err(JobError::Malformed)?;
        job.validate().map_err(JobError::Invalid)?;
        Ok(job)
    }

    /// File name component of the storage key, e.g. `cat.jpg` for `uploads/cat.jpg`.
    pub fn output_name(&self) -> &str {
        self.storage_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_key)
    }

    /// Object key the result is stored under: the output name without its extension.
    pub fn result_key(&self) -> &str {
        let name = self.output_name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// Record the classification label and this tier's timing.
    pub fn record_result(&mut self, label: &str, request_time: i64, response_time: i64) {
        self.result = Some(label.to_string());
        let stage = self.timestamps.entry(APP_TIER_STAGE.to_string()).or_default();
        stage.request = Some(request_time);
        stage.response = Some(response_time);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Malformed job envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid job envelope: {0}")]
    Invalid(#[from] garde::Report),
}

/// Single-use receipt for one delivery of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryToken(pub String);

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw job body together with the token proving its receipt.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub token: DeliveryToken,
    pub body: String,
}

/// The `(name, label)` pair persisted to the results bucket.
///
/// Serialized as the literal `name,label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub name: String,
    pub label: String,
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.name, self.label)
    }
}

impl FromStr for ResultRecord {
    type Err = ResultRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, label) = s.split_once(',').ok_or(ResultRecordError)?;
        Ok(Self {
            name: name.to_string(),
            label: label.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Result record is missing the name/label separator")]
pub struct ResultRecordError;
