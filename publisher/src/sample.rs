//! Metering samples and their serialized record form
//!
//! A [`Sample`] is what the producing pipeline hands over. A [`MeterRecord`] is what
//! travels in a batch payload. The [`SampleSerializer`] sits between the two.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Gauge,
    Delta,
    Cumulative,
}

impl SampleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::Gauge => "gauge",
            SampleType::Delta => "delta",
            SampleType::Cumulative => "cumulative",
        }
    }
}

/// One measurement produced by the pipeline
///
/// # Example
///
/// ```
/// use meterpub::sample::{Sample, SampleType};
///
/// let sample = Sample::new("cpu", SampleType::Cumulative, "ns", 1.5e9, "instance-1");
/// assert_eq!(sample.name, "cpu");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Meter name, also the fan-out category
    pub name: String,

    #[serde(rename = "type")]
    pub sample_type: SampleType,

    pub unit: String,

    pub volume: f64,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub project_id: Option<String>,

    pub resource_id: String,

    /// Measurement time, if the producer knows it
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub resource_metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(default = "default_source")]
    pub source: String,

    /// Unique identifier (ULID by default)
    #[serde(default = "new_id")]
    pub id: String,
}

fn default_source() -> String {
    "openstack".to_string()
}

fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

impl Sample {
    /// Create a sample with a fresh ID and no owner, timestamp or metadata
    pub fn new(
        name: impl Into<String>,
        sample_type: SampleType,
        unit: impl Into<String>,
        volume: f64,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sample_type,
            unit: unit.into(),
            volume,
            user_id: None,
            project_id: None,
            resource_id: resource_id.into(),
            timestamp: None,
            resource_metadata: serde_json::Map::new(),
            source: default_source(),
            id: new_id(),
        }
    }

    /// Set the owning user and project
    pub fn owned_by(mut self, user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the measurement time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Add a resource metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.resource_metadata.insert(key.into(), value.into());
        self
    }
}

/// Serialized sample as carried in a batch payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterRecord {
    pub source: String,
    pub counter_name: String,
    pub counter_type: String,
    pub counter_unit: String,
    pub counter_volume: f64,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub resource_id: String,
    pub timestamp: Option<String>,
    pub resource_metadata: serde_json::Map<String, serde_json::Value>,
    pub message_id: String,
}

impl MeterRecord {
    /// Fan-out category of this record
    pub fn category(&self) -> &str {
        &self.counter_name
    }
}

/// Converts a raw sample into its serialized record form
pub trait SampleSerializer: Send + Sync {
    fn serialize(&self, sample: &Sample) -> MeterRecord;
}

/// Default serializer producing meter messages
#[derive(Debug, Clone, Copy, Default)]
pub struct MeterMessageSerializer;

impl SampleSerializer for MeterMessageSerializer {
    fn serialize(&self, sample: &Sample) -> MeterRecord {
        MeterRecord {
            source: sample.source.clone(),
            counter_name: sample.name.clone(),
            counter_type: sample.sample_type.as_str().to_string(),
            counter_unit: sample.unit.clone(),
            counter_volume: sample.volume,
            user_id: sample.user_id.clone(),
            project_id: sample.project_id.clone(),
            resource_id: sample.resource_id.clone(),
            timestamp: sample
                .timestamp
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            resource_metadata: sample.resource_metadata.clone(),
            message_id: sample.id.clone(),
        }
    }
}

/// Caller-supplied execution context, passed through to the sender unmodified
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry to the context
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Flat map view, used by notification envelopes
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
