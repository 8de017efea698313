use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::job::{JobData, TimeUnit};
use super::record::{ExecutionRecord, ExecutionResult};

/// Health verdict of a job. The numeric code follows the usual monitoring
/// plugin convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Ok,
    Warn,
    Error,
    Undefined,
}

impl HealthState {
    pub fn code(&self) -> u8 {
        match self {
            HealthState::Ok => 0,
            HealthState::Warn => 1,
            HealthState::Error => 2,
            HealthState::Undefined => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HealthState::Ok => "OK",
            HealthState::Warn => "WARN",
            HealthState::Error => "ERROR",
            HealthState::Undefined => "UNDEFINED",
        }
    }
}

impl Serialize for HealthState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthThresholds {
    pub warn: Option<u32>,
    pub error: Option<u32>,
    pub time_unit: Option<TimeUnit>,
    pub disabled: bool,
}

impl HealthThresholds {
    pub fn any_set(&self) -> bool {
        self.warn.is_some() || self.error.is_some()
    }
}

/// Record as embedded in a health-state response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub run_once: bool,
    pub duration: i64,
    pub node: Option<String>,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

impl From<&ExecutionRecord> for RecordSummary {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            id: record.id,
            start: record.start_time,
            end: record.end_time,
            run_once: record.run_once,
            duration: record.duration,
            node: record.node.clone(),
            state: match record.result {
                ExecutionResult::Success => "OK",
                ExecutionResult::Fail => "ERROR",
            },
            stacktrace: record.stacktrace.clone(),
        }
    }
}

/// Health-state report for one job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub site: String,
    pub application: String,
    pub job: String,
    pub job_data: JobData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_warn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_error: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeunit: Option<TimeUnit>,
    pub total_records: i64,
    pub total_success: i64,
    pub total_failed: i64,
    pub started_after: Option<DateTime<Utc>>,
    pub state: HealthState,
    pub state_name: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<RecordSummary>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListEntry {
    pub site: String,
    pub application: String,
    pub job: String,
    #[serde(rename = "self")]
    pub self_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_data: Option<JobData>,
    pub thresholds_present: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobList {
    pub jobs: Vec<JobListEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_as_code() {
        assert_eq!(serde_json::to_value(HealthState::Ok).unwrap(), 0);
        assert_eq!(serde_json::to_value(HealthState::Error).unwrap(), 2);
        assert_eq!(HealthState::Undefined.code(), 3);
        assert_eq!(HealthState::Warn.name(), "WARN");
    }
}
