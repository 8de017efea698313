use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::datetime::deserialize_optional_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionResult {
    Success,
    Fail,
}

impl ExecutionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionResult::Success => "SUCCESS",
            ExecutionResult::Fail => "FAIL",
        }
    }
}

impl FromStr for ExecutionResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SUCCESS" => Ok(ExecutionResult::Success),
            "FAIL" => Ok(ExecutionResult::Fail),
            other => Err(format!("unknown execution result '{}'", other)),
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed firing, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: i64,
    pub site: String,
    pub application: String,
    pub job_name: String,
    pub trigger_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Whole seconds
    pub duration: i64,
    pub run_once: bool,
    pub result: ExecutionResult,
    pub stacktrace: Option<String>,
    pub custom_data: Option<String>,
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionRecord {
    pub site: String,
    pub application: String,
    pub job_name: String,
    pub trigger_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub run_once: bool,
    pub result: ExecutionResult,
    pub stacktrace: Option<String>,
    pub custom_data: Option<String>,
    pub node: Option<String>,
}

impl NewExecutionRecord {
    /// Duration in whole seconds, never negative
    pub fn duration_secs(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds().max(0)
    }
}

/// Filter for execution history queries. `site` is always required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    #[serde(skip)]
    pub site: String,
    pub component: Option<String>,
    #[serde(alias = "jobName")]
    pub job: Option<String>,
    pub result: Option<ExecutionResult>,
    #[serde(default, deserialize_with = "deserialize_optional_datetime")]
    pub started_after: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_datetime")]
    pub started_before: Option<DateTime<Utc>>,
    /// Minimum duration in seconds
    pub min_duration: Option<i64>,
}

impl RecordQuery {
    pub fn for_site(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            ..Default::default()
        }
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn result(mut self, result: ExecutionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn between(mut self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        self.started_after = after;
        self.started_before = before;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page index
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<ExecutionRecord>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Distinct values available for record filters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordFilterValues {
    pub components: Vec<String>,
    pub jobs: Vec<String>,
}

/// Outcome a job reports about itself
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    pub result: Option<ExecutionResult>,
    pub custom_data: Option<String>,
}

impl JobOutcome {
    pub fn success() -> Self {
        Self {
            result: Some(ExecutionResult::Success),
            custom_data: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            result: Some(ExecutionResult::Fail),
            custom_data: None,
        }
    }

    pub fn with_custom_data(mut self, data: impl Into<String>) -> Self {
        self.custom_data = Some(data.into());
        self
    }
}

/// Typed result of one firing, handed from the runner to the listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub site: String,
    pub application: String,
    pub job_name: String,
    pub result: ExecutionResult,
    pub custom_data: Option<String>,
}
