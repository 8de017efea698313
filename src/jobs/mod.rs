//! Job implementations and the registry that resolves them

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::models::{JobData, JobKey, JobOutcome};

pub mod housekeeping;
pub mod registry;

pub use housekeeping::RecordHousekeepingJob;
pub use registry::JobRegistry;

/// Business logic of a schedulable job
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn description(&self) -> String;

    /// Defaults merged into the stored job data on every registration
    fn job_data(&self) -> JobData {
        JobData::default()
    }

    async fn execute(&self, context: &JobContext) -> anyhow::Result<JobOutcome>;
}

/// Immutable view of one firing handed to a job
#[derive(Debug, Clone)]
pub struct JobContext {
    pub key: JobKey,
    pub component: String,
    pub trigger_name: String,
    pub data: JobData,
    pub fired_at: DateTime<Utc>,
    /// Cancelled when an interruptible firing is asked to stop
    pub cancellation: CancellationToken,
}

impl JobContext {
    pub fn tenant(&self) -> &str {
        &self.key.tenant
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
