use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::{JobContext, ScheduledJob};
use crate::config::RecordsConfig;
use crate::database::Database;
use crate::models::{JobData, JobOutcome};

pub const HOUSEKEEPING_COMPONENT: &str = "scheduler";
pub const HOUSEKEEPING_JOB: &str = "recordHousekeeping";

/// Deletes execution records past their configured lifetime for the firing tenant.
/// Reports the number of deleted records as custom data. Runs as a run-once
/// job, so its completion is not broadcast.
pub struct RecordHousekeepingJob {
    database: Database,
    lifetime_days: Option<u32>,
    enabled: bool,
    cron_expression: String,
}

impl RecordHousekeepingJob {
    pub fn new(database: Database, config: &RecordsConfig) -> Self {
        Self {
            database,
            lifetime_days: config.lifetime_days,
            enabled: config.housekeeping_enabled,
            cron_expression: config.housekeeping_cron.clone(),
        }
    }
}

#[async_trait]
impl ScheduledJob for RecordHousekeepingJob {
    fn description(&self) -> String {
        "Removes outdated job execution records".to_string()
    }

    fn job_data(&self) -> JobData {
        JobData {
            run_once: true,
            ..JobData::default()
                .with_cron(self.cron_expression.clone())
                .enabled(self.enabled)
        }
    }

    async fn execute(&self, context: &JobContext) -> anyhow::Result<JobOutcome> {
        let deleted = self
            .database
            .cleanup_execution_records(context.tenant(), self.lifetime_days, Utc::now())
            .await?;

        let outcome = JobOutcome::success();
        Ok(match deleted {
            Some(count) => {
                info!("Housekeeping removed {} records for {}", count, context.tenant());
                outcome.with_custom_data(count.to_string())
            }
            None => outcome,
        })
    }
}
