//! Scheduling engine adapter
//!
//! [`SchedulingEngine`] is everything the lifecycle layer needs from a cron
//! engine: durable job descriptors, triggers and a view of what is currently
//! executing. [`CronEngine`] is the bundled in-process implementation backed
//! by the service database.
//!
//! Firings are handed to a [`JobExecutor`]; once it returns, every registered
//! [`ExecutionListener`] sees the [`CompletedExecution`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::EngineResult;
use crate::models::{
    ExecutionResult, JobDescriptor, JobKey, JobOutcome, NewTrigger, Trigger, TriggerKind,
};

pub mod cron_engine;
pub mod dialect;

pub use cron_engine::{next_fire_time, parse_cron, CronEngine, EngineSettings};
pub use dialect::SqlDialect;

#[async_trait]
pub trait SchedulingEngine: Send + Sync {
    /// Insert or replace a job descriptor
    async fn upsert_job(&self, descriptor: &JobDescriptor) -> EngineResult<()>;

    async fn get_job(&self, key: &JobKey) -> EngineResult<Option<JobDescriptor>>;

    async fn job_exists(&self, key: &JobKey) -> EngineResult<bool>;

    /// Remove a descriptor together with all of its triggers
    async fn delete_job(&self, key: &JobKey) -> EngineResult<bool>;

    async fn job_keys(&self, tenant: &str) -> EngineResult<Vec<JobKey>>;

    /// Store a trigger. Rejects a second cron trigger for the same job.
    async fn create_trigger(&self, trigger: NewTrigger) -> EngineResult<Trigger>;

    async fn replace_trigger(&self, old_name: &str, trigger: NewTrigger) -> EngineResult<Trigger>;

    async fn remove_trigger(&self, name: &str) -> EngineResult<bool>;

    async fn triggers_of(&self, key: &JobKey) -> EngineResult<Vec<Trigger>>;

    /// Firings that have started and not yet completed
    async fn currently_executing(&self) -> Vec<ExecutingJob>;

    /// Request cancellation of every executing firing of `key`.
    /// Returns the number of firings signalled.
    async fn interrupt(&self, key: &JobKey) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutingJob {
    pub firing_id: Uuid,
    pub key: JobKey,
    pub trigger_name: String,
    pub fired_at: DateTime<Utc>,
}

/// One firing of a job as handed to the executor
#[derive(Debug, Clone)]
pub struct Firing {
    pub id: Uuid,
    /// Snapshot of the descriptor at fire time
    pub descriptor: JobDescriptor,
    pub trigger_name: String,
    pub trigger_kind: TriggerKind,
    pub fired_at: DateTime<Utc>,
    pub cancellation: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExecution {
    pub key: JobKey,
    pub component: String,
    pub trigger_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub run_once: bool,
    /// What the job reported about itself
    pub outcome: JobOutcome,
    /// Rendered error chain if the job failed or was interrupted
    pub error: Option<String>,
}

impl CompletedExecution {
    /// Self-reported result, else `FAIL` on error, else `SUCCESS`
    pub fn result(&self) -> ExecutionResult {
        match (self.outcome.result, &self.error) {
            (Some(result), _) => result,
            (None, Some(_)) => ExecutionResult::Fail,
            (None, None) => ExecutionResult::Success,
        }
    }
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, firing: &Firing) -> CompletedExecution;
}

/// Post-execution callback
#[async_trait]
pub trait ExecutionListener: Send + Sync {
    async fn job_was_executed(&self, execution: &CompletedExecution);
}
