pub mod health;
pub mod job;
pub mod record;

pub use health::{HealthState, HealthThresholds, JobList, JobListEntry, JobState, RecordSummary};
pub use job::{
    JobData, JobDescriptor, JobKey, NewTrigger, TimeUnit, Trigger, TriggerKind, TriggerState,
    JOB_NAME_SEPARATOR,
};
pub use record::{
    ExecutionRecord, ExecutionResult, JobOutcome, JobResult, NewExecutionRecord, PageRequest,
    RecordFilterValues, RecordPage, RecordQuery,
};
