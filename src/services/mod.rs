//! Service layer: job lifecycle, execution and health evaluation

pub mod health;
pub mod lifecycle;
pub mod recording;
pub mod runner;

pub use health::{classify, HealthStateEvaluator};
pub use lifecycle::{CreateJob, JobLifecycleManager, JobStatus, ReconcileReport};
pub use recording::RecordingListener;
pub use runner::{log_job_events, ExecutionRunner, JobRanEvent};
