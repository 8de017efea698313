//! Execution runner: turns one engine firing into a call of the registered
//! job implementation and a [`CompletedExecution`].
//!
//! Jobs run either directly on the firing task, or (when their job data sets
//! `hardInterruptible`) on a dedicated named worker thread that the firing
//! task supervises and abandons once the firing's cancellation token fires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{CompletedExecution, Firing, JobExecutor};
use crate::jobs::{JobContext, JobRegistry, ScheduledJob};
use crate::models::{JobOutcome, JobResult, JOB_NAME_SEPARATOR};

const EVENT_CAPACITY: usize = 256;

/// Notification that a job ran on this node
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRanEvent {
    pub node: String,
    pub result: JobResult,
    pub fired_at: DateTime<Utc>,
}

pub struct ExecutionRunner {
    registry: Arc<JobRegistry>,
    interruptible_wait: Duration,
    node: String,
    events: broadcast::Sender<JobRanEvent>,
}

impl ExecutionRunner {
    pub fn new(registry: Arc<JobRegistry>, interruptible_wait: Duration, node: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            interruptible_wait,
            node: node.into(),
            events,
        }
    }

    /// Receive a [`JobRanEvent`] for every completed firing not marked run-once
    pub fn subscribe(&self) -> broadcast::Receiver<JobRanEvent> {
        self.events.subscribe()
    }

    fn resolve(&self, firing: &Firing) -> Result<Arc<dyn ScheduledJob>, String> {
        let descriptor = &firing.descriptor;
        let component = descriptor.component();
        let bean = match descriptor.data.job_bean_name.as_deref() {
            Some(bean) => bean,
            None => {
                let prefix = format!("{}{}", component, JOB_NAME_SEPARATOR);
                descriptor.key.name.strip_prefix(&prefix).unwrap_or(&descriptor.key.name)
            }
        };
        self.registry.resolve(component, bean).map_err(|e| e.to_string())
    }

    async fn run_direct(job: Arc<dyn ScheduledJob>, context: JobContext) -> Result<JobOutcome, String> {
        match AssertUnwindSafe(job.execute(&context)).catch_unwind().await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(format!("{:?}", e)),
            Err(panic) => Err(panic_message(panic)),
        }
    }

    /// Run the job on its own thread and poll it until it finishes or the
    /// firing is cancelled. A cancelled worker is detached.
    async fn run_interruptible(&self, job: Arc<dyn ScheduledJob>, context: JobContext) -> Result<JobOutcome, String> {
        let token = context.cancellation.clone();
        let key = context.key.clone();
        let handle = Handle::current();
        let (tx, mut rx) = oneshot::channel();

        let worker = std::thread::Builder::new()
            .name(format!("job-{}", key))
            .spawn(move || {
                let result = handle.block_on(async {
                    tokio::select! {
                        result = AssertUnwindSafe(job.execute(&context)).catch_unwind() => Some(result),
                        _ = context.cancellation.cancelled() => None,
                    }
                });
                let _ = tx.send(result);
            })
            .map_err(|e| format!("failed to spawn worker thread: {}", e))?;

        loop {
            tokio::select! {
                received = &mut rx => {
                    return match received {
                        Ok(Some(Ok(Ok(outcome)))) => Ok(outcome),
                        Ok(Some(Ok(Err(e)))) => Err(format!("{:?}", e)),
                        Ok(Some(Err(panic))) => Err(panic_message(panic)),
                        Ok(None) => Err(format!("job {} was interrupted", key)),
                        Err(_) => Err(format!("worker thread of job {} exited without a result", key)),
                    };
                }
                _ = token.cancelled() => {
                    warn!(job = %key, "Interrupting worker thread");
                    return Err(format!("job {} was interrupted", key));
                }
                _ = tokio::time::sleep(self.interruptible_wait) => {
                    if worker.is_finished() {
                        continue;
                    }
                    debug!(job = %key, "Worker thread still running");
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("job panicked: {}", message)
}

#[async_trait]
impl JobExecutor for ExecutionRunner {
    async fn execute(&self, firing: &Firing) -> CompletedExecution {
        let descriptor = &firing.descriptor;
        let key = descriptor.key.clone();
        let component = descriptor.component().to_string();
        let started_at = Utc::now();

        let result = match self.resolve(firing) {
            Ok(job) => {
                let context = JobContext {
                    key: key.clone(),
                    component: component.clone(),
                    trigger_name: firing.trigger_name.clone(),
                    data: descriptor.data.clone(),
                    fired_at: firing.fired_at,
                    cancellation: firing.cancellation.clone(),
                };
                info!(job = %key, trigger = %firing.trigger_name, "Executing job");
                if descriptor.data.hard_interruptible {
                    self.run_interruptible(job, context).await
                } else {
                    Self::run_direct(job, context).await
                }
            }
            Err(e) => Err(e),
        };

        let (outcome, error) = match result {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                error!(job = %key, "Job execution failed: {}", e);
                (JobOutcome::default(), Some(e))
            }
        };

        let completed = CompletedExecution {
            key,
            component,
            trigger_name: firing.trigger_name.clone(),
            started_at,
            finished_at: Utc::now(),
            run_once: descriptor.data.run_once,
            outcome,
            error,
        };

        info!(
            job = %completed.key,
            "Job finished with {} after {}ms",
            completed.result(),
            (completed.finished_at - completed.started_at).num_milliseconds()
        );

        if descriptor.data.run_once {
            debug!(job = %completed.key, "Run-once job, not broadcasting completion");
        } else {
            let event = JobRanEvent {
                node: self.node.clone(),
                result: JobResult {
                    site: completed.key.tenant.clone(),
                    application: completed.component.clone(),
                    job_name: completed.key.name.clone(),
                    result: completed.result(),
                    custom_data: completed.outcome.custom_data.clone(),
                },
                fired_at: firing.fired_at,
            };
            // no subscribers is fine
            let _ = self.events.send(event);
        }

        completed
    }
}

/// Log job-ran notifications until the runner is dropped.
/// Returns the number of events seen.
pub async fn log_job_events(mut events: broadcast::Receiver<JobRanEvent>) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                seen += 1;
                debug!(
                    node = %event.node,
                    "Job {} of {}/{} ran with {}",
                    event.result.job_name,
                    event.result.site,
                    event.result.application,
                    event.result.result
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Missed {} job-ran notifications", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionResult, JobData, JobDescriptor, JobKey, TriggerKind};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct Succeeds;

    #[async_trait]
    impl ScheduledJob for Succeeds {
        fn description(&self) -> String {
            "succeeds".to_string()
        }

        async fn execute(&self, _context: &JobContext) -> anyhow::Result<JobOutcome> {
            Ok(JobOutcome::default().with_custom_data("42"))
        }
    }

    struct Fails;

    #[async_trait]
    impl ScheduledJob for Fails {
        fn description(&self) -> String {
            "fails".to_string()
        }

        async fn execute(&self, _context: &JobContext) -> anyhow::Result<JobOutcome> {
            anyhow::bail!("index unavailable")
        }
    }

    struct Panics;

    #[async_trait]
    impl ScheduledJob for Panics {
        fn description(&self) -> String {
            "panics".to_string()
        }

        async fn execute(&self, _context: &JobContext) -> anyhow::Result<JobOutcome> {
            panic!("boom")
        }
    }

    fn runner() -> ExecutionRunner {
        let registry = JobRegistry::new()
            .register("search", "indexJob", Arc::new(Succeeds))
            .register("search", "failingJob", Arc::new(Fails))
            .register("search", "panickingJob", Arc::new(Panics));
        ExecutionRunner::new(Arc::new(registry), Duration::from_millis(20), "node-a")
    }

    fn firing(bean: &str, data: JobData) -> Firing {
        let key = JobKey::for_implementation("site", "search", bean);
        let mut data = data;
        data.origin = Some("search".to_string());
        Firing {
            id: Uuid::new_v4(),
            descriptor: JobDescriptor::new(key, "test", data),
            trigger_name: "t".to_string(),
            trigger_kind: TriggerKind::Simple,
            fired_at: Utc::now(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_success_broadcasts_result() {
        let runner = runner();
        let mut events = runner.subscribe();

        let completed = runner.execute(&firing("indexJob", JobData::default())).await;
        assert_eq!(completed.result(), ExecutionResult::Success);
        assert_eq!(completed.error, None);

        let event = events.try_recv().unwrap();
        assert_eq!(event.node, "node-a");
        assert_eq!(event.result.job_name, "search_indexJob");
        assert_eq!(event.result.custom_data.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_event_logger_drains_until_runner_dropped() {
        let runner = runner();
        let logger = tokio::spawn(log_job_events(runner.subscribe()));

        runner.execute(&firing("indexJob", JobData::default())).await;
        runner.execute(&firing("failingJob", JobData::default())).await;
        drop(runner);

        assert_eq!(logger.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_once_is_not_broadcast() {
        let runner = runner();
        let mut events = runner.subscribe();
        let data = JobData {
            run_once: true,
            ..JobData::default()
        };

        let completed = runner.execute(&firing("indexJob", data)).await;
        assert!(completed.run_once);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_captured() {
        let runner = runner();

        let completed = runner.execute(&firing("failingJob", JobData::default())).await;
        assert_eq!(completed.result(), ExecutionResult::Fail);
        assert!(completed.error.unwrap().contains("index unavailable"));

        let completed = runner.execute(&firing("panickingJob", JobData::default())).await;
        assert_eq!(completed.result(), ExecutionResult::Fail);
        assert!(completed.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_unregistered_implementation_fails() {
        let runner = runner();
        let completed = runner.execute(&firing("goneJob", JobData::default())).await;
        assert_eq!(completed.result(), ExecutionResult::Fail);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interruptible_mode_runs_to_completion() {
        let runner = runner();
        let data = JobData {
            hard_interruptible: true,
            ..JobData::default()
        };

        let completed = runner.execute(&firing("indexJob", data)).await;
        assert_eq!(completed.result(), ExecutionResult::Success);
        assert_eq!(completed.outcome.custom_data.as_deref(), Some("42"));
    }
}
