use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::{
    CompletedExecution, ExecutingJob, ExecutionListener, Firing, JobExecutor, SchedulingEngine,
    SqlDialect,
};
use crate::config::{DatabaseConfig, SchedulerConfig};
use crate::database::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::{JobDescriptor, JobKey, NewTrigger, Trigger, TriggerKind};

/// Parse a cron expression (seconds field first, optional year).
/// `?` is accepted as a day wildcard.
pub fn parse_cron(expression: &str) -> EngineResult<Schedule> {
    let normalized = expression
        .split_whitespace()
        .map(|field| if field == "?" { "*" } else { field })
        .collect::<Vec<_>>()
        .join(" ");

    Schedule::from_str(&normalized).map_err(|e| EngineError::InvalidCron {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

/// Next fire time strictly after `after`, if the expression ever fires again
pub fn next_fire_time(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    parse_cron(expression).ok()?.after(&after).next()
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub dialect: SqlDialect,
}

impl EngineSettings {
    pub fn from_config(scheduler: &SchedulerConfig, database: &DatabaseConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(scheduler.tick_interval_ms.max(10)),
            max_concurrent_jobs: scheduler.max_concurrent_jobs.max(1),
            dialect: SqlDialect::from_database_url(&database.url),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_jobs: 10,
            dialect: SqlDialect::Sqlite,
        }
    }
}

struct ExecutingEntry {
    job: ExecutingJob,
    token: CancellationToken,
}

/// In-process cron engine storing jobs and triggers in the service database
pub struct CronEngine {
    database: Database,
    settings: EngineSettings,
    executor: Arc<dyn JobExecutor>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    executing: Arc<RwLock<HashMap<Uuid, ExecutingEntry>>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl CronEngine {
    pub fn new(database: Database, settings: EngineSettings, executor: Arc<dyn JobExecutor>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs));
        Self {
            database,
            settings,
            executor,
            listeners: Vec::new(),
            executing: Arc::new(RwLock::new(HashMap::new())),
            permits,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Run the tick loop until [`CronEngine::shutdown`] is called
    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting cron engine (tick {:?}, {} worker permits, {:?} locking)",
            self.settings.tick_interval, self.settings.max_concurrent_jobs, self.settings.dialect
        );

        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Cron engine stopped");
                    break;
                }
                _ = ticker.tick() => {
                    trace!("Engine tick - checking due triggers");
                    if let Err(e) = self.tick().await {
                        error!("Failed to process due triggers: {}", e);
                    }
                }
            }
        }
    }

    /// Stop the tick loop, cancel every executing firing and refuse new ones
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.permits.close();
    }

    /// Claim and dispatch every trigger that is due now
    pub async fn tick(self: &Arc<Self>) -> EngineResult<usize> {
        let now = Utc::now();
        let due = self
            .database
            .claim_due_triggers(self.settings.dialect.lock_sql(), now, |trigger| {
                trigger
                    .cron_expression
                    .as_deref()
                    .and_then(|expression| next_fire_time(expression, now))
            })
            .await?;

        let mut dispatched = 0;
        for trigger in due {
            if self.dispatch(trigger, now).await {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    async fn dispatch(self: &Arc<Self>, trigger: Trigger, fired_at: DateTime<Utc>) -> bool {
        let descriptor = match self.database.get_job(&trigger.job).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                warn!("Trigger '{}' fired for unknown job {}", trigger.name, trigger.job);
                self.discard_one_shot(&trigger).await;
                return false;
            }
            Err(e) => {
                error!("Failed to load job {} for trigger '{}': {}", trigger.job, trigger.name, e);
                return false;
            }
        };

        // waits for a free worker, so queued firings never show up as executing
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Engine shut down, dropping firing of {} by '{}'", trigger.job, trigger.name);
                self.discard_one_shot(&trigger).await;
                return false;
            }
        };

        let token = self.shutdown.child_token();
        let firing_id = Uuid::new_v4();
        {
            let mut executing = self.executing.write().await;
            if descriptor.concurrent_execution_disallowed()
                && executing.values().any(|entry| entry.job.key == trigger.job)
            {
                drop(executing);
                warn!(
                    "Skipping firing of {} by '{}': job is still executing and disallows concurrent execution",
                    trigger.job, trigger.name
                );
                self.discard_one_shot(&trigger).await;
                return false;
            }
            executing.insert(
                firing_id,
                ExecutingEntry {
                    job: ExecutingJob {
                        firing_id,
                        key: trigger.job.clone(),
                        trigger_name: trigger.name.clone(),
                        fired_at,
                    },
                    token: token.clone(),
                },
            );
        }

        debug!("Firing job {} via trigger '{}'", trigger.job, trigger.name);
        let firing = Firing {
            id: firing_id,
            descriptor,
            trigger_name: trigger.name.clone(),
            trigger_kind: trigger.kind,
            fired_at,
            cancellation: token,
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_firing(firing, permit).await;
        });
        true
    }

    async fn run_firing(&self, firing: Firing, _permit: OwnedSemaphorePermit) {
        let completed = self.executor.execute(&firing).await;
        self.notify_listeners(&completed).await;

        if firing.trigger_kind == TriggerKind::Simple {
            if let Err(e) = self.database.delete_trigger(&firing.trigger_name).await {
                warn!("Failed to remove completed trigger '{}': {}", firing.trigger_name, e);
            }
        }

        self.executing.write().await.remove(&firing.id);
        trace!(
            "Firing of {} finished with {}",
            completed.key,
            completed.result()
        );
    }

    async fn notify_listeners(&self, completed: &CompletedExecution) {
        for listener in &self.listeners {
            listener.job_was_executed(completed).await;
        }
    }

    async fn discard_one_shot(&self, trigger: &Trigger) {
        if trigger.kind == TriggerKind::Simple {
            if let Err(e) = self.database.delete_trigger(&trigger.name).await {
                warn!("Failed to remove trigger '{}': {}", trigger.name, e);
            }
        }
    }

    fn initial_fire_time(trigger: &NewTrigger) -> EngineResult<Option<DateTime<Utc>>> {
        let now = Utc::now();
        match trigger.kind {
            TriggerKind::Simple => Ok(Some(now)),
            TriggerKind::Cron => {
                let expression = trigger.cron_expression.as_deref().unwrap_or_default();
                let schedule = parse_cron(expression)?;
                let next = schedule.after(&now).next();
                if next.is_none() {
                    warn!(
                        "Cron expression '{}' for job {} never fires again",
                        expression, trigger.job
                    );
                }
                Ok(next)
            }
        }
    }
}

#[async_trait]
impl SchedulingEngine for CronEngine {
    async fn upsert_job(&self, descriptor: &JobDescriptor) -> EngineResult<()> {
        self.database.upsert_job(descriptor).await
    }

    async fn get_job(&self, key: &JobKey) -> EngineResult<Option<JobDescriptor>> {
        self.database.get_job(key).await
    }

    async fn job_exists(&self, key: &JobKey) -> EngineResult<bool> {
        self.database.job_exists(key).await
    }

    async fn delete_job(&self, key: &JobKey) -> EngineResult<bool> {
        self.database.delete_job(key).await
    }

    async fn job_keys(&self, tenant: &str) -> EngineResult<Vec<JobKey>> {
        self.database.job_keys(tenant).await
    }

    async fn create_trigger(&self, trigger: NewTrigger) -> EngineResult<Trigger> {
        let next = Self::initial_fire_time(&trigger)?;
        self.database.insert_trigger(&trigger, next).await
    }

    async fn replace_trigger(&self, old_name: &str, trigger: NewTrigger) -> EngineResult<Trigger> {
        let next = Self::initial_fire_time(&trigger)?;
        self.database.replace_trigger(old_name, &trigger, next).await
    }

    async fn remove_trigger(&self, name: &str) -> EngineResult<bool> {
        self.database.delete_trigger(name).await
    }

    async fn triggers_of(&self, key: &JobKey) -> EngineResult<Vec<Trigger>> {
        self.database.triggers_of(key).await
    }

    async fn currently_executing(&self) -> Vec<ExecutingJob> {
        self.executing
            .read()
            .await
            .values()
            .map(|entry| entry.job.clone())
            .collect()
    }

    async fn interrupt(&self, key: &JobKey) -> usize {
        let executing = self.executing.read().await;
        let mut signalled = 0;
        for entry in executing.values().filter(|entry| &entry.job.key == key) {
            entry.token.cancel();
            signalled += 1;
        }
        if signalled > 0 {
            info!("Interrupt requested for {} firing(s) of {}", signalled, key);
        }
        signalled
    }
}
