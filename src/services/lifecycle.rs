//! Job lifecycle management
//!
//! Owns descriptor CRUD and the trigger state machine on top of a
//! [`SchedulingEngine`]:
//!
//! ```text
//! UNSCHEDULED --schedule--> SCHEDULED --fire--> RUNNING --done--> SCHEDULED
//! UNSCHEDULED --run once--> RUNNING --done--> UNSCHEDULED
//! SCHEDULED --unschedule--> UNSCHEDULED (cron expression kept for re-enable)
//! ```
//!
//! Validation runs before any mutation. Conflicts are reported as
//! [`LifecycleError`] values and leave the engine untouched.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::engine::{parse_cron, SchedulingEngine};
use crate::errors::{LifecycleError, LifecycleResult};
use crate::jobs::{JobRegistry, ScheduledJob};
use crate::models::{
    JobData, JobDescriptor, JobKey, NewTrigger, Trigger, TriggerKind, JOB_NAME_SEPARATOR,
};

/// Descriptor with its current cron trigger and running flag
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job: JobDescriptor,
    pub trigger: Option<Trigger>,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub registered: usize,
    pub scheduled: usize,
    pub disabled: usize,
    pub orphaned: usize,
    pub failed: usize,
}

/// Request to create a job from a registered implementation
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub component: String,
    pub bean: String,
    pub name: String,
    pub cron_expression: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct JobLifecycleManager {
    engine: Arc<dyn SchedulingEngine>,
    registry: Arc<JobRegistry>,
}

impl JobLifecycleManager {
    pub fn new(engine: Arc<dyn SchedulingEngine>, registry: Arc<JobRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Startup pass for one tenant: optional validation of stored jobs,
    /// then registration of every implementation of the enabled components.
    pub async fn reconcile_tenant(
        &self,
        tenant: &str,
        components: &[String],
        validate: bool,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if validate {
            match self.validate_jobs(tenant, components).await {
                Ok(orphaned) => report.orphaned = orphaned,
                Err(e) => error!("Validation of stored jobs for tenant '{}' failed: {}", tenant, e),
            }
        }

        for component in components {
            if !self.registry.has_component(component) {
                warn!("Tenant '{}' enables unknown component '{}'", tenant, component);
                continue;
            }
            for (bean, job) in self.registry.jobs_of(component) {
                match self.register_job(tenant, component, &bean, job.as_ref()).await {
                    Ok(scheduled) => {
                        report.registered += 1;
                        if scheduled {
                            report.scheduled += 1;
                        } else {
                            report.disabled += 1;
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!("Failed to register job {}/{} for '{}': {}", component, bean, tenant, e);
                    }
                }
            }
        }

        info!(
            "Reconciled tenant '{}': {} registered, {} scheduled, {} disabled, {} orphaned, {} failed",
            tenant, report.registered, report.scheduled, report.disabled, report.orphaned, report.failed
        );
        report
    }

    /// Merge implementation defaults into the stored descriptor, persist it and
    /// bring its cron trigger in line. Returns whether the job ends up scheduled.
    pub async fn register_job(
        &self,
        tenant: &str,
        component: &str,
        bean: &str,
        job: &dyn ScheduledJob,
    ) -> LifecycleResult<bool> {
        let key = JobKey::for_implementation(tenant, component, bean);
        let stored = self.engine.get_job(&key).await?;

        if stored.as_ref().is_some_and(|d| d.data.forcefully_disabled) {
            info!("Job {} was disabled forcefully and is being re-enabled", key);
        }

        let data = JobData::reconcile(stored.as_ref().map(|d| &d.data), &job.job_data(), component, bean);
        let descriptor = match stored {
            Some(mut descriptor) => {
                descriptor.description = job.description();
                descriptor.data = data;
                descriptor.updated_at = Utc::now();
                descriptor
            }
            None => JobDescriptor::new(key.clone(), job.description(), data),
        };
        self.engine.upsert_job(&descriptor).await?;
        debug!("Registered job {}", key);

        let existing = self.cron_trigger(&key).await?;
        let cron = descriptor.data.cron().map(str::to_string);

        match (descriptor.data.enabled, cron, existing) {
            (true, Some(cron), existing) => {
                if parse_cron(&cron).is_err() {
                    warn!("Job {} has invalid cron expression '{}', not scheduling", key, cron);
                    if let Some(trigger) = existing {
                        self.engine.remove_trigger(&trigger.name).await?;
                    }
                    return Ok(false);
                }
                match existing {
                    None => {
                        let trigger = self.engine.create_trigger(NewTrigger::cron(&key, &cron)).await?;
                        info!("Created trigger '{}' for job {} with expression '{}'", trigger.name, key, cron);
                    }
                    Some(trigger) if trigger.cron_expression.as_deref() != Some(cron.as_str()) => {
                        let replaced = self
                            .engine
                            .replace_trigger(&trigger.name, NewTrigger::cron(&key, &cron))
                            .await?;
                        info!("Rescheduled job {} with expression '{}' ({})", key, cron, replaced.name);
                    }
                    Some(_) => debug!("Job {} already scheduled with '{}'", key, cron),
                }
                Ok(true)
            }
            (_, _, Some(trigger)) => {
                self.engine.remove_trigger(&trigger.name).await?;
                info!("Removed trigger '{}' of disabled job {}", trigger.name, key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Unschedule stored jobs whose implementation no longer resolves.
    /// Descriptors are kept. Returns the number of orphaned jobs.
    pub async fn validate_jobs(&self, tenant: &str, components: &[String]) -> LifecycleResult<usize> {
        let mut orphaned = 0;

        for key in self.engine.job_keys(tenant).await? {
            let Some(mut descriptor) = self.engine.get_job(&key).await? else {
                continue;
            };
            let component = descriptor.component().to_string();

            let bean = match descriptor.data.job_bean_name.clone() {
                Some(bean) => bean,
                None => {
                    let prefix = format!("{}{}", component, JOB_NAME_SEPARATOR);
                    let bean = key.name.strip_prefix(&prefix).unwrap_or(&key.name).to_string();
                    descriptor.data.job_bean_name = Some(bean.clone());
                    descriptor.updated_at = Utc::now();
                    self.engine.upsert_job(&descriptor).await?;
                    info!("Backfilled implementation name '{}' for job {}", bean, key);
                    bean
                }
            };

            let resolvable = components.contains(&component)
                && self.registry.resolve(&component, &bean).is_ok();
            if resolvable {
                continue;
            }

            orphaned += 1;
            warn!(
                "Job {} refers to {}/{} which is no longer available, unscheduling it",
                key, component, bean
            );
            match self.unschedule(&key, true).await {
                Ok(_) | Err(LifecycleError::TriggerNotFound { .. }) => {}
                Err(e) => error!("Failed to unschedule orphaned job {}: {}", key, e),
            }
        }

        Ok(orphaned)
    }

    /// Create a job from a registered implementation. The name is stored as
    /// `<component>_<name>` unless it already starts with the component.
    pub async fn create(&self, tenant: &str, request: CreateJob) -> LifecycleResult<JobStatus> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(LifecycleError::NameMissing);
        }

        let cron = request
            .cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if let Some(cron) = &cron {
            Self::validate_cron(cron)?;
        }

        let job = self.registry.resolve(&request.component, &request.bean)?;
        let key = JobKey::resolve(tenant, &request.component, name);
        if self.engine.job_exists(&key).await? {
            warn!("Rejected creation of {}: name already exists", key);
            return Err(LifecycleError::NameExists {
                name: name.to_string(),
            });
        }

        let mut data = JobData::reconcile(None, &job.job_data(), &request.component, &request.bean);
        data.enabled = cron.is_some();
        data.cron_expression = cron.clone();

        let description = request.description.unwrap_or_else(|| job.description());
        let descriptor = JobDescriptor::new(key.clone(), description, data);
        self.engine.upsert_job(&descriptor).await?;
        info!("Created job {}", key);

        let trigger = match &cron {
            Some(cron) => {
                let trigger = self.engine.create_trigger(NewTrigger::cron(&key, cron)).await?;
                info!("Created trigger '{}' for job {} with expression '{}'", trigger.name, key, cron);
                Some(trigger)
            }
            None => None,
        };

        Ok(JobStatus {
            job: descriptor,
            trigger,
            running: false,
        })
    }

    /// Change the cron expression (and optionally the description) of a job
    pub async fn update(
        &self,
        key: &JobKey,
        cron_expression: &str,
        description: Option<String>,
    ) -> LifecycleResult<JobStatus> {
        let cron = cron_expression.trim();
        Self::validate_cron(cron)?;

        let mut descriptor = self.require_job(key).await?;
        descriptor.data.cron_expression = Some(cron.to_string());
        if let Some(description) = description {
            descriptor.description = description;
        }
        descriptor.updated_at = Utc::now();
        self.engine.upsert_job(&descriptor).await?;

        let trigger = match self.cron_trigger(key).await? {
            Some(existing) => {
                let trigger = self
                    .engine
                    .replace_trigger(&existing.name, NewTrigger::cron(key, cron))
                    .await?;
                info!("Rescheduled job {} with expression '{}'", key, cron);
                Some(trigger)
            }
            None => {
                info!("Updated unscheduled job {} with expression '{}'", key, cron);
                None
            }
        };

        Ok(JobStatus {
            job: descriptor,
            trigger,
            running: self.is_running(key).await,
        })
    }

    /// Enable a job using its stored cron expression
    pub async fn schedule(&self, key: &JobKey) -> LifecycleResult<JobStatus> {
        let mut descriptor = self.require_job(key).await?;
        if self.cron_trigger(key).await?.is_some() {
            warn!("Job {} is already active", key);
            return Err(LifecycleError::AlreadyActive { job: key.to_string() });
        }

        let cron = descriptor.data.cron().unwrap_or_default().to_string();
        Self::validate_cron(&cron)?;

        descriptor.data.enabled = true;
        descriptor.data.forcefully_disabled = false;
        descriptor.updated_at = Utc::now();
        self.engine.upsert_job(&descriptor).await?;

        let trigger = self.engine.create_trigger(NewTrigger::cron(key, &cron)).await?;
        info!("Created trigger '{}' for job {} with expression '{}'", trigger.name, key, cron);

        Ok(JobStatus {
            job: descriptor,
            trigger: Some(trigger),
            running: self.is_running(key).await,
        })
    }

    /// Disable a job. Its cron expression is kept on the descriptor so that a
    /// later [`JobLifecycleManager::schedule`] restores the same trigger.
    pub async fn unschedule(&self, key: &JobKey, forcefully: bool) -> LifecycleResult<JobStatus> {
        let mut descriptor = self.require_job(key).await?;
        let Some(trigger) = self.cron_trigger(key).await? else {
            return Err(LifecycleError::TriggerNotFound { job: key.to_string() });
        };

        if let Some(cron) = &trigger.cron_expression {
            descriptor.data.cron_expression = Some(cron.clone());
        }
        descriptor.data.enabled = false;
        if forcefully {
            descriptor.data.forcefully_disabled = true;
            info!("Job {} was disabled forcefully", key);
        }
        descriptor.updated_at = Utc::now();
        self.engine.upsert_job(&descriptor).await?;

        if self.engine.remove_trigger(&trigger.name).await? {
            info!(
                "Deleted trigger '{}' for job {} with expression '{}'",
                trigger.name,
                key,
                trigger.cron_expression.as_deref().unwrap_or_default()
            );
        }

        Ok(JobStatus {
            job: descriptor,
            trigger: None,
            running: self.is_running(key).await,
        })
    }

    /// Fire a job once, immediately, independent of its cron trigger
    pub async fn run_once(&self, key: &JobKey) -> LifecycleResult<Trigger> {
        self.require_job(key).await?;
        if self.is_running(key).await {
            warn!("Job {} is already running", key);
            return Err(LifecycleError::AlreadyRunning { job: key.to_string() });
        }

        let trigger = self.engine.create_trigger(NewTrigger::fire_now(key)).await?;
        info!("Created trigger '{}' for immediate run of job {}", trigger.name, key);
        Ok(trigger)
    }

    pub async fn delete(&self, key: &JobKey) -> LifecycleResult<()> {
        self.require_job(key).await?;
        if self.is_running(key).await {
            warn!("Job {} cannot be deleted while running", key);
            return Err(LifecycleError::DeleteWhileRunning { job: key.to_string() });
        }

        self.engine.delete_job(key).await?;
        info!("Deleted job {}", key);
        Ok(())
    }

    /// Signal interruptible firings of a job to stop
    pub async fn interrupt(&self, key: &JobKey) -> LifecycleResult<usize> {
        self.require_job(key).await?;
        Ok(self.engine.interrupt(key).await)
    }

    /// A job is running while the engine lists one of its firings as executing
    pub async fn is_running(&self, key: &JobKey) -> bool {
        self.engine
            .currently_executing()
            .await
            .iter()
            .any(|executing| &executing.key == key)
    }

    pub async fn status(&self, key: &JobKey) -> LifecycleResult<JobStatus> {
        let descriptor = self.require_job(key).await?;
        Ok(JobStatus {
            trigger: self.cron_trigger(key).await?,
            running: self.is_running(key).await,
            job: descriptor,
        })
    }

    pub async fn list(&self, tenant: &str) -> LifecycleResult<Vec<JobStatus>> {
        let mut jobs = Vec::new();
        for key in self.engine.job_keys(tenant).await? {
            match self.status(&key).await {
                Ok(status) => jobs.push(status),
                Err(LifecycleError::JobNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(jobs)
    }

    async fn require_job(&self, key: &JobKey) -> LifecycleResult<JobDescriptor> {
        self.engine
            .get_job(key)
            .await?
            .ok_or_else(|| LifecycleError::JobNotFound { job: key.to_string() })
    }

    async fn cron_trigger(&self, key: &JobKey) -> LifecycleResult<Option<Trigger>> {
        Ok(self
            .engine
            .triggers_of(key)
            .await?
            .into_iter()
            .find(|trigger| trigger.kind == TriggerKind::Cron))
    }

    fn validate_cron(expression: &str) -> LifecycleResult<()> {
        parse_cron(expression)
            .map(|_| ())
            .map_err(|_| LifecycleError::InvalidCronExpression {
                expression: expression.to_string(),
            })
    }
}
