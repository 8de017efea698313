//! Threshold based health state of a job
//!
//! A job is judged by the number of successful runs within the last time unit
//! (`thresholdTimeunit`). Fewer successes than `thresholdError` is an error,
//! fewer than `thresholdWarn` a warning. Jobs younger than one time unit are
//! reported `OK` until enough history exists.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::database::execution_records::ResultCounts;
use crate::database::Database;
use crate::engine::SchedulingEngine;
use crate::errors::AppResult;
use crate::models::{
    HealthState, HealthThresholds, JobDescriptor, JobKey, JobList, JobListEntry, JobState,
    PageRequest, RecordQuery, RecordSummary, TimeUnit,
};

/// Verdict and explanation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: HealthState,
    pub message: String,
}

impl Classification {
    fn new(state: HealthState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// Pure classification of a job's success count against its thresholds.
///
/// `first_run` is the start of the job's history (its earliest record, or the
/// descriptor creation time when it never ran).
pub fn classify(
    thresholds: &HealthThresholds,
    counts: ResultCounts,
    first_run: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Classification {
    if thresholds.disabled {
        return Classification::new(HealthState::Ok, "thresholds disabled");
    }

    let Some(unit) = thresholds.time_unit else {
        return Classification::new(HealthState::Undefined, "not configured");
    };
    if !thresholds.any_set() {
        return Classification::new(HealthState::Undefined, "not configured");
    }

    let window_start = unit.window_start(now);
    if first_run > window_start {
        return Classification::new(
            HealthState::Ok,
            format!(
                "insufficient history: job started at {} which is within the last {}, {} succeeded and {} failed so far",
                first_run.format("%Y-%m-%d %H:%M:%S"),
                unit_name(unit),
                counts.success,
                counts.failed
            ),
        );
    }

    let observed = format!(
        "{} succeeded and {} failed within the last {}",
        counts.success,
        counts.failed,
        unit_name(unit)
    );

    if let Some(error) = thresholds.error {
        if counts.success < i64::from(error) {
            return Classification::new(
                HealthState::Error,
                format!("{}: success count {} < error threshold {}", observed, counts.success, error),
            );
        }
    }
    if let Some(warn) = thresholds.warn {
        if counts.success < i64::from(warn) {
            return Classification::new(
                HealthState::Warn,
                format!("{}: success count {} < warn threshold {}", observed, counts.success, warn),
            );
        }
    }

    let (operator, threshold) = match (thresholds.warn, thresholds.error) {
        (Some(warn), _) => ("warn", warn),
        (None, Some(error)) => ("error", error),
        (None, None) => ("warn", 0),
    };
    Classification::new(
        HealthState::Ok,
        format!(
            "{}: success count {} >= {} threshold {}",
            observed, counts.success, operator, threshold
        ),
    )
}

fn unit_name(unit: TimeUnit) -> String {
    unit.as_str().to_lowercase()
}

pub struct HealthStateEvaluator {
    engine: Arc<dyn SchedulingEngine>,
    database: Database,
}

impl HealthStateEvaluator {
    pub fn new(engine: Arc<dyn SchedulingEngine>, database: Database) -> Self {
        Self { engine, database }
    }

    /// Health state of a job, `None` if the job is unknown
    pub async fn evaluate(
        &self,
        tenant: &str,
        component: &str,
        job: &str,
        page_size: u32,
        with_records: bool,
    ) -> AppResult<Option<JobState>> {
        self.evaluate_at(tenant, component, job, page_size, with_records, Utc::now())
            .await
    }

    pub async fn evaluate_at(
        &self,
        tenant: &str,
        component: &str,
        job: &str,
        page_size: u32,
        with_records: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Option<JobState>> {
        let key = JobKey::resolve(tenant, component, job);
        let Some(descriptor) = self.engine.get_job(&key).await? else {
            debug!("Health state requested for unknown job {}", key);
            return Ok(None);
        };

        let thresholds = descriptor.data.thresholds();
        let window_start = thresholds.time_unit.map(|unit| unit.window_start(now));
        let query = RecordQuery::for_site(tenant)
            .component(component)
            .job(key.name.clone())
            .between(window_start, Some(now));

        let counts = self.database.count_execution_results(&query).await?;
        let first_run = self.first_run(&descriptor, component).await?;
        let classification = classify(&thresholds, counts, first_run, now);

        let records = if with_records {
            let page = self
                .database
                .query_execution_records(&query, PageRequest::new(0, page_size))
                .await?;
            Some(page.records.iter().map(RecordSummary::from).collect())
        } else {
            None
        };

        debug!(
            "Health state of {} is {} ({})",
            key,
            classification.state.name(),
            classification.message
        );

        Ok(Some(JobState {
            site: tenant.to_string(),
            application: component.to_string(),
            job: key.name.clone(),
            threshold_warn: thresholds.warn,
            threshold_error: thresholds.error,
            timeunit: thresholds.time_unit,
            job_data: descriptor.data,
            total_records: counts.total(),
            total_success: counts.success,
            total_failed: counts.failed,
            started_after: window_start,
            state: classification.state,
            state_name: classification.state.name(),
            message: classification.message,
            records,
        }))
    }

    async fn first_run(&self, descriptor: &JobDescriptor, component: &str) -> AppResult<DateTime<Utc>> {
        let first = self
            .database
            .first_execution_record(&descriptor.key.tenant, component, &descriptor.key.name)
            .await?;
        Ok(first.map_or(descriptor.created_at, |record| record.start_time))
    }

    /// Jobs of a tenant with links to their health state
    pub async fn list_jobs(
        &self,
        tenant: &str,
        with_data: bool,
        thresholds_only: bool,
        base_url: &str,
    ) -> AppResult<JobList> {
        let base_url = base_url.trim_end_matches('/');
        let mut jobs = Vec::new();

        for key in self.engine.job_keys(tenant).await? {
            let Some(descriptor) = self.engine.get_job(&key).await? else {
                continue;
            };
            let thresholds_present = descriptor.data.thresholds().any_set();
            if thresholds_only && !thresholds_present {
                continue;
            }

            let application = descriptor.component().to_string();
            jobs.push(JobListEntry {
                self_link: format!(
                    "{}/sites/{}/jobState/{}/{}",
                    base_url, tenant, application, key.name
                ),
                site: key.tenant.clone(),
                application,
                job: key.name.clone(),
                job_data: with_data.then(|| descriptor.data.clone()),
                thresholds_present,
            });
        }

        Ok(JobList { jobs })
    }
}
