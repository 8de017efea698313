use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::health::HealthThresholds;

/// Separator between component and implementation name in a job name
pub const JOB_NAME_SEPARATOR: &str = "_";

/// Identity of a job: unique name within a tenant scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub tenant: String,
    pub name: String,
}

impl JobKey {
    pub fn new(tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            name: name.into(),
        }
    }

    /// Key of a registered implementation: `<component>_<bean>` in the tenant scope
    pub fn for_implementation(tenant: &str, component: &str, bean: &str) -> Self {
        Self::new(tenant, format!("{}{}{}", component, JOB_NAME_SEPARATOR, bean))
    }

    /// Resolve a job reference given as either the full name or the bare
    /// implementation name of a component.
    pub fn resolve(tenant: &str, component: &str, job: &str) -> Self {
        if job.starts_with(component) {
            Self::new(tenant, job)
        } else {
            Self::for_implementation(tenant, component, job)
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tenant, self.name)
    }
}

/// Time unit of a health threshold window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    /// Start of the window ending at `now` that spans exactly one unit
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeUnit::Minute => now - Duration::minutes(1),
            TimeUnit::Hour => now - Duration::hours(1),
            TimeUnit::Day => now - Duration::days(1),
            TimeUnit::Week => now - Duration::weeks(1),
            TimeUnit::Month => now
                .checked_sub_months(Months::new(1))
                .unwrap_or_else(|| now - Duration::days(30)),
            TimeUnit::Year => now
                .checked_sub_months(Months::new(12))
                .unwrap_or_else(|| now - Duration::days(365)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Minute => "MINUTE",
            TimeUnit::Hour => "HOUR",
            TimeUnit::Day => "DAY",
            TimeUnit::Week => "WEEK",
            TimeUnit::Month => "MONTH",
            TimeUnit::Year => "YEAR",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MINUTE" => Ok(TimeUnit::Minute),
            "HOUR" => Ok(TimeUnit::Hour),
            "DAY" => Ok(TimeUnit::Day),
            "WEEK" => Ok(TimeUnit::Week),
            "MONTH" => Ok(TimeUnit::Month),
            "YEAR" => Ok(TimeUnit::Year),
            other => Err(format!("unknown time unit '{}'", other)),
        }
    }
}

impl TryFrom<String> for TimeUnit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job data bag with the recognized keys typed and everything else kept in
/// `extra` for implementation-specific use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    pub enabled: bool,
    pub run_once: bool,
    pub hard_interruptible: bool,
    pub allow_concurrent_executions: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_bean_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_warn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_error: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_timeunit: Option<TimeUnit>,
    pub thresholds_disabled: bool,
    pub force_state: bool,
    pub forcefully_disabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl JobData {
    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_thresholds(mut self, warn: Option<u32>, error: Option<u32>, unit: TimeUnit) -> Self {
        self.threshold_warn = warn;
        self.threshold_error = error;
        self.threshold_timeunit = Some(unit);
        self
    }

    /// Cron expression if one is set and not blank
    pub fn cron(&self) -> Option<&str> {
        self.cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            warn: self.threshold_warn,
            error: self.threshold_error,
            time_unit: self.threshold_timeunit,
            disabled: self.thresholds_disabled,
        }
    }

    /// Merge implementation defaults with the stored descriptor data.
    ///
    /// Defaults win for every key they define. The stored cron expression and
    /// enabled flag are carried over unless a forced state is requested, in
    /// which case the defaults apply and the force flag is dropped. A job that
    /// was forcefully disabled comes back enabled.
    pub fn reconcile(stored: Option<&JobData>, defaults: &JobData, origin: &str, bean: &str) -> JobData {
        let mut merged = defaults.clone();
        merged.origin = Some(origin.to_string());
        merged.job_bean_name = Some(bean.to_string());
        merged.forcefully_disabled = false;
        merged.force_state = false;

        let Some(stored) = stored else {
            return merged;
        };

        let mut extra = stored.extra.clone();
        extra.extend(defaults.extra.clone());
        merged.extra = extra;

        merged.locale = defaults.locale.clone().or_else(|| stored.locale.clone());
        merged.threshold_warn = defaults.threshold_warn.or(stored.threshold_warn);
        merged.threshold_error = defaults.threshold_error.or(stored.threshold_error);
        merged.threshold_timeunit = defaults.threshold_timeunit.or(stored.threshold_timeunit);
        merged.thresholds_disabled = defaults.thresholds_disabled || stored.thresholds_disabled;

        let enabled = stored.enabled || stored.forcefully_disabled;
        let forced = defaults.force_state || stored.force_state;
        if let Some(cron) = stored.cron() {
            if !forced {
                merged.cron_expression = Some(cron.to_string());
                merged.enabled = enabled;
            }
        }

        merged
    }
}

/// Persisted metadata of one schedulable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub key: JobKey,
    pub description: String,
    pub data: JobData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(key: JobKey, description: impl Into<String>, data: JobData) -> Self {
        let now = Utc::now();
        Self {
            key,
            description: description.into(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// The engine must not start a second firing while one is active
    pub fn concurrent_execution_disallowed(&self) -> bool {
        !self.data.allow_concurrent_executions
    }

    /// Component the job belongs to, falling back to the name prefix
    pub fn component(&self) -> &str {
        match self.data.origin.as_deref() {
            Some(origin) => origin,
            None => self
                .key
                .name
                .split_once(JOB_NAME_SEPARATOR)
                .map(|(component, _)| component)
                .unwrap_or(&self.key.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerKind {
    Cron,
    /// Fires once, immediately
    Simple,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Cron => "CRON",
            TriggerKind::Simple => "SIMPLE",
        }
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRON" => Ok(TriggerKind::Cron),
            "SIMPLE" => Ok(TriggerKind::Simple),
            other => Err(format!("unknown trigger kind '{}'", other)),
        }
    }
}

/// Engine-reported trigger state. A job without a trigger has no state;
/// callers see that as `Option<Trigger>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerState {
    Scheduled,
    Complete,
}

impl TriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Scheduled => "SCHEDULED",
            TriggerState::Complete => "COMPLETE",
        }
    }
}

impl FromStr for TriggerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(TriggerState::Scheduled),
            "COMPLETE" => Ok(TriggerState::Complete),
            other => Err(format!("unknown trigger state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub name: String,
    pub job: JobKey,
    pub kind: TriggerKind,
    pub cron_expression: Option<String>,
    pub state: TriggerState,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub previous_fire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Trigger request handed to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrigger {
    pub name: String,
    pub job: JobKey,
    pub kind: TriggerKind,
    pub cron_expression: Option<String>,
}

impl NewTrigger {
    pub fn cron(job: &JobKey, expression: &str) -> Self {
        Self {
            name: Self::generate_name(job, "crontrigger"),
            job: job.clone(),
            kind: TriggerKind::Cron,
            cron_expression: Some(expression.trim().to_string()),
        }
    }

    pub fn fire_now(job: &JobKey) -> Self {
        Self {
            name: Self::generate_name(job, "simpletrigger"),
            job: job.clone(),
            kind: TriggerKind::Simple,
            cron_expression: None,
        }
    }

    fn generate_name(job: &JobKey, kind: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", job.name, kind, &suffix[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn defaults() -> JobData {
        JobData::default().with_cron("0 0 3 * * *").enabled(true)
    }

    #[test]
    fn test_job_key_resolution() {
        let key = JobKey::resolve("site", "search", "indexJob");
        assert_eq!(key.name, "search_indexJob");

        let key = JobKey::resolve("site", "search", "search_indexJob");
        assert_eq!(key.name, "search_indexJob");
        assert_eq!(key.to_string(), "site.search_indexJob");
    }

    #[test]
    fn test_reconcile_new_job_uses_defaults() {
        let merged = JobData::reconcile(None, &defaults(), "search", "indexJob");
        assert_eq!(merged.cron(), Some("0 0 3 * * *"));
        assert!(merged.enabled);
        assert_eq!(merged.origin.as_deref(), Some("search"));
        assert_eq!(merged.job_bean_name.as_deref(), Some("indexJob"));
    }

    #[test]
    fn test_reconcile_stored_schedule_wins() {
        let stored = JobData::default().with_cron("0 */5 * * * *").enabled(false);
        let merged = JobData::reconcile(Some(&stored), &defaults(), "search", "indexJob");
        assert_eq!(merged.cron(), Some("0 */5 * * * *"));
        assert!(!merged.enabled);
    }

    #[test]
    fn test_reconcile_force_state_applies_defaults_once() {
        let mut stored = JobData::default().with_cron("0 */5 * * * *").enabled(false);
        stored.force_state = true;
        let merged = JobData::reconcile(Some(&stored), &defaults(), "search", "indexJob");
        assert_eq!(merged.cron(), Some("0 0 3 * * *"));
        assert!(merged.enabled);
        assert!(!merged.force_state);

        let again = JobData::reconcile(Some(&merged), &defaults(), "search", "indexJob");
        assert_eq!(again.cron(), Some("0 0 3 * * *"));
    }

    #[test]
    fn test_reconcile_reenables_forcefully_disabled() {
        let mut stored = JobData::default().with_cron("0 */5 * * * *").enabled(false);
        stored.forcefully_disabled = true;
        let merged = JobData::reconcile(Some(&stored), &defaults(), "search", "indexJob");
        assert!(merged.enabled);
        assert!(!merged.forcefully_disabled);
        assert_eq!(merged.cron(), Some("0 */5 * * * *"));
    }

    #[test]
    fn test_reconcile_keeps_stored_extension_data() {
        let mut stored = JobData::default();
        stored.extra.insert("batchSize".into(), Value::from(50));
        stored.extra.insert("mode".into(), Value::from("full"));
        let mut defaults = defaults();
        defaults.extra.insert("mode".into(), Value::from("incremental"));
        stored.threshold_warn = Some(3);

        let merged = JobData::reconcile(Some(&stored), &defaults, "search", "indexJob");
        assert_eq!(merged.extra["batchSize"], Value::from(50));
        assert_eq!(merged.extra["mode"], Value::from("incremental"));
        assert_eq!(merged.threshold_warn, Some(3));
    }

    #[test]
    fn test_job_data_wire_keys() {
        let data = JobData::default()
            .with_cron("0 0 * * * *")
            .with_thresholds(Some(5), Some(2), TimeUnit::Day);
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["cronExpression"], "0 0 * * * *");
        assert_eq!(json["thresholdWarn"], 5);
        assert_eq!(json["thresholdTimeunit"], "DAY");
        assert_eq!(json["allowConcurrentExecutions"], false);

        let parsed: JobData =
            serde_json::from_value(serde_json::json!({"thresholdTimeunit": "hour", "custom": true}))
                .unwrap();
        assert_eq!(parsed.threshold_timeunit, Some(TimeUnit::Hour));
        assert_eq!(parsed.extra["custom"], Value::Bool(true));
    }

    #[test]
    fn test_window_start() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        assert_eq!(
            TimeUnit::Day.window_start(now),
            Utc.with_ymd_and_hms(2024, 3, 30, 12, 0, 0).unwrap()
        );
        assert_eq!(
            TimeUnit::Month.window_start(now),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
        assert_eq!(
            TimeUnit::Year.window_start(now),
            Utc.with_ymd_and_hms(2023, 3, 31, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_trigger_names_are_unique() {
        let key = JobKey::new("site", "search_indexJob");
        let a = NewTrigger::cron(&key, "0 0 * * * *");
        let b = NewTrigger::cron(&key, "0 0 * * * *");
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with("search_indexJob-crontrigger-"));
        assert_eq!(NewTrigger::fire_now(&key).kind, TriggerKind::Simple);
    }
}
