use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use jobkeeper::{
    database::Database,
    engine::{CronEngine, EngineSettings, SchedulingEngine},
    jobs::JobRegistry,
    models::{
        ExecutionResult, HealthState, JobData, JobDescriptor, JobKey, NewExecutionRecord, TimeUnit,
    },
    services::{ExecutionRunner, HealthStateEvaluator},
};

struct Harness {
    database: Database,
    engine: Arc<dyn SchedulingEngine>,
    evaluator: HealthStateEvaluator,
}

async fn harness() -> Harness {
    let database = Database::in_memory().await.unwrap();
    database.migrate().await.unwrap();

    let runner = Arc::new(ExecutionRunner::new(
        Arc::new(JobRegistry::new()),
        std::time::Duration::from_millis(20),
        "node-1",
    ));
    let engine: Arc<dyn SchedulingEngine> = Arc::new(CronEngine::new(
        database.clone(),
        EngineSettings::default(),
        runner,
    ));
    let evaluator = HealthStateEvaluator::new(engine.clone(), database.clone());

    Harness {
        database,
        engine,
        evaluator,
    }
}

async fn store_job(h: &Harness, name: &str, data: JobData, created_at: DateTime<Utc>) -> JobKey {
    let key = JobKey::for_implementation("site", "search", name);
    let mut data = data;
    data.origin = Some("search".to_string());
    let mut descriptor = JobDescriptor::new(key.clone(), "indexes things", data);
    descriptor.created_at = created_at;
    h.engine.upsert_job(&descriptor).await.unwrap();
    key
}

async fn record_run(h: &Harness, key: &JobKey, start: DateTime<Utc>, result: ExecutionResult) {
    h.database
        .insert_execution_record(&NewExecutionRecord {
            site: key.tenant.clone(),
            application: "search".to_string(),
            job_name: key.name.clone(),
            trigger_name: "t".to_string(),
            start_time: start,
            end_time: start + Duration::seconds(2),
            run_once: false,
            result,
            stacktrace: None,
            custom_data: None,
            node: None,
        })
        .await
        .unwrap();
}

fn daily_thresholds() -> JobData {
    JobData::default().with_thresholds(Some(5), Some(2), TimeUnit::Day)
}

async fn state_with_successes(successes: usize) -> HealthState {
    let h = harness().await;
    let now = Utc::now();
    let key = store_job(&h, "indexJob", daily_thresholds(), now - Duration::days(20)).await;

    record_run(&h, &key, now - Duration::days(10), ExecutionResult::Success).await;
    for i in 0..successes {
        record_run(&h, &key, now - Duration::hours(i as i64 + 1), ExecutionResult::Success).await;
    }
    record_run(&h, &key, now - Duration::minutes(30), ExecutionResult::Fail).await;

    h.evaluator
        .evaluate_at("site", "search", "indexJob", 10, false, now)
        .await
        .unwrap()
        .unwrap()
        .state
}

#[tokio::test]
async fn test_one_success_is_error() {
    assert_eq!(state_with_successes(1).await, HealthState::Error);
}

#[tokio::test]
async fn test_four_successes_is_warn() {
    assert_eq!(state_with_successes(4).await, HealthState::Warn);
}

#[tokio::test]
async fn test_six_successes_is_ok() {
    assert_eq!(state_with_successes(6).await, HealthState::Ok);
}

#[tokio::test]
async fn test_report_contents() {
    let h = harness().await;
    let now = Utc::now();
    let key = store_job(&h, "indexJob", daily_thresholds(), now - Duration::days(20)).await;

    record_run(&h, &key, now - Duration::days(10), ExecutionResult::Success).await;
    record_run(&h, &key, now - Duration::hours(3), ExecutionResult::Success).await;
    record_run(&h, &key, now - Duration::hours(2), ExecutionResult::Fail).await;
    record_run(&h, &key, now - Duration::hours(1), ExecutionResult::Fail).await;

    // full job name resolves the same as the implementation name
    let state = h
        .evaluator
        .evaluate_at("site", "search", &key.name, 2, true, now)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.site, "site");
    assert_eq!(state.application, "search");
    assert_eq!(state.job, "search_indexJob");
    assert_eq!(state.total_records, 3);
    assert_eq!(state.total_success, 1);
    assert_eq!(state.total_failed, 2);
    assert_eq!(state.started_after, Some(now - Duration::days(1)));
    assert_eq!(state.state, HealthState::Error);
    assert_eq!(state.state_name, "ERROR");
    assert!(state.message.contains("error threshold 2"));
    assert_eq!(state.threshold_warn, Some(5));
    assert_eq!(state.timeunit, Some(TimeUnit::Day));

    let records = state.records.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].state, "ERROR");
    assert!(records[0].start > records[1].start);

    let json = serde_json::to_value(
        h.evaluator
            .evaluate_at("site", "search", "indexJob", 10, false, now)
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(json["state"], 2);
    assert_eq!(json["stateName"], "ERROR");
    assert_eq!(json["jobData"]["thresholdTimeunit"], "DAY");
    assert!(json.get("records").is_none());
}

#[tokio::test]
async fn test_grace_period_for_new_job() {
    let h = harness().await;
    let now = Utc::now();
    let data = JobData::default().with_thresholds(None, Some(5), TimeUnit::Day);
    store_job(&h, "freshJob", data, now - Duration::minutes(10)).await;

    let state = h
        .evaluator
        .evaluate_at("site", "search", "freshJob", 10, false, now)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(state.state, HealthState::Error);
    assert_eq!(state.state, HealthState::Ok);
    assert_eq!(state.total_records, 0);
}

#[tokio::test]
async fn test_old_job_without_runs_is_error() {
    let h = harness().await;
    let now = Utc::now();
    let data = JobData::default().with_thresholds(None, Some(5), TimeUnit::Day);
    store_job(&h, "staleJob", data, now - Duration::days(3)).await;

    let state = h
        .evaluator
        .evaluate_at("site", "search", "staleJob", 10, false, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.state, HealthState::Error);
}

#[tokio::test]
async fn test_unconfigured_disabled_and_unknown() {
    let h = harness().await;
    let now = Utc::now();
    store_job(&h, "plainJob", JobData::default(), now - Duration::days(3)).await;
    let disabled = JobData {
        thresholds_disabled: true,
        ..daily_thresholds()
    };
    store_job(&h, "quietJob", disabled, now - Duration::days(3)).await;

    let state = h
        .evaluator
        .evaluate_at("site", "search", "plainJob", 10, false, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.state, HealthState::Undefined);
    assert_eq!(state.message, "not configured");
    assert_eq!(state.started_after, None);

    let state = h
        .evaluator
        .evaluate_at("site", "search", "quietJob", 10, false, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.state, HealthState::Ok);
    assert_eq!(state.message, "thresholds disabled");

    assert!(h
        .evaluator
        .evaluate_at("site", "search", "missingJob", 10, false, now)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_job_listing() {
    let h = harness().await;
    let now = Utc::now();
    store_job(&h, "indexJob", daily_thresholds(), now).await;
    store_job(&h, "plainJob", JobData::default(), now).await;

    let list = h
        .evaluator
        .list_jobs("site", false, false, "http://localhost:8080/")
        .await
        .unwrap();
    assert_eq!(list.jobs.len(), 2);
    let index = list.jobs.iter().find(|j| j.job == "search_indexJob").unwrap();
    assert_eq!(
        index.self_link,
        "http://localhost:8080/sites/site/jobState/search/search_indexJob"
    );
    assert!(index.thresholds_present);
    assert!(index.job_data.is_none());

    let list = h
        .evaluator
        .list_jobs("site", true, true, "http://localhost:8080")
        .await
        .unwrap();
    assert_eq!(list.jobs.len(), 1);
    assert!(list.jobs[0].job_data.is_some());

    let json = serde_json::to_value(&list).unwrap();
    assert!(json["jobs"][0]["self"].is_string());
    assert_eq!(json["jobs"][0]["thresholdsPresent"], true);
}
