use chrono::{DateTime, Duration, TimeZone, Utc};

use jobkeeper::{
    database::Database,
    models::{ExecutionResult, NewExecutionRecord, PageRequest, RecordQuery},
};

async fn database() -> Database {
    let db = Database::in_memory().await.unwrap();
    tokio_test::assert_ok!(db.migrate().await);
    db
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

fn record(site: &str, component: &str, job: &str, start: DateTime<Utc>, secs: i64) -> NewExecutionRecord {
    NewExecutionRecord {
        site: site.to_string(),
        application: component.to_string(),
        job_name: job.to_string(),
        trigger_name: format!("{}-crontrigger-0001", job),
        start_time: start,
        end_time: start + Duration::seconds(secs),
        run_once: false,
        result: ExecutionResult::Success,
        stacktrace: None,
        custom_data: None,
        node: Some("node-1".to_string()),
    }
}

#[tokio::test]
async fn test_record_round_trip() {
    let db = database().await;
    let start = Utc.timestamp_millis_opt(1_714_557_600_123).unwrap();
    let new = NewExecutionRecord {
        run_once: true,
        result: ExecutionResult::Fail,
        stacktrace: Some("Error: index unavailable\n\nCaused by:\n    timeout".to_string()),
        custom_data: Some("{\"documents\":12}".to_string()),
        ..record("site", "search", "search_indexJob", start, 42)
    };

    let id = db.insert_execution_record(&new).await.unwrap();
    let stored = db.get_execution_record(id).await.unwrap().unwrap();

    assert_eq!(stored.id, id);
    assert_eq!(stored.site, new.site);
    assert_eq!(stored.application, new.application);
    assert_eq!(stored.job_name, new.job_name);
    assert_eq!(stored.trigger_name, new.trigger_name);
    assert_eq!(stored.start_time, new.start_time);
    assert_eq!(stored.end_time, new.end_time);
    assert_eq!(stored.duration, 42);
    assert!(stored.run_once);
    assert_eq!(stored.result, ExecutionResult::Fail);
    assert_eq!(stored.stacktrace, new.stacktrace);
    assert_eq!(stored.custom_data, new.custom_data);
    assert_eq!(stored.node, new.node);

    assert!(db.get_execution_record(id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_current_timestamps_read_back_unchanged() {
    let db = database().await;
    let start = Utc::now();
    let new = NewExecutionRecord {
        end_time: Utc::now(),
        ..record("site", "search", "search_indexJob", start, 0)
    };

    let id = db.insert_execution_record(&new).await.unwrap();
    let stored = db.get_execution_record(id).await.unwrap().unwrap();
    assert_eq!(stored.start_time, new.start_time);
    assert_eq!(stored.end_time, new.end_time);

    let page = db
        .query_execution_records(
            &RecordQuery::for_site("site").between(Some(start), Some(start)),
            PageRequest::new(0, 10),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_negative_duration_is_clamped() {
    let db = database().await;
    let id = db
        .insert_execution_record(&record("site", "search", "search_indexJob", at(1, 10), -5))
        .await
        .unwrap();
    assert_eq!(db.get_execution_record(id).await.unwrap().unwrap().duration, 0);
}

#[tokio::test]
async fn test_retention_only_touches_one_site() {
    let db = database().await;
    let now = at(31, 12);

    for site in ["site-a", "site-b"] {
        db.insert_execution_record(&record(site, "search", "search_indexJob", now - Duration::days(31), 1))
            .await
            .unwrap();
        db.insert_execution_record(&record(site, "search", "search_indexJob", now - Duration::days(30), 1))
            .await
            .unwrap();
        db.insert_execution_record(&record(site, "search", "search_indexJob", now - Duration::days(2), 1))
            .await
            .unwrap();
    }

    let deleted = db
        .cleanup_execution_records("site-a", Some(30), now)
        .await
        .unwrap();
    assert_eq!(deleted, Some(1));

    let remaining_a = db
        .query_execution_records(&RecordQuery::for_site("site-a"), PageRequest::new(0, 10))
        .await
        .unwrap();
    let remaining_b = db
        .query_execution_records(&RecordQuery::for_site("site-b"), PageRequest::new(0, 10))
        .await
        .unwrap();
    assert_eq!(remaining_a.total, 2);
    assert_eq!(remaining_b.total, 3);

    assert_eq!(db.cleanup_execution_records("site-a", None, now).await.unwrap(), None);
}

#[tokio::test]
async fn test_filters_and_paging() {
    let db = database().await;

    db.insert_execution_record(&record("site", "search", "search_indexJob", at(1, 8), 10))
        .await
        .unwrap();
    db.insert_execution_record(&NewExecutionRecord {
        result: ExecutionResult::Fail,
        ..record("site", "search", "search_indexJob", at(1, 9), 120)
    })
    .await
    .unwrap();
    db.insert_execution_record(&record("site", "search", "search_cleanupJob", at(1, 10), 5))
        .await
        .unwrap();
    db.insert_execution_record(&record("site", "shop", "shop_exportJob", at(1, 11), 300))
        .await
        .unwrap();
    db.insert_execution_record(&record("other", "search", "search_indexJob", at(1, 12), 1))
        .await
        .unwrap();

    let all = db
        .query_execution_records(&RecordQuery::for_site("site"), PageRequest::new(0, 10))
        .await
        .unwrap();
    assert_eq!(all.total, 4);
    let starts: Vec<_> = all.records.iter().map(|r| r.start_time).collect();
    assert_eq!(starts, vec![at(1, 11), at(1, 10), at(1, 9), at(1, 8)]);

    let search = RecordQuery::for_site("site").component("search");
    let page = db
        .query_execution_records(&search, PageRequest::new(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].start_time, at(1, 8));

    let failed = RecordQuery::for_site("site").result(ExecutionResult::Fail);
    let page = db
        .query_execution_records(&failed, PageRequest::new(0, 10))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].duration, 120);

    let slow = RecordQuery {
        min_duration: Some(100),
        ..RecordQuery::for_site("site")
    };
    let page = db
        .query_execution_records(&slow, PageRequest::new(0, 10))
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let window = RecordQuery::for_site("site")
        .job("search_indexJob")
        .between(Some(at(1, 9)), Some(at(1, 11)));
    let counts = db.count_execution_results(&window).await.unwrap();
    assert_eq!(counts.success, 0);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.total(), 1);
}

#[tokio::test]
async fn test_distinct_values_and_first_run() {
    let db = database().await;
    db.insert_execution_record(&record("site", "search", "search_indexJob", at(3, 8), 1))
        .await
        .unwrap();
    db.insert_execution_record(&record("site", "search", "search_indexJob", at(2, 8), 1))
        .await
        .unwrap();
    db.insert_execution_record(&record("site", "shop", "shop_exportJob", at(4, 8), 1))
        .await
        .unwrap();
    db.insert_execution_record(&record("other", "mail", "mail_sendJob", at(4, 8), 1))
        .await
        .unwrap();

    let values = db.distinct_record_values("site").await.unwrap();
    assert_eq!(values.components, vec!["search", "shop"]);
    assert_eq!(values.jobs, vec!["search_indexJob", "shop_exportJob"]);

    let first = db
        .first_execution_record("site", "search", "search_indexJob")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.start_time, at(2, 8));
    assert!(db
        .first_execution_record("site", "search", "search_unknownJob")
        .await
        .unwrap()
        .is_none());
}
