use async_trait::async_trait;
use tracing::{debug, error};

use crate::database::Database;
use crate::engine::{CompletedExecution, ExecutionListener};
use crate::models::NewExecutionRecord;

/// Writes one execution record per completed firing
pub struct RecordingListener {
    database: Database,
    enabled: bool,
    node: String,
}

impl RecordingListener {
    pub fn new(database: Database, enabled: bool, node: impl Into<String>) -> Self {
        Self {
            database,
            enabled,
            node: node.into(),
        }
    }

    pub fn to_record(&self, execution: &CompletedExecution) -> NewExecutionRecord {
        NewExecutionRecord {
            site: execution.key.tenant.clone(),
            application: execution.component.clone(),
            job_name: execution.key.name.clone(),
            trigger_name: execution.trigger_name.clone(),
            start_time: execution.started_at,
            end_time: execution.finished_at,
            run_once: execution.run_once,
            result: execution.result(),
            stacktrace: execution.error.clone(),
            custom_data: execution.outcome.custom_data.clone(),
            node: Some(self.node.clone()),
        }
    }
}

#[async_trait]
impl ExecutionListener for RecordingListener {
    async fn job_was_executed(&self, execution: &CompletedExecution) {
        if !self.enabled {
            return;
        }

        let record = self.to_record(execution);
        match self.database.insert_execution_record(&record).await {
            Ok(id) => debug!(job = %execution.key, "Stored execution record {}", id),
            Err(e) => error!(job = %execution.key, "Failed to store execution record: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionResult, JobKey, JobOutcome, PageRequest, RecordQuery};
    use chrono::{Duration, Utc};

    fn execution(error: Option<&str>) -> CompletedExecution {
        let finished = Utc::now();
        CompletedExecution {
            key: JobKey::new("site", "search_indexJob"),
            component: "search".to_string(),
            trigger_name: "search_indexJob-crontrigger-abc".to_string(),
            started_at: finished - Duration::seconds(3),
            finished_at: finished,
            run_once: true,
            outcome: JobOutcome::default(),
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_records_failure_with_stacktrace() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let listener = RecordingListener::new(db.clone(), true, "node-a");

        listener.job_was_executed(&execution(Some("index unavailable"))).await;

        let page = db
            .query_execution_records(&RecordQuery::for_site("site"), PageRequest::new(0, 10))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        let record = &page.records[0];
        assert_eq!(record.result, ExecutionResult::Fail);
        assert_eq!(record.application, "search");
        assert_eq!(record.duration, 3);
        assert!(record.run_once);
        assert_eq!(record.stacktrace.as_deref(), Some("index unavailable"));
        assert_eq!(record.node.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_disabled_listener_writes_nothing() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let listener = RecordingListener::new(db.clone(), false, "node-a");

        listener.job_was_executed(&execution(None)).await;

        let page = db
            .query_execution_records(&RecordQuery::for_site("site"), PageRequest::new(0, 10))
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }
}
