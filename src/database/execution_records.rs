//! Execution record store: one row per completed firing

use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use super::{parse_timestamp, Database};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{
    ExecutionRecord, ExecutionResult, NewExecutionRecord, PageRequest, RecordFilterValues,
    RecordPage, RecordQuery,
};
use crate::utils::datetime::DateTimeParser;

const RECORD_COLUMNS: &str = "id, site, application, job_name, trigger_name, start_time, end_time, \
     duration, run_once, result, stacktraces, custom_data, node";

/// Success and failure counts within a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCounts {
    pub success: i64,
    pub failed: i64,
}

impl ResultCounts {
    pub fn total(&self) -> i64 {
        self.success + self.failed
    }
}

impl Database {
    pub async fn insert_execution_record(&self, record: &NewExecutionRecord) -> RepositoryResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_execution_record
                (site, application, job_name, trigger_name, start_time, end_time, duration,
                 run_once, result, stacktraces, custom_data, node)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.site)
        .bind(&record.application)
        .bind(&record.job_name)
        .bind(&record.trigger_name)
        .bind(DateTimeParser::format_for_storage(&record.start_time))
        .bind(DateTimeParser::format_for_storage(&record.end_time))
        .bind(record.duration_secs())
        .bind(record.run_once)
        .bind(record.result.as_str())
        .bind(&record.stacktrace)
        .bind(&record.custom_data)
        .bind(&record.node)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_execution_record(&self, id: i64) -> RepositoryResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM job_execution_record WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_record(&row)).transpose()
    }

    /// Filtered page of records, newest first
    pub async fn query_execution_records(
        &self,
        query: &RecordQuery,
        page: PageRequest,
    ) -> RepositoryResult<RecordPage> {
        let mut count_builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM job_execution_record WHERE site = ");
        count_builder.push_bind(query.site.clone());
        push_record_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM job_execution_record WHERE site = ",
            RECORD_COLUMNS
        ));
        builder.push_bind(query.site.clone());
        push_record_filters(&mut builder, query);
        builder.push(" ORDER BY start_time DESC, id DESC LIMIT ");
        builder.push_bind(i64::from(page.size));
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = builder.build().fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<RepositoryResult<Vec<_>>>()?;

        debug!(
            "Record query for site '{}' returned {} of {} records",
            query.site,
            records.len(),
            total
        );

        Ok(RecordPage {
            records,
            total,
            page: page.page,
            page_size: page.size,
        })
    }

    /// Success/failure counts for records matching `query`
    pub async fn count_execution_results(&self, query: &RecordQuery) -> RepositoryResult<ResultCounts> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT result, COUNT(*) AS total FROM job_execution_record WHERE site = ",
        );
        builder.push_bind(query.site.clone());
        push_record_filters(&mut builder, query);
        builder.push(" GROUP BY result");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut counts = ResultCounts::default();
        for row in rows {
            let result: String = row.get("result");
            let total: i64 = row.get("total");
            match result.parse::<ExecutionResult>() {
                Ok(ExecutionResult::Success) => counts.success += total,
                Ok(ExecutionResult::Fail) => counts.failed += total,
                Err(message) => {
                    return Err(RepositoryError::InvalidData {
                        field: "result".to_string(),
                        message,
                    })
                }
            }
        }

        Ok(counts)
    }

    /// Distinct component and job names recorded for a site
    pub async fn distinct_record_values(&self, site: &str) -> RepositoryResult<RecordFilterValues> {
        let components: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT application FROM job_execution_record WHERE site = ? ORDER BY application",
        )
        .bind(site)
        .fetch_all(&self.pool)
        .await?;

        let jobs: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT job_name FROM job_execution_record WHERE site = ? ORDER BY job_name",
        )
        .bind(site)
        .fetch_all(&self.pool)
        .await?;

        Ok(RecordFilterValues { components, jobs })
    }

    /// Delete records of `site` that started strictly before `now - lifetime_days`.
    ///
    /// Returns `None` without touching anything when no lifetime is configured.
    pub async fn cleanup_execution_records(
        &self,
        site: &str,
        lifetime_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<u64>> {
        let Some(days) = lifetime_days else {
            debug!("No record lifetime configured for site '{}', skipping cleanup", site);
            return Ok(None);
        };

        let cutoff = now - Duration::days(i64::from(days));
        let result = sqlx::query("DELETE FROM job_execution_record WHERE site = ? AND start_time < ?")
            .bind(site)
            .bind(DateTimeParser::format_for_storage(&cutoff))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        info!(
            "Deleted {} execution records older than {} days for site '{}'",
            deleted, days, site
        );
        Ok(Some(deleted))
    }

    /// Earliest record of a job
    pub async fn first_execution_record(
        &self,
        site: &str,
        application: &str,
        job_name: &str,
    ) -> RepositoryResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM job_execution_record
             WHERE site = ? AND application = ? AND job_name = ?
             ORDER BY start_time ASC, id ASC LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(site)
        .bind(application)
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_record(&row)).transpose()
    }

    fn row_to_record(row: &SqliteRow) -> RepositoryResult<ExecutionRecord> {
        let result: String = row.get("result");

        Ok(ExecutionRecord {
            id: row.get("id"),
            site: row.get("site"),
            application: row.get("application"),
            job_name: row.get("job_name"),
            trigger_name: row.get("trigger_name"),
            start_time: parse_timestamp("start_time", &row.get::<String, _>("start_time"))?,
            end_time: parse_timestamp("end_time", &row.get::<String, _>("end_time"))?,
            duration: row.get("duration"),
            run_once: row.get("run_once"),
            result: result.parse().map_err(|message| RepositoryError::InvalidData {
                field: "result".to_string(),
                message,
            })?,
            stacktrace: row.get("stacktraces"),
            custom_data: row.get("custom_data"),
            node: row.get("node"),
        })
    }
}

/// Optional filters shared by the page, count and aggregate queries.
/// Time bounds are inclusive.
fn push_record_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &RecordQuery) {
    if let Some(component) = &query.component {
        builder.push(" AND application = ");
        builder.push_bind(component.clone());
    }
    if let Some(job) = &query.job {
        builder.push(" AND job_name = ");
        builder.push_bind(job.clone());
    }
    if let Some(result) = query.result {
        builder.push(" AND result = ");
        builder.push_bind(result.as_str());
    }
    if let Some(after) = &query.started_after {
        builder.push(" AND start_time >= ");
        builder.push_bind(DateTimeParser::format_for_storage(after));
    }
    if let Some(before) = &query.started_before {
        builder.push(" AND start_time <= ");
        builder.push_bind(DateTimeParser::format_for_storage(before));
    }
    if let Some(min_duration) = query.min_duration {
        builder.push(" AND duration >= ");
        builder.push_bind(min_duration);
    }
}
