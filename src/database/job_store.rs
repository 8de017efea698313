//! Durable job descriptor and trigger storage backing the cron engine

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use super::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::{JobData, JobDescriptor, JobKey, NewTrigger, Trigger, TriggerKind, TriggerState};
use crate::utils::datetime::DateTimeParser;

const TRIGGER_COLUMNS: &str = "trigger_name, tenant, job_name, kind, cron_expression, state, \
     next_fire_at, previous_fire_at, created_at";

impl Database {
    pub async fn upsert_job(&self, descriptor: &JobDescriptor) -> EngineResult<()> {
        let job_data = serde_json::to_string(&descriptor.data)?;

        sqlx::query(
            r#"
            INSERT INTO scheduler_jobs (tenant, job_name, description, job_data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant, job_name) DO UPDATE SET
                description = excluded.description,
                job_data = excluded.job_data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&descriptor.key.tenant)
        .bind(&descriptor.key.name)
        .bind(&descriptor.description)
        .bind(job_data)
        .bind(DateTimeParser::format_for_storage(&descriptor.created_at))
        .bind(DateTimeParser::format_for_storage(&descriptor.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, key: &JobKey) -> EngineResult<Option<JobDescriptor>> {
        let row = sqlx::query(
            "SELECT tenant, job_name, description, job_data, created_at, updated_at
             FROM scheduler_jobs WHERE tenant = ? AND job_name = ?",
        )
        .bind(&key.tenant)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_descriptor(&row)).transpose()
    }

    pub async fn job_exists(&self, key: &JobKey) -> EngineResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scheduler_jobs WHERE tenant = ? AND job_name = ?",
        )
        .bind(&key.tenant)
        .bind(&key.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Remove a job and all of its triggers. Returns false if the job did not exist.
    pub async fn delete_job(&self, key: &JobKey) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM scheduler_triggers WHERE tenant = ? AND job_name = ?")
            .bind(&key.tenant)
            .bind(&key.name)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM scheduler_jobs WHERE tenant = ? AND job_name = ?")
            .bind(&key.tenant)
            .bind(&key.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn job_keys(&self, tenant: &str) -> EngineResult<Vec<JobKey>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT job_name FROM scheduler_jobs WHERE tenant = ? ORDER BY job_name",
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().map(|name| JobKey::new(tenant, name)).collect())
    }

    /// Store a new trigger. A job can only ever own one cron trigger.
    pub async fn insert_trigger(
        &self,
        trigger: &NewTrigger,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Trigger> {
        let mut tx = self.pool.begin().await?;
        let created = Self::insert_trigger_in(&mut tx, trigger, next_fire_at).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Swap `old_name` for a new trigger in one transaction
    pub async fn replace_trigger(
        &self,
        old_name: &str,
        trigger: &NewTrigger,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Trigger> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM scheduler_triggers WHERE trigger_name = ?")
            .bind(old_name)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() == 0 {
            return Err(EngineError::TriggerNotFound {
                trigger: old_name.to_string(),
            });
        }

        let created = Self::insert_trigger_in(&mut tx, trigger, next_fire_at).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn insert_trigger_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        trigger: &NewTrigger,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Trigger> {
        let job_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scheduler_jobs WHERE tenant = ? AND job_name = ?",
        )
        .bind(&trigger.job.tenant)
        .bind(&trigger.job.name)
        .fetch_one(&mut **tx)
        .await?;
        if job_count == 0 {
            return Err(EngineError::JobNotFound {
                job: trigger.job.to_string(),
            });
        }

        if trigger.kind == TriggerKind::Cron {
            let cron_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM scheduler_triggers WHERE tenant = ? AND job_name = ? AND kind = 'CRON'",
            )
            .bind(&trigger.job.tenant)
            .bind(&trigger.job.name)
            .fetch_one(&mut **tx)
            .await?;
            if cron_count > 0 {
                return Err(EngineError::TriggerExists {
                    job: trigger.job.to_string(),
                });
            }
        }

        let now = Utc::now();
        let state = if next_fire_at.is_some() {
            TriggerState::Scheduled
        } else {
            TriggerState::Complete
        };

        sqlx::query(
            r#"
            INSERT INTO scheduler_triggers
                (trigger_name, tenant, job_name, kind, cron_expression, state, next_fire_at, previous_fire_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(&trigger.name)
        .bind(&trigger.job.tenant)
        .bind(&trigger.job.name)
        .bind(trigger.kind.as_str())
        .bind(&trigger.cron_expression)
        .bind(state.as_str())
        .bind(next_fire_at.as_ref().map(DateTimeParser::format_for_storage))
        .bind(DateTimeParser::format_for_storage(&now))
        .execute(&mut **tx)
        .await?;

        Ok(Trigger {
            name: trigger.name.clone(),
            job: trigger.job.clone(),
            kind: trigger.kind,
            cron_expression: trigger.cron_expression.clone(),
            state,
            next_fire_at,
            previous_fire_at: None,
            created_at: now,
        })
    }

    pub async fn delete_trigger(&self, name: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM scheduler_triggers WHERE trigger_name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn triggers_of(&self, key: &JobKey) -> EngineResult<Vec<Trigger>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduler_triggers WHERE tenant = ? AND job_name = ? ORDER BY created_at",
            TRIGGER_COLUMNS
        ))
        .bind(&key.tenant)
        .bind(&key.name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trigger).collect()
    }

    /// Claim every trigger due at `now` under the trigger-access lock.
    ///
    /// Cron triggers are advanced to the fire time returned by `next_fire`
    /// (or completed when there is none); one-shot triggers are completed.
    /// The returned triggers carry the fire time they were claimed for in
    /// `next_fire_at`.
    pub async fn claim_due_triggers<F>(
        &self,
        lock_sql: &str,
        now: DateTime<Utc>,
        next_fire: F,
    ) -> EngineResult<Vec<Trigger>>
    where
        F: Fn(&Trigger) -> Option<DateTime<Utc>>,
    {
        let mut tx = self.pool.begin().await?;

        sqlx::query(lock_sql)
            .bind("TRIGGER_ACCESS")
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduler_triggers
             WHERE state = 'SCHEDULED' AND next_fire_at IS NOT NULL AND next_fire_at <= ?
             ORDER BY next_fire_at",
            TRIGGER_COLUMNS
        ))
        .bind(DateTimeParser::format_for_storage(&now))
        .fetch_all(&mut *tx)
        .await?;

        let due = rows
            .iter()
            .map(Self::row_to_trigger)
            .collect::<EngineResult<Vec<_>>>()?;

        for trigger in &due {
            let next = match trigger.kind {
                TriggerKind::Cron => next_fire(trigger),
                TriggerKind::Simple => None,
            };
            let state = if next.is_some() {
                TriggerState::Scheduled
            } else {
                TriggerState::Complete
            };

            sqlx::query(
                "UPDATE scheduler_triggers
                 SET state = ?, next_fire_at = ?, previous_fire_at = ?
                 WHERE trigger_name = ?",
            )
            .bind(state.as_str())
            .bind(next.as_ref().map(DateTimeParser::format_for_storage))
            .bind(DateTimeParser::format_for_storage(&now))
            .bind(&trigger.name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(due)
    }

    fn row_to_descriptor(row: &SqliteRow) -> EngineResult<JobDescriptor> {
        let job_data: String = row.get("job_data");
        let data: JobData = serde_json::from_str(&job_data)?;

        Ok(JobDescriptor {
            key: JobKey::new(row.get::<String, _>("tenant"), row.get::<String, _>("job_name")),
            description: row.get("description"),
            data,
            created_at: decode_time("created_at", &row.get::<String, _>("created_at"))?,
            updated_at: decode_time("updated_at", &row.get::<String, _>("updated_at"))?,
        })
    }

    fn row_to_trigger(row: &SqliteRow) -> EngineResult<Trigger> {
        let kind: String = row.get("kind");
        let state: String = row.get("state");
        let next_fire_at: Option<String> = row.get("next_fire_at");
        let previous_fire_at: Option<String> = row.get("previous_fire_at");

        Ok(Trigger {
            name: row.get("trigger_name"),
            job: JobKey::new(row.get::<String, _>("tenant"), row.get::<String, _>("job_name")),
            kind: kind.parse().map_err(|message| EngineError::InvalidData {
                field: "kind".to_string(),
                message,
            })?,
            cron_expression: row.get("cron_expression"),
            state: state.parse().map_err(|message| EngineError::InvalidData {
                field: "state".to_string(),
                message,
            })?,
            next_fire_at: next_fire_at
                .map(|v| decode_time("next_fire_at", &v))
                .transpose()?,
            previous_fire_at: previous_fire_at
                .map(|v| decode_time("previous_fire_at", &v))
                .transpose()?,
            created_at: decode_time("created_at", &row.get::<String, _>("created_at"))?,
        })
    }
}

fn decode_time(field: &str, value: &str) -> EngineResult<DateTime<Utc>> {
    DateTimeParser::parse_stored(value).map_err(|e| EngineError::InvalidData {
        field: field.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn descriptor(name: &str) -> JobDescriptor {
        JobDescriptor::new(
            JobKey::new("site", name),
            "test job",
            JobData::default().with_cron("0 0 * * * *"),
        )
    }

    #[tokio::test]
    async fn test_job_roundtrip_and_upsert() {
        let db = setup().await;
        let mut job = descriptor("search_indexJob");
        db.upsert_job(&job).await.unwrap();

        job.description = "updated".to_string();
        job.data.enabled = true;
        db.upsert_job(&job).await.unwrap();

        let stored = db.get_job(&job.key).await.unwrap().unwrap();
        assert_eq!(stored.description, "updated");
        assert!(stored.data.enabled);
        assert_eq!(db.job_keys("site").await.unwrap(), vec![job.key.clone()]);
        assert!(db.job_keys("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_cron_trigger_rejected() {
        let db = setup().await;
        let job = descriptor("search_indexJob");
        db.upsert_job(&job).await.unwrap();

        let next = Some(Utc::now() + chrono::Duration::hours(1));
        db.insert_trigger(&NewTrigger::cron(&job.key, "0 0 * * * *"), next)
            .await
            .unwrap();
        let second = db
            .insert_trigger(&NewTrigger::cron(&job.key, "0 0 * * * *"), next)
            .await;
        assert!(matches!(second, Err(EngineError::TriggerExists { .. })));

        db.insert_trigger(&NewTrigger::fire_now(&job.key), Some(Utc::now()))
            .await
            .unwrap();
        assert_eq!(db.triggers_of(&job.key).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_trigger_for_unknown_job_rejected() {
        let db = setup().await;
        let key = JobKey::new("site", "missing");
        let result = db.insert_trigger(&NewTrigger::fire_now(&key), Some(Utc::now())).await;
        assert!(matches!(result, Err(EngineError::JobNotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_job_removes_triggers() {
        let db = setup().await;
        let job = descriptor("search_indexJob");
        db.upsert_job(&job).await.unwrap();
        db.insert_trigger(&NewTrigger::cron(&job.key, "0 0 * * * *"), Some(Utc::now()))
            .await
            .unwrap();

        assert!(db.delete_job(&job.key).await.unwrap());
        assert!(db.triggers_of(&job.key).await.unwrap().is_empty());
        assert!(!db.job_exists(&job.key).await.unwrap());
    }
}
