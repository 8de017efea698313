use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::utils::datetime::DateTimeParser;

pub mod execution_records;
pub mod job_store;

/// Versioned schema changes, applied in order and recorded in `schema_migrations`
const MIGRATIONS: &[(i64, &str, &[&str])] = &[
    (
        1,
        "scheduler_store",
        &[
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_jobs (
                tenant TEXT NOT NULL,
                job_name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                job_data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant, job_name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_triggers (
                trigger_name TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                job_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                cron_expression TEXT,
                state TEXT NOT NULL,
                next_fire_at TEXT,
                previous_fire_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (tenant, job_name) REFERENCES scheduler_jobs (tenant, job_name) ON DELETE CASCADE
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_scheduler_triggers_single_cron
             ON scheduler_triggers (tenant, job_name) WHERE kind = 'CRON'",
            "CREATE INDEX IF NOT EXISTS idx_scheduler_triggers_due
             ON scheduler_triggers (state, next_fire_at)",
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_locks (
                lock_name TEXT PRIMARY KEY,
                acquired_at TEXT
            )
            "#,
            "INSERT OR IGNORE INTO scheduler_locks (lock_name) VALUES ('TRIGGER_ACCESS')",
        ],
    ),
    (
        2,
        "job_execution_record",
        &[
            r#"
            CREATE TABLE IF NOT EXISTS job_execution_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site TEXT NOT NULL,
                application TEXT NOT NULL,
                job_name TEXT NOT NULL,
                trigger_name TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration INTEGER NOT NULL,
                run_once INTEGER NOT NULL DEFAULT 0,
                result TEXT NOT NULL,
                stacktraces TEXT,
                custom_data TEXT,
                node TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_job_execution_record_site_start
             ON job_execution_record (site, start_time)",
            "CREATE INDEX IF NOT EXISTS idx_job_execution_record_job
             ON job_execution_record (site, application, job_name, start_time)",
        ],
    ),
];

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn new(config: &DatabaseConfig) -> RepositoryResult<Self> {
        // Create database if it doesn't exist
        if !config.url.contains(":memory:") && !Sqlite::database_exists(&config.url).await? {
            Sqlite::create_database(&config.url).await?;
        }

        let options = SqliteConnectOptions::from_str(&config.url)?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(10))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Single shared in-memory database, used by tests
    pub async fn in_memory() -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TEXT NOT NULL,
                checksum TEXT NOT NULL,
                execution_time INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for &(version, description, statements) in MIGRATIONS {
            let applied = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            )
            .bind(version)
            .fetch_one(&self.pool)
            .await?;

            if applied > 0 {
                continue;
            }

            let start = std::time::Instant::now();
            let mut transaction = self.pool.begin().await?;

            for statement in statements {
                sqlx::query(*statement)
                    .execute(&mut *transaction)
                    .await
                    .map_err(|e| RepositoryError::MigrationFailed {
                        version: format!("{:03}_{}", version, description),
                        message: e.to_string(),
                    })?;
            }

            let execution_time = start.elapsed().as_millis() as i64;
            sqlx::query(
                r#"
                INSERT INTO schema_migrations (version, description, installed_on, checksum, execution_time)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(version)
            .bind(description)
            .bind(DateTimeParser::format_for_storage(&chrono::Utc::now()))
            .bind(Self::calculate_checksum(statements))
            .bind(execution_time)
            .execute(&mut *transaction)
            .await?;

            transaction.commit().await?;
            info!("Applied migration: {:03}_{} ({}ms)", version, description, execution_time);
        }

        Ok(())
    }

    fn calculate_checksum(statements: &[&str]) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        statements.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Decode a stored timestamp column
pub(crate) fn parse_timestamp(field: &str, value: &str) -> RepositoryResult<chrono::DateTime<chrono::Utc>> {
    DateTimeParser::parse_stored(value).map_err(|e| RepositoryError::InvalidData {
        field: field.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&db.pool())
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
