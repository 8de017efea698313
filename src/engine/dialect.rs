use tracing::warn;

/// SQL flavour used for the trigger-access lock. Selected from the database
/// URL and only visible to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
    MySql,
    SqlServer,
}

impl SqlDialect {
    pub fn from_database_url(url: &str) -> Self {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "sqlite" => SqlDialect::Sqlite,
            "postgres" | "postgresql" => SqlDialect::Postgres,
            "mysql" | "mariadb" => SqlDialect::MySql,
            "mssql" | "sqlserver" => SqlDialect::SqlServer,
            other => {
                warn!("Unknown database scheme '{}', using SQLite lock statements", other);
                SqlDialect::Sqlite
            }
        }
    }

    /// Statement taking the row lock on `scheduler_locks`; binds the lock name
    pub fn lock_sql(&self) -> &'static str {
        match self {
            // SQLite has no row locks, a write escalates the transaction to RESERVED
            SqlDialect::Sqlite => {
                "UPDATE scheduler_locks SET acquired_at = CURRENT_TIMESTAMP WHERE lock_name = ?"
            }
            SqlDialect::Postgres => {
                "SELECT lock_name FROM scheduler_locks WHERE lock_name = $1 FOR UPDATE"
            }
            SqlDialect::MySql => "SELECT lock_name FROM scheduler_locks WHERE lock_name = ? FOR UPDATE",
            SqlDialect::SqlServer => {
                "SELECT lock_name FROM scheduler_locks WITH (UPDLOCK, ROWLOCK) WHERE lock_name = @P1"
            }
        }
    }
}
