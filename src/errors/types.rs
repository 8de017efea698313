//! Error type definitions for the job orchestration service
//!
//! The hierarchy mirrors the layers of the service: the record store and the
//! scheduling engine each have their own error type, the lifecycle manager
//! reports validation and conflict outcomes through [`LifecycleError`], and
//! [`AppError`] ties everything together at the web boundary.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Execution record store errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Scheduling engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Job lifecycle validation and conflict outcomes
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// Invalid request parameters
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Missing or invalid credentials
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },
}

/// Execution record store errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// SQL execution failures
    #[error("Query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Data serialization/deserialization failures
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Stored value could not be decoded into its domain type
    #[error("Invalid stored value in {field}: {message}")]
    InvalidData { field: String, message: String },

    /// Migration failures
    #[error("Migration failed: {version} - {message}")]
    MigrationFailed { version: String, message: String },
}

/// Scheduling engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Job or trigger storage failed
    #[error("Engine storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// Job data could not be (de)serialized
    #[error("Job data serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cron expression rejected by the engine
    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    /// A second cron trigger was requested for a job that already has one
    #[error("Job {job} already has a cron trigger")]
    TriggerExists { job: String },

    /// Trigger refers to a job the engine does not know
    #[error("Job {job} does not exist")]
    JobNotFound { job: String },

    /// Trigger name unknown to the engine
    #[error("Trigger {trigger} does not exist")]
    TriggerNotFound { trigger: String },

    /// Stored value could not be decoded
    #[error("Invalid stored value in {field}: {message}")]
    InvalidData { field: String, message: String },
}

/// Broad category of a lifecycle outcome, used for status code mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleErrorKind {
    Validation,
    Conflict,
    NotFound,
    Internal,
}

/// Outcome of a rejected lifecycle operation
///
/// Validation variants carry the name of the offending field so callers can
/// attach the message to it. None of these leave partial state behind.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid cron expression '{expression}'")]
    InvalidCronExpression { expression: String },

    #[error("A job named '{name}' already exists")]
    NameExists { name: String },

    #[error("Job name is missing")]
    NameMissing,

    #[error("Job {job} is already active")]
    AlreadyActive { job: String },

    #[error("Job {job} has no trigger to remove")]
    TriggerNotFound { job: String },

    #[error("Job {job} is currently running")]
    AlreadyRunning { job: String },

    #[error("Job {job} cannot be deleted while it is running")]
    DeleteWhileRunning { job: String },

    #[error("Job {job} does not exist")]
    JobNotFound { job: String },

    #[error("No job implementation '{bean}' registered for component '{component}'")]
    UnregisteredJob { component: String, bean: String },

    #[error("Scheduling engine failure: {0}")]
    Engine(#[from] EngineError),
}

impl LifecycleError {
    /// Field the error should be attached to, if it is a validation error
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidCronExpression { .. } => Some("cronExpression"),
            Self::NameExists { .. } | Self::NameMissing => Some("name"),
            _ => None,
        }
    }

    pub fn kind(&self) -> LifecycleErrorKind {
        match self {
            Self::InvalidCronExpression { .. } | Self::NameExists { .. } | Self::NameMissing => {
                LifecycleErrorKind::Validation
            }
            Self::AlreadyActive { .. }
            | Self::TriggerNotFound { .. }
            | Self::AlreadyRunning { .. }
            | Self::DeleteWhileRunning { .. } => LifecycleErrorKind::Conflict,
            Self::JobNotFound { .. } | Self::UnregisteredJob { .. } => LifecycleErrorKind::NotFound,
            Self::Engine(_) => LifecycleErrorKind::Internal,
        }
    }
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }
}
