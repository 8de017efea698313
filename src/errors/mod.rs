//! Centralized error handling for the job orchestration service
//!
//! # Error Categories
//!
//! - **Database Errors**: SQLite operations, migrations, connection issues
//! - **Repository Errors**: Execution record store failures
//! - **Engine Errors**: Scheduling engine storage and trigger failures
//! - **Lifecycle Errors**: Validation and conflict outcomes of job lifecycle operations
//!
//! # Usage
//!
//! ```rust
//! use jobkeeper::errors::{AppError, AppResult};
//!
//! async fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Engine Results
pub type EngineResult<T> = Result<T, EngineError>;

/// Convenience type alias for Lifecycle Results
pub type LifecycleResult<T> = Result<T, LifecycleError>;
