//! HTTP response types and utilities
//!
//! Every error leaving a handler goes through [`handle_error`], which is the
//! one place where error variants are mapped to status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, warn};

use crate::errors::{AppError, AppResult, LifecycleErrorKind};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Offending field name to message, for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error_with_details(message: String, details: HashMap<String, String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: Some(details),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Helper function to convert AppResult to HTTP response
pub fn handle_result<T>(result: AppResult<T>) -> Response
where
    T: Serialize,
{
    match result {
        Ok(data) => ok(data),
        Err(error) => handle_error(error),
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> Response {
    let (status, message, details) = match &error {
        AppError::Validation { message } => (StatusCode::BAD_REQUEST, message.clone(), None),
        AppError::NotFound { resource, id } => (
            StatusCode::NOT_FOUND,
            format!("{} '{}' not found", resource, id),
            None,
        ),
        AppError::Unauthorized { message } => (StatusCode::UNAUTHORIZED, message.clone(), None),
        AppError::Lifecycle(lifecycle) => match lifecycle.kind() {
            LifecycleErrorKind::Validation => {
                let details = lifecycle.field().map(|field| {
                    HashMap::from([(field.to_string(), lifecycle.to_string())])
                });
                (StatusCode::BAD_REQUEST, lifecycle.to_string(), details)
            }
            LifecycleErrorKind::Conflict => (StatusCode::CONFLICT, lifecycle.to_string(), None),
            LifecycleErrorKind::NotFound => (StatusCode::NOT_FOUND, lifecycle.to_string(), None),
            LifecycleErrorKind::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Scheduling engine operation failed".to_string(),
                None,
            ),
        },
        AppError::Database(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Database operation failed".to_string(),
            None,
        ),
        AppError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Data access failed".to_string(),
            None,
        ),
        AppError::Engine(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Scheduling engine operation failed".to_string(),
            None,
        ),
    };

    if status.is_server_error() {
        error!("Request failed: {}", error);
    } else {
        warn!("Request rejected ({}): {}", status.as_u16(), message);
    }

    let response = match details {
        Some(details) => ApiResponse::<()>::error_with_details(message, details),
        None => ApiResponse::<()>::error(message),
    };

    (status, Json(response)).into_response()
}

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LifecycleError;

    #[test]
    fn test_lifecycle_status_codes() {
        let response = handle_error(AppError::from(LifecycleError::InvalidCronExpression {
            expression: "nope".to_string(),
        }));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_error(AppError::from(LifecycleError::AlreadyRunning {
            job: "site.search_indexJob".to_string(),
        }));
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = handle_error(AppError::from(LifecycleError::JobNotFound {
            job: "site.missing".to_string(),
        }));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handle_error(AppError::unauthorized("missing token"));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
