//! Error handling utilities for route handlers

use axum::http::StatusCode;

use crate::routes::envelope::ApiError;

/// Extension trait for logging errors and converting them to an [`ApiError`]
pub trait LogErr<T> {
    /// Log error with context and return a generic 500
    fn log_500(self, context: &str) -> Result<T, ApiError>;

    /// Log error with context and return a custom status and public message
    fn log_status(self, context: &str, status: StatusCode, message: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{}", context);
            ApiError::internal()
        })
    }

    fn log_status(self, context: &str, status: StatusCode, message: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            tracing::warn!(error = %e, status = status.as_u16(), "{}", context);
            ApiError::new(status, message)
        })
    }
}
