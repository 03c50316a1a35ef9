use crate::services::retry::RetryableError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, time::Duration};
use thiserror::Error;

/// Database error codes that indicate a transient infrastructure condition.
///
/// SQLite: busy, locked, and their extended codes. MySQL: server gone away,
/// lost connection, lock wait timeout, deadlock, too many connections.
/// PostgreSQL: deadlock, lock not available, too many connections,
/// connection failure, admin shutdown.
const TRANSIENT_DB_CODES: [&str; 15] = [
    "5", "6", "261", "262", "517", // sqlite
    "2006", "2013", "1205", "1213", "1040", // mysql
    "40P01", "55P03", "53300", "08006", "57P01", // postgres
];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery `{0}` not found")]
    NotFound(i64),
    #[error("{0}")]
    Validation(String),
    #[error("discovery `{id}` is already {current}")]
    Conflict {
        id: i64,
        current: crate::models::discovery::ApprovalStatus,
    },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Storage(#[from] object_store::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

impl RetryableError for DiscoveryError {
    fn is_transient(&self) -> bool {
        match self {
            DiscoveryError::Sqlx(err) => is_transient_sqlx(err),
            _ => false,
        }
    }

    fn timed_out(limit: Duration) -> Self {
        DiscoveryError::Timeout(limit)
    }
}

/// Return true if the SQLx error belongs to the fixed transient set.
pub fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| TRANSIENT_DB_CODES.contains(&code.as_ref()))
            .unwrap_or(false),
        _ => false,
    }
}

/// A lightweight wrapper for errors returned over HTTP.
///
/// `reason` is a stable machine-readable tag; `message` is safe to show.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub reason: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, reason, and message.
    pub fn new(status: StatusCode, reason: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error. The message is generic.
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
        )
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    /// Shortcut for 400 Bad Request on invalid input
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "reason": self.reason,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<DiscoveryError> for AppError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NotFound(_) => AppError::not_found(err.to_string()),
            DiscoveryError::Validation(msg) => AppError::validation(msg),
            DiscoveryError::Conflict { .. } => {
                AppError::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                AppError::internal()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "request failed");
        AppError::internal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_listed_sqlx_errors_are_transient() {
        assert!(is_transient_sqlx(&sqlx::Error::PoolTimedOut));
        assert!(is_transient_sqlx(&sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))));
        assert!(!is_transient_sqlx(&sqlx::Error::RowNotFound));
        assert!(!is_transient_sqlx(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn domain_errors_map_to_http_kinds() {
        let err: AppError = DiscoveryError::NotFound(7).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.reason, "not_found");

        let err: AppError = DiscoveryError::Validation("approved_by is required".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "approved_by is required");

        let err: AppError = DiscoveryError::Sqlx(sqlx::Error::PoolClosed).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal server error");
    }

    #[test]
    fn non_database_errors_are_never_transient() {
        assert!(!DiscoveryError::NotFound(1).is_transient());
        assert!(!DiscoveryError::Validation("x".into()).is_transient());
        assert!(DiscoveryError::Sqlx(sqlx::Error::PoolTimedOut).is_transient());
    }
}
