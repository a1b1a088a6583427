//! Error types for the tenant router.
//!
//! This module defines all error types using `thiserror`. Per-tenant errors
//! raised during resolution and provisioning are logged and contained by the
//! caller; only routing-time resource failures reach the unit of work.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Driver not found ({driver})")]
    DriverNotFound { driver: String, suggestion: String },

    #[error("Connection failed: {message}")]
    Connectivity { message: String, suggestion: String },

    #[error("Tenant discovery failed: {message}")]
    Discovery { message: String },

    #[error("No pool provisioned for {url}")]
    PoolNotFound { url: String },

    #[error("Pool for {url} is broken after repeated acquisition failures")]
    PoolBroken { url: String },

    #[error("No tenants are registered")]
    NoTenants,

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a driver resolution error.
    pub fn driver_not_found(driver: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::DriverNotFound {
            driver: driver.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connectivity error with a helpful suggestion.
    pub fn connectivity(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Create a pool not found error.
    pub fn pool_not_found(url: impl Into<String>) -> Self {
        Self::PoolNotFound { url: url.into() }
    }

    /// Create a broken pool error.
    pub fn pool_broken(url: impl Into<String>) -> Self {
        Self::PoolBroken { url: url.into() }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::DriverNotFound { suggestion, .. } => Some(suggestion),
            Self::Connectivity { suggestion, .. } => Some(suggestion),
            Self::PoolNotFound { .. } => {
                Some("Provision a pool for this URL or trigger a reconciliation")
            }
            Self::PoolBroken { .. } => Some("Check the database server and trigger a reconciliation"),
            Self::NoTenants => Some("Configure at least one tenant under the mdb. prefix"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::Timeout { .. })
    }

    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::DriverNotFound { .. } => "driver_not_found",
            Self::Connectivity { .. } => "connectivity",
            Self::Discovery { .. } => "discovery",
            Self::PoolNotFound { .. } => "pool_not_found",
            Self::PoolBroken { .. } => "pool_broken",
            Self::NoTenants => "no_tenants",
            Self::Timeout { .. } => "timeout",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Internal { .. } => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } | Self::Configuration { .. } => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connectivity(
                msg.to_string(),
                "Check the connection URL format and credentials",
            ),
            sqlx::Error::Database(db_err) => DbError::connectivity(
                db_err.message().to_string(),
                "Check the credentials and that the database exists",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 0),
            sqlx::Error::PoolClosed => {
                DbError::connectivity("Connection pool is closed", "Trigger a reconciliation")
            }
            sqlx::Error::Io(io_err) => DbError::connectivity(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connectivity(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connectivity(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::discovery(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::discovery(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                suggestion: self.suggestion(),
            },
        };
        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":{"code":"internal","message":"Failed to encode error"}}"#.to_string()
        });

        (
            self.status(),
            [(header::CONTENT_TYPE, "application/json")],
            json,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::driver_not_found("com.example.Driver", "Use postgres, mysql or sqlite");
        assert_eq!(err.to_string(), "Driver not found (com.example.Driver)");
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connectivity("refused", "Check the server");
        assert_eq!(err.suggestion(), Some("Check the server"));
        assert!(DbError::invalid_input("x").suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("acquire", 5000).is_retryable());
        assert!(DbError::connectivity("err", "sugg").is_retryable());
        assert!(!DbError::pool_broken("postgres://h/db").is_retryable());
    }

    #[test]
    fn test_pool_closed_maps_to_connectivity() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Connectivity { .. }));
    }

    #[test]
    fn test_routing_errors_map_to_service_unavailable() {
        let response = DbError::NoTenants.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = DbError::invalid_input("missing key").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
