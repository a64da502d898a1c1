//! Broker error types with HTTP status code mapping.
//!
//! [`BrokerError`] is the single error type shared by every [`crate::domain::Broker`]
//! implementation. The composite broker passes member errors through
//! unchanged, so callers see the same variant the member produced.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::command::Command;
use crate::domain::query::LastOperationQuery;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2101,
///     "message": "invalid command: provision_service_instance (service \"s3\", plan \"p1\")",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error enum for all broker operations.
///
/// # Error Code Ranges
///
/// | Range     | Category             | HTTP Status                  |
/// |-----------|----------------------|------------------------------|
/// | 1000–1999 | Validation           | 400 Bad Request              |
/// | 2000–2999 | Routing / State      | 400 / 409 / 410 / 422        |
/// | 3000–3999 | Server / Backend     | 500 / 502                    |
/// | 4000–4999 | Broker capabilities  | 422 / 501                    |
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A precondition on an argument was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No broker is responsible for the command's service id.
    #[error("invalid command: {0}")]
    InvalidCommand(Box<Command>),

    /// No broker is responsible for the query's service id.
    #[error("invalid query: {0}")]
    InvalidQuery(Box<LastOperationQuery>),

    /// The broker does not implement the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A service instance with this id already exists with different attributes.
    #[error("service instance already exists: {0}")]
    ServiceInstanceAlreadyExists(String),

    /// A binding with this id already exists.
    #[error("binding already exists: {0}")]
    BindingAlreadyExists(String),

    /// The service instance does not exist.
    #[error("service instance not found: {0}")]
    ServiceInstanceNotFound(String),

    /// The binding does not exist.
    #[error("binding not found: {0}")]
    BindingNotFound(String),

    /// An asynchronous operation on the instance has not finished yet.
    #[error("operation in progress: {0}")]
    OperationInProgress(String),

    /// The broker only supports asynchronous operations for this plan and
    /// the caller did not accept an incomplete response.
    #[error("asynchronous operation required for service {0}")]
    AsyncRequired(String),

    /// The backing system of a broker failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Builds an [`BrokerError::InvalidCommand`] carrying the rejected command.
    #[must_use]
    pub fn invalid_command(command: impl Into<Command>) -> Self {
        Self::InvalidCommand(Box::new(command.into()))
    }

    /// Builds an [`BrokerError::InvalidQuery`] carrying the rejected query.
    #[must_use]
    pub fn invalid_query(query: LastOperationQuery) -> Self {
        Self::InvalidQuery(Box::new(query))
    }

    /// Returns the rejected command for routing misses.
    #[must_use]
    pub fn command(&self) -> Option<&Command> {
        match self {
            Self::InvalidCommand(command) => Some(&**command),
            _ => None,
        }
    }

    /// Returns the rejected query for routing misses.
    #[must_use]
    pub fn query(&self) -> Option<&LastOperationQuery> {
        match self {
            Self::InvalidQuery(query) => Some(&**query),
            _ => None,
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidArgument(_) => 1001,
            Self::InvalidCommand(_) => 2101,
            Self::InvalidQuery(_) => 2102,
            Self::ServiceInstanceNotFound(_) => 2001,
            Self::BindingNotFound(_) => 2002,
            Self::ServiceInstanceAlreadyExists(_) => 2201,
            Self::BindingAlreadyExists(_) => 2202,
            Self::OperationInProgress(_) => 2203,
            Self::Internal(_) => 3000,
            Self::Backend(_) => 3001,
            Self::AsyncRequired(_) => 4001,
            Self::Unsupported(_) => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) | Self::InvalidCommand(_) | Self::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ServiceInstanceNotFound(_) | Self::BindingNotFound(_) => StatusCode::GONE,
            Self::ServiceInstanceAlreadyExists(_) | Self::BindingAlreadyExists(_) => {
                StatusCode::CONFLICT
            }
            Self::AsyncRequired(_) | Self::OperationInProgress(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::InvalidCommand(command) => Some(command.kind().to_string()),
            Self::AsyncRequired(_) => Some("AsyncRequired".to_string()),
            Self::OperationInProgress(_) => Some("ConcurrencyError".to_string()),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
