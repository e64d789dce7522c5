//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction so every endpoint reports
//! failures in one of three shapes:
//! - empty body (unknown queue on the queue endpoints),
//! - plain text (unknown channel or queue elsewhere, e.g. `"{id} channel does not exist"`),
//! - JSON [`ErrorResponse`] (validation and internal failures).
//!
//! # Key invariants and assumptions
//! - Status codes must align with the error category.
//! - Internal errors log details server-side but return generic messages.
use crate::api::types::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use kairo_broker::BrokerError;

#[derive(Debug)]
pub enum ApiErrorBody {
    Empty,
    Text(String),
    Json(ErrorResponse),
}

/// Structured API error returned by handlers.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use broker::api::error::{ApiError, ApiErrorBody};
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ApiErrorBody::Text("abc channel does not exist".to_string()),
/// };
/// assert_eq!(err.status, StatusCode::NOT_FOUND);
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self.body {
            ApiErrorBody::Empty => self.status.into_response(),
            ApiErrorBody::Text(text) => (self.status, text).into_response(),
            ApiErrorBody::Json(body) => (self.status, Json(body)).into_response(),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::QueueNotFound(_) | BrokerError::ChannelNotFound(_) => {
                api_not_found(&err.to_string())
            }
            BrokerError::InvalidQueueId
            | BrokerError::EmptyScheduleRules
            | BrokerError::EmptyChannelQueues
            | BrokerError::InvalidBufferOptions(_)
            | BrokerError::InvalidRecurrence(_) => api_validation_error(&err.to_string()),
            BrokerError::CapacityTooSmall => {
                tracing::error!(error = %err, "broker misconfigured");
                api_internal_message("broker misconfigured")
            }
        }
    }
}

/// 404 with no body.
pub fn api_not_found_empty() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        body: ApiErrorBody::Empty,
    }
}

/// 404 whose body is `message` as plain text.
pub fn api_not_found(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        body: ApiErrorBody::Text(message.to_string()),
    }
}

/// Build a 400 Bad Request validation error.
pub fn api_validation_error(message: &str) -> ApiError {
    // Client input failed validation or was malformed.
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ApiErrorBody::Json(ErrorResponse {
            code: "validation_error".to_string(),
            message: message.to_string(),
            request_id: None,
        }),
    }
}

/// Build a 500 Internal Server Error.
pub fn api_internal_message(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ApiErrorBody::Json(ErrorResponse {
            code: "internal".to_string(),
            message: message.to_string(),
            request_id: None,
        }),
    }
}
