use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// ErrorBody
///
/// The JSON error envelope every failing endpoint returns.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// MarkerError
///
/// The full error taxonomy of the marker lifecycle core. Every business-rule
/// violation is a distinct variant so callers (and tests) can tell them apart;
/// storage failures wrap the underlying driver error. The core never retries
/// and never swallows: everything propagates to the HTTP layer, which maps
/// each kind to its status code via `IntoResponse`.
#[derive(Debug, Error)]
pub enum MarkerError {
    /// A required field is missing, empty, or out of range.
    #[error("missing or invalid field: {0}")]
    Validation(&'static str),

    /// The owner already has the maximum number of active markers.
    #[error("you have reached the maximum limit of {limit} active markers", limit = crate::lifecycle::ACTIVE_MARKER_LIMIT)]
    QuotaExceeded,

    /// The requester is neither the owner nor an admin.
    #[error("forbidden")]
    Forbidden,

    /// No marker (or user) with the given identifier exists.
    #[error("not found")]
    NotFound,

    /// The target status is not in the allowed set.
    #[error("invalid status value: {0}")]
    InvalidStatus(String),

    /// Persistence failure. The cause is logged server-side; clients get a
    /// generic message to avoid leaking driver details.
    #[error("storage failure")]
    Storage(#[from] sqlx::Error),
}

impl MarkerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            // Matches the original API contract: hitting the active-marker
            // quota is reported as 403, not 429.
            Self::QuotaExceeded | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MarkerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Storage(cause) => {
                tracing::error!(%cause, "storage error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
