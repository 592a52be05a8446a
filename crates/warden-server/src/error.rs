use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use warden_client::ClientError;
use warden_core::tuple::SubjectError;

/// Failure kinds returned by the gateway's use cases.
///
/// Backend and collaborator details are kept in `detail` for logging and
/// never reach the response body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    RequestInvalid(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authorization service unavailable")]
    AuthzUnavailable { detail: String },

    #[error("internal server error")]
    Internal { detail: String },
}

impl ApiError {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        ApiError::AuthzUnavailable {
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Internal {
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RequestInvalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AuthzUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        ApiError::unavailable(err.to_string())
    }
}

impl From<SubjectError> for ApiError {
    fn from(err: SubjectError) -> Self {
        ApiError::RequestInvalid(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::RequestInvalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::AuthzUnavailable { detail } => {
                tracing::error!(error = %detail, "authorization backend failure");
            }
            ApiError::Internal { detail } => {
                tracing::error!(error = %detail, "internal failure");
            }
            _ => {}
        }

        let body = serde_json::json!({"error": self.to_string()});
        (self.status(), Json(body)).into_response()
    }
}
