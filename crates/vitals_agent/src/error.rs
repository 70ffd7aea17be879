//! Error type returned by the HTTP handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use vitals_client::VitalsError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Vitals(#[from] VitalsError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Vitals(e) => match e {
                VitalsError::NotConnected => StatusCode::CONFLICT,
                VitalsError::SessionExpired => StatusCode::UNAUTHORIZED,
                VitalsError::PermissionDenied => StatusCode::FORBIDDEN,
                VitalsError::Upstream { .. } | VitalsError::Http(_) => StatusCode::BAD_GATEWAY,
                VitalsError::Config(_)
                | VitalsError::InvalidInput(_)
                | VitalsError::Authorization(_) => StatusCode::BAD_REQUEST,
                VitalsError::Storage(_) | VitalsError::Serialization(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
