use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// Whole-request errors: schema/size validation and storage failures abort
/// the request atomically. Per-URL download failures never reach this type;
/// they're folded into the save handler's response body instead.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or incorrect request signature")]
    AuthFailed,

    #[error("request invalid: {0}")]
    RequestInvalid(String),

    #[error("request body exceeds configured limit")]
    BodyTooLarge,

    #[error(transparent)]
    Storage(#[from] sia_core::CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::AuthFailed => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::RequestInvalid(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::BodyTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage error".to_string()),
        };

        if matches!(&self, ApiError::Storage(_)) {
            tracing::error!(error = %self, "request failed with storage error");
        }

        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}
