use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype over the domain error so the HTTP mapping lives in the adapter
/// layer.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            PipelineError::Unauthorized(msg) => {
                tracing::warn!("webhook rejected: {msg}");
                (
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "unauthorized".to_string(),
                )
            }
            PipelineError::Validation(msg) | PipelineError::Malformed(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            err if err.is_transient() => {
                tracing::error!("transient store failure: {err}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "temporarily_unavailable",
                    "temporarily unavailable, retry later".to_string(),
                )
            }
            PipelineError::GatewayNotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "payment not found at gateway".to_string(),
            ),
            PipelineError::Gateway(msg) => {
                tracing::error!("gateway error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "gateway_error",
                    "payment gateway unavailable".to_string(),
                )
            }
            err => {
                tracing::error!("internal error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
