//! RPC error wrapper translating `GatewayError` into HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway_core::{ErrorCode, GatewayError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Gateway(e) => match e.code() {
                ErrorCode::InvalidParams => StatusCode::BAD_REQUEST,
                ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
                ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                ErrorCode::BlockedByPolicy => StatusCode::FORBIDDEN,
                ErrorCode::ApprovalTimeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorCode::ApprovalRejected => StatusCode::CONFLICT,
                ErrorCode::SandboxUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::NotFound => StatusCode::NOT_FOUND,
                ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Gateway(e) => {
                let wire = e.to_wire();
                ErrorBody {
                    code: wire.code,
                    message: wire.message,
                }
            }
            AppError::BadRequest(msg) => ErrorBody {
                code: "invalid_params".to_string(),
                message: msg.clone(),
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429() {
        let err = AppError::Gateway(GatewayError::RateLimited { retry_after_ms: 500 });
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = AppError::Gateway(GatewayError::NotFound("x".to_string()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
