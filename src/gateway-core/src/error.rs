//! Shared error taxonomy for the gateway.
//!
//! Every component crate defines its own narrow error type; this enum is
//! what the orchestrator and RPC layer collect them into, matching the
//! error kinds of the pipeline specification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error-kind tag, used by the RPC layer to build `{code, message}`
/// responses without inspecting error internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidParams,
    Unauthorized,
    RateLimited,
    BlockedByPolicy,
    ApprovalTimeout,
    ApprovalRejected,
    SandboxUnavailable,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "invalid_params",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::BlockedByPolicy => "blocked_by_policy",
            ErrorCode::ApprovalTimeout => "approval_timeout",
            ErrorCode::ApprovalRejected => "approval_rejected",
            ErrorCode::SandboxUnavailable => "sandbox_unavailable",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("blocked by policy: {0}")]
    BlockedByPolicy(String),

    #[error("approval timed out")]
    ApprovalTimeout,

    #[error("approval rejected: {0:?}")]
    ApprovalRejected(Option<String>),

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::InvalidParams(_) => ErrorCode::InvalidParams,
            GatewayError::Unauthorized(_) => ErrorCode::Unauthorized,
            GatewayError::RateLimited { .. } => ErrorCode::RateLimited,
            GatewayError::BlockedByPolicy(_) => ErrorCode::BlockedByPolicy,
            GatewayError::ApprovalTimeout => ErrorCode::ApprovalTimeout,
            GatewayError::ApprovalRejected(_) => ErrorCode::ApprovalRejected,
            GatewayError::SandboxUnavailable(_) => ErrorCode::SandboxUnavailable,
            GatewayError::NotFound(_) => ErrorCode::NotFound,
            GatewayError::InternalError(_) => ErrorCode::InternalError,
        }
    }

    /// Render as the `{code, message}` wire shape used by the RPC surface.
    pub fn to_wire(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().as_str().to_string(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
