use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for all gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed credentials: {0}")]
    AuthMalformed(String),

    #[error("unknown credentials: {0}")]
    AuthUnknown(String),

    #[error("bootstrap key misuse: {0}")]
    AuthBootstrapMisuse(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    #[error("presigner is not configured")]
    PresignerUnavailable,

    #[error("transient storage error: {0}")]
    AdapterTransient(String),

    #[error("storage error: {0}")]
    AdapterFatal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthMalformed(_)
            | Self::AuthUnknown(_)
            | Self::AuthBootstrapMisuse(_)
            | Self::TokenExpired
            | Self::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::PresignerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::AdapterTransient(_) | Self::AdapterFatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code carried in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthMalformed(_) => "auth_malformed",
            Self::AuthUnknown(_) => "auth_unknown",
            Self::AuthBootstrapMisuse(_) => "auth_bootstrap_misuse",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::TokenExpired => "token_expired",
            Self::TokenInvalid(_) => "token_invalid",
            Self::RangeNotSatisfiable(_) => "range_not_satisfiable",
            Self::PresignerUnavailable => "presigner_unavailable",
            Self::AdapterTransient(_) => "adapter_transient",
            Self::AdapterFatal(_) => "adapter_fatal",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });

        (
            status,
            [("content-type", "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
