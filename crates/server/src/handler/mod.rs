pub mod admin;
pub mod blob;
pub mod channel;
pub mod kv;
pub mod ping;
pub mod principal;

use axum::http::HeaderMap;
use stratum_core::error::GatewayError;

/// The capability token header, with the legacy `X-Log-Token` alias.
pub(crate) fn channel_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get("x-channel-token")
        .or_else(|| headers.get("x-log-token"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::TokenInvalid("missing channel token header".into()))
}
