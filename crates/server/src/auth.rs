//! Request classification for the principal-authenticated route group.
//!
//! Every request arriving here must carry `Authorization: ApiKey <secret>`.
//! The secret resolves either to an active principal, or to the bootstrap
//! key — which is accepted only for `create-principal` and only while zero
//! principals exist. The resulting [`Identity`] is attached as a request
//! extension for handlers.

use crate::AppState;
use axum::{extract::State, http::Request, middleware::Next, response::Response};
use stratum_core::context::{Identity, PrincipalRef};
use stratum_core::crypto;
use stratum_core::error::GatewayError;

const CREATE_PRINCIPAL_PATH: &str = "/principal/create";

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let secret = extract_api_key(&request)?.to_string();
    let path = request.uri().path().to_string();

    if let Some(ref bootstrap) = state.config.bootstrap_api_key
        && crypto::ct_eq(secret.as_bytes(), bootstrap.as_bytes())
    {
        if path != CREATE_PRINCIPAL_PATH {
            return Err(GatewayError::AuthBootstrapMisuse(
                "bootstrap key is only valid for create-principal".into(),
            ));
        }
        if state.principals.has_any().await? {
            return Err(GatewayError::AuthBootstrapMisuse(
                "principals already exist".into(),
            ));
        }
        request.extensions_mut().insert(Identity::Bootstrap);
        return Ok(next.run(request).await);
    }

    match state.principals.resolve(&secret).await? {
        Some(principal) => {
            request.extensions_mut().insert(Identity::Principal(PrincipalRef {
                display_name: principal.display_name,
                secret_hash: principal.secret_hash,
            }));
            Ok(next.run(request).await)
        }
        None => Err(GatewayError::AuthUnknown("no matching api key".into())),
    }
}

fn extract_api_key<'a>(request: &'a Request<axum::body::Body>) -> Result<&'a str, GatewayError> {
    let header = request
        .headers()
        .get("authorization")
        .ok_or_else(|| GatewayError::AuthMalformed("missing authorization header".into()))?;
    let value = header
        .to_str()
        .map_err(|_| GatewayError::AuthMalformed("authorization header is not ascii".into()))?;
    value
        .strip_prefix("ApiKey ")
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| {
            GatewayError::AuthMalformed("expected 'Authorization: ApiKey <secret>'".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/kv/get");
        if let Some(v) = value {
            builder = builder.header("authorization", v);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_api_key_shapes() {
        assert_eq!(
            extract_api_key(&request_with_auth(Some("ApiKey abc123"))).unwrap(),
            "abc123"
        );
        assert!(matches!(
            extract_api_key(&request_with_auth(None)),
            Err(GatewayError::AuthMalformed(_))
        ));
        assert!(matches!(
            extract_api_key(&request_with_auth(Some("Bearer abc123"))),
            Err(GatewayError::AuthMalformed(_))
        ));
        assert!(matches!(
            extract_api_key(&request_with_auth(Some("ApiKey "))),
            Err(GatewayError::AuthMalformed(_))
        ));
    }
}
