//! Presigned-URL tokens and signed download URLs.
//!
//! Two MAC'd formats hang off the process-wide signing secret:
//!
//! - An upload/download token embedding the full claim set, used by the
//!   self-hosted presigned PUT endpoint. Envelope:
//!   `base64url(claims-json) "." base64url(hmac(claims-json))`.
//! - The short `?exp=…&sig=…` query pair on public download URLs for
//!   `presigned`-visibility blobs, where the MAC covers `alias|key|exp`.
//!   Signing on the alias form keeps existing links valid even if the
//!   namespace were ever re-aliased.

use crate::crypto;
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresignOp {
    Put,
    Get,
}

/// The signed fields of a presigned URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignClaims {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_length: u64,
    /// Unix seconds.
    pub expires_at: i64,
    pub op: PresignOp,
}

/// Sign presign claims into an opaque URL token.
pub fn sign(claims: &PresignClaims, signing_secret: &[u8]) -> Result<String, GatewayError> {
    let payload = serde_json::to_vec(claims)
        .map_err(|e| GatewayError::AdapterFatal(format!("presign claims encode: {e}")))?;
    let mac = crypto::hmac_sha256(signing_secret, &payload);
    Ok(format!(
        "{}.{}",
        crypto::b64url_encode(&payload),
        crypto::b64url_encode(&mac)
    ))
}

/// Verify a presign token: MAC first (constant-time), then expiry, then the
/// expected operation.
pub fn verify(
    token: &str,
    expected_op: PresignOp,
    signing_secret: &[u8],
) -> Result<PresignClaims, GatewayError> {
    let (payload_b64, mac_b64) = token
        .split_once('.')
        .ok_or_else(|| GatewayError::TokenInvalid("malformed presign token".into()))?;
    let payload = crypto::b64url_decode(payload_b64)
        .map_err(|_| GatewayError::TokenInvalid("malformed presign token".into()))?;
    let mac = crypto::b64url_decode(mac_b64)
        .map_err(|_| GatewayError::TokenInvalid("malformed presign token".into()))?;

    let expected = crypto::hmac_sha256(signing_secret, &payload);
    if !crypto::ct_eq(&mac, &expected) {
        return Err(GatewayError::TokenInvalid("signature mismatch".into()));
    }

    let claims: PresignClaims = serde_json::from_slice(&payload)
        .map_err(|_| GatewayError::TokenInvalid("malformed presign claims".into()))?;
    if claims.expires_at < chrono::Utc::now().timestamp() {
        return Err(GatewayError::TokenExpired);
    }
    if claims.op != expected_op {
        return Err(GatewayError::TokenInvalid("operation mismatch".into()));
    }
    Ok(claims)
}

/// MAC for a signed download URL, covering the alias form of the path.
pub fn sign_download(alias: &str, key: &str, expires_at: i64, signing_secret: &[u8]) -> String {
    let payload = format!("{alias}|{key}|{expires_at}");
    let mac = crypto::hmac_sha256(signing_secret, payload.as_bytes());
    crypto::b64url_encode(&mac)
}

/// Verify the `sig`/`exp` query pair on a download URL.
pub fn verify_download(
    alias: &str,
    key: &str,
    expires_at: i64,
    sig: &str,
    signing_secret: &[u8],
) -> Result<(), GatewayError> {
    let payload = format!("{alias}|{key}|{expires_at}");
    let expected = crypto::hmac_sha256(signing_secret, payload.as_bytes());
    let provided = crypto::b64url_decode(sig)
        .map_err(|_| GatewayError::TokenInvalid("malformed signature".into()))?;
    if !crypto::ct_eq(&provided, &expected) {
        return Err(GatewayError::TokenInvalid("signature mismatch".into()));
    }
    if expires_at < chrono::Utc::now().timestamp() {
        return Err(GatewayError::TokenExpired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(op: PresignOp, expires_in: i64) -> PresignClaims {
        PresignClaims {
            bucket: "stratum".into(),
            key: "myapp:img.png".into(),
            content_type: "image/png".into(),
            content_length: 2048,
            expires_at: chrono::Utc::now().timestamp() + expires_in,
            op,
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let secret = crypto::random_bytes(32);
        let token = sign(&claims(PresignOp::Put, 3600), &secret).unwrap();
        let verified = verify(&token, PresignOp::Put, &secret).unwrap();
        assert_eq!(verified.key, "myapp:img.png");
        assert_eq!(verified.content_length, 2048);
    }

    #[test]
    fn test_op_mismatch_rejected() {
        let secret = crypto::random_bytes(32);
        let token = sign(&claims(PresignOp::Get, 3600), &secret).unwrap();
        assert!(matches!(
            verify(&token, PresignOp::Put, &secret),
            Err(GatewayError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_expired_claims_rejected() {
        let secret = crypto::random_bytes(32);
        let token = sign(&claims(PresignOp::Put, -10), &secret).unwrap();
        assert!(matches!(
            verify(&token, PresignOp::Put, &secret),
            Err(GatewayError::TokenExpired)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let secret = crypto::random_bytes(32);
        let token = sign(&claims(PresignOp::Put, 3600), &secret).unwrap();
        let (payload_b64, mac_b64) = token.split_once('.').unwrap();
        let mut payload = crypto::b64url_decode(payload_b64).unwrap();
        // Bump the signed content length.
        let text = String::from_utf8(payload.clone()).unwrap();
        payload = text.replace("2048", "4096").into_bytes();
        let tampered = format!("{}.{}", crypto::b64url_encode(&payload), mac_b64);
        assert!(verify(&tampered, PresignOp::Put, &secret).is_err());
    }

    #[test]
    fn test_download_signature_round_trip() {
        let secret = crypto::random_bytes(32);
        let exp = chrono::Utc::now().timestamp() + 600;
        let sig = sign_download("Ab3xYz12", "img.png", exp, &secret);
        assert!(verify_download("Ab3xYz12", "img.png", exp, &sig, &secret).is_ok());
        // Signature binds the alias, key and expiry.
        assert!(verify_download("Zz3xYz12", "img.png", exp, &sig, &secret).is_err());
        assert!(verify_download("Ab3xYz12", "other.png", exp, &sig, &secret).is_err());
        assert!(verify_download("Ab3xYz12", "img.png", exp + 1, &sig, &secret).is_err());
    }

    #[test]
    fn test_expired_download_signature_rejected() {
        let secret = crypto::random_bytes(32);
        let exp = chrono::Utc::now().timestamp() - 1;
        let sig = sign_download("Ab3xYz12", "img.png", exp, &secret);
        assert!(matches!(
            verify_download("Ab3xYz12", "img.png", exp, &sig, &secret),
            Err(GatewayError::TokenExpired)
        ));
    }
}
