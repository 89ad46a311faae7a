//! Capability token codec (version 1).
//!
//! A token is a compact binary string, base64url-encoded for transport:
//!
//! ```text
//! [version:u8=1][channel-id:16][perm-bitmap:u16][author-len:u8][author:utf-8]
//! [expires-at-hours:u32][mac: first 16 bytes of HMAC-SHA-256(header, channel-secret)]
//! ```
//!
//! All multi-byte integers are big-endian. The MAC covers every preceding
//! byte and is keyed with the owning channel's secret, so a token is only
//! meaningful to the channel that minted it.

use crate::crypto;
use crate::error::GatewayError;
use uuid::Uuid;

const VERSION: u8 = 1;
const MAC_LEN: usize = 16;
const MAX_AUTHOR_BYTES: usize = 32;
/// version + channel-id + perm bitmap + author-len + expires-at + mac
const MIN_TOKEN_LEN: usize = 1 + 16 + 2 + 1 + 4 + MAC_LEN;

/// Permission bits carried in the token bitmap.
pub mod perms {
    pub const READ: u16 = 1;
    pub const APPEND: u16 = 2;
    pub const READ_DELETED: u16 = 4;
    pub const DELETE_OWN: u16 = 8;
    pub const DELETE_ANY: u16 = 16;
    pub const CREATE: u16 = 32;
    pub const SHARE: u16 = 64;
    pub const DELEGATE: u16 = 128;
}

const PERM_NAMES: &[(&str, u16)] = &[
    ("read", perms::READ),
    ("append", perms::APPEND),
    ("read_deleted", perms::READ_DELETED),
    ("delete_own", perms::DELETE_OWN),
    ("delete_any", perms::DELETE_ANY),
    ("create", perms::CREATE),
    ("share", perms::SHARE),
    ("delegate", perms::DELEGATE),
];

/// The verified contents of a capability token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub channel_id: Uuid,
    pub permissions: u16,
    pub author_id: String,
    /// Expiry as unix seconds (hour resolution on the wire).
    pub expires_at: i64,
}

impl TokenClaims {
    pub fn has(&self, bit: u16) -> bool {
        self.permissions & bit != 0
    }
}

/// Translate permission names (e.g. `["read", "append"]`) into a bitmap.
pub fn permissions_from_names(names: &[String]) -> Result<u16, GatewayError> {
    let mut bits = 0u16;
    for name in names {
        let (_, bit) = PERM_NAMES
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| GatewayError::BadRequest(format!("unknown permission: {name}")))?;
        bits |= bit;
    }
    Ok(bits)
}

/// Expand a bitmap back into permission names.
pub fn permission_names(bits: u16) -> Vec<&'static str> {
    PERM_NAMES
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .map(|(name, _)| *name)
        .collect()
}

/// Mint a token for `channel_id` signed with the channel secret. Returns the
/// transport encoding together with the claims actually minted.
///
/// `author_id` defaults to 4 random base62 characters. `expires_in_secs` may
/// be zero or negative to mint an already-expired token.
pub fn create(
    channel_id: Uuid,
    permissions: u16,
    author_id: Option<&str>,
    expires_in_secs: i64,
    channel_secret: &[u8],
) -> Result<(String, TokenClaims), GatewayError> {
    let author = match author_id {
        Some(a) => a.to_string(),
        None => crypto::short_id(4),
    };
    if author.len() > MAX_AUTHOR_BYTES {
        return Err(GatewayError::BadRequest(format!(
            "author id exceeds {MAX_AUTHOR_BYTES} bytes"
        )));
    }

    let now = chrono::Utc::now().timestamp();
    let target = now + expires_in_secs;
    // Positive lifetimes round up to the next hour boundary. Non-positive
    // ones round down, so the minted token is already expired.
    let expires_hours = if expires_in_secs > 0 {
        let d = target / 3600;
        let r = target % 3600;
        if r > 0 { d + 1 } else { d }
    } else {
        target.div_euclid(3600)
    };
    let expires_hours = u32::try_from(expires_hours)
        .map_err(|_| GatewayError::BadRequest("expiry out of range".into()))?;

    let mut buf = Vec::with_capacity(MIN_TOKEN_LEN + author.len());
    buf.push(VERSION);
    buf.extend_from_slice(channel_id.as_bytes());
    buf.extend_from_slice(&permissions.to_be_bytes());
    buf.push(author.len() as u8);
    buf.extend_from_slice(author.as_bytes());
    buf.extend_from_slice(&expires_hours.to_be_bytes());

    let mac = crypto::hmac_sha256(channel_secret, &buf);
    buf.extend_from_slice(&mac[..MAC_LEN]);

    let claims = TokenClaims {
        channel_id,
        permissions,
        author_id: author,
        expires_at: expires_hours as i64 * 3600,
    };
    Ok((crypto::b64url_encode(&buf), claims))
}

/// Verify a token against the channel secret and return its claims.
pub fn verify(token: &str, channel_secret: &[u8]) -> Result<TokenClaims, GatewayError> {
    let raw = decode(token)?;
    let header_len = raw.len() - MAC_LEN;

    let expected = crypto::hmac_sha256(channel_secret, &raw[..header_len]);
    if !crypto::ct_eq(&raw[header_len..], &expected[..MAC_LEN]) {
        return Err(GatewayError::TokenInvalid("signature mismatch".into()));
    }

    let claims = read_claims(&raw)?;
    if claims.expires_at < chrono::Utc::now().timestamp() {
        return Err(GatewayError::TokenExpired);
    }
    Ok(claims)
}

/// Extract the channel id without verification. Used to locate the channel
/// and fetch its secret before the MAC check can run.
pub fn parse_channel_id(token: &str) -> Result<Uuid, GatewayError> {
    let raw = decode(token)?;
    let bytes: [u8; 16] = raw[1..17].try_into().expect("length checked in decode");
    Ok(Uuid::from_bytes(bytes))
}

fn decode(token: &str) -> Result<Vec<u8>, GatewayError> {
    let raw = crypto::b64url_decode(token)
        .map_err(|_| GatewayError::TokenInvalid("not base64url".into()))?;
    if raw.len() < MIN_TOKEN_LEN {
        return Err(GatewayError::TokenInvalid("token too short".into()));
    }
    if raw[0] != VERSION {
        return Err(GatewayError::TokenInvalid(format!(
            "unsupported token version {}",
            raw[0]
        )));
    }
    let author_len = raw[17 + 2] as usize;
    if raw.len() != MIN_TOKEN_LEN + author_len {
        return Err(GatewayError::TokenInvalid("length mismatch".into()));
    }
    Ok(raw)
}

fn read_claims(raw: &[u8]) -> Result<TokenClaims, GatewayError> {
    let channel_id = Uuid::from_bytes(raw[1..17].try_into().expect("fixed slice"));
    let permissions = u16::from_be_bytes([raw[17], raw[18]]);
    let author_len = raw[19] as usize;
    let author_id = std::str::from_utf8(&raw[20..20 + author_len])
        .map_err(|_| GatewayError::TokenInvalid("author id is not utf-8".into()))?
        .to_string();
    let hours_off = 20 + author_len;
    let expires_hours = u32::from_be_bytes(
        raw[hours_off..hours_off + 4]
            .try_into()
            .expect("fixed slice"),
    );
    Ok(TokenClaims {
        channel_id,
        permissions,
        author_id,
        expires_at: expires_hours as i64 * 3600,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Vec<u8> {
        crypto::random_bytes(32)
    }

    #[test]
    fn test_round_trip_preserves_claims() {
        let secret = secret();
        let channel = Uuid::new_v4();
        let (token, _) = create(
            channel,
            perms::READ | perms::APPEND,
            Some("alice"),
            3600,
            &secret,
        )
        .unwrap();

        let claims = verify(&token, &secret).unwrap();
        assert_eq!(claims.channel_id, channel);
        assert_eq!(claims.permissions, perms::READ | perms::APPEND);
        assert_eq!(claims.author_id, "alice");
        assert!(claims.has(perms::READ));
        assert!(!claims.has(perms::DELETE_ANY));
    }

    #[test]
    fn test_generated_author_id() {
        let secret = secret();
        let (token, minted) = create(Uuid::new_v4(), perms::READ, None, 3600, &secret).unwrap();
        assert_eq!(minted.author_id.len(), 4);
        // The generated author survives the round trip.
        let claims = verify(&token, &secret).unwrap();
        assert_eq!(claims.author_id, minted.author_id);
    }

    #[test]
    fn test_author_id_over_32_bytes_rejected() {
        let author = "x".repeat(33);
        let err = create(Uuid::new_v4(), perms::READ, Some(&author), 3600, &secret());
        assert!(matches!(err, Err(GatewayError::BadRequest(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let secret = secret();
        // Non-positive lifetimes round down to the previous hour boundary,
        // so even -1 yields an already-expired token.
        for expires_in in [-1, -7200] {
            let (token, _) =
                create(Uuid::new_v4(), perms::READ, None, expires_in, &secret).unwrap();
            assert!(
                matches!(verify(&token, &secret), Err(GatewayError::TokenExpired)),
                "expires_in {expires_in} was accepted"
            );
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (token, _) = create(Uuid::new_v4(), perms::READ, None, 3600, &secret()).unwrap();
        assert!(matches!(
            verify(&token, &secret()),
            Err(GatewayError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_any_bit_flip_rejected() {
        let secret = secret();
        let (token, _) = create(Uuid::new_v4(), perms::READ, Some("bob"), 3600, &secret).unwrap();
        let raw = crypto::b64url_decode(&token).unwrap();

        for byte in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[byte] ^= 0x01;
            let tampered_token = crypto::b64url_encode(&tampered);
            assert!(
                verify(&tampered_token, &secret).is_err(),
                "flip at byte {byte} was accepted"
            );
        }
    }

    #[test]
    fn test_unknown_version_rejected() {
        let secret = secret();
        let (token, _) = create(Uuid::new_v4(), perms::READ, None, 3600, &secret).unwrap();
        let mut raw = crypto::b64url_decode(&token).unwrap();
        raw[0] = 3;
        assert!(matches!(
            verify(&crypto::b64url_encode(&raw), &secret),
            Err(GatewayError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_parse_exposes_channel_id_without_secret() {
        let channel = Uuid::new_v4();
        let (token, _) = create(channel, perms::READ, None, 3600, &secret()).unwrap();
        assert_eq!(parse_channel_id(&token).unwrap(), channel);
    }

    #[test]
    fn test_permission_name_round_trip() {
        let names = vec!["read".to_string(), "delete_own".to_string()];
        let bits = permissions_from_names(&names).unwrap();
        assert_eq!(bits, perms::READ | perms::DELETE_OWN);
        assert_eq!(permission_names(bits), vec!["read", "delete_own"]);
        assert!(permissions_from_names(&["admin".to_string()]).is_err());
    }
}
