//! Crypto primitives shared across the gateway: secret generation, hashing,
//! MAC computation with constant-time verification, and the base62/base64url
//! codecs used for short IDs and token envelopes.

use crate::error::GatewayError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a fresh API-key secret: 32 cryptographically random bytes as hex.
pub fn generate_secret() -> String {
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Generate `n` cryptographically random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Hex-encoded SHA-256 digest. API-key lookup is by `sha256_hex(secret)`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// HMAC-SHA-256 over `data` with the given key.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Constant-time equality over the full expected length.
///
/// Length mismatch fails immediately; equal-length inputs are compared
/// byte-by-byte without early exit.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Random identifier of `len` base62 characters.
pub fn short_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = (rng.next_u32() as usize) % BASE62_ALPHABET.len();
            BASE62_ALPHABET[idx] as char
        })
        .collect()
}

/// Base62-encode an arbitrary byte string. Leading zero bytes are preserved
/// as leading `'0'` characters, so the codec round-trips any input.
pub fn base62_encode(data: &[u8]) -> String {
    let zeros = data.iter().take_while(|&&b| b == 0).count();

    // Repeated div-mod of the big-endian integer by 62.
    let mut digits: Vec<u8> = Vec::new();
    let mut num: Vec<u8> = data[zeros..].to_vec();
    while !num.is_empty() {
        let mut remainder: u32 = 0;
        let mut quotient: Vec<u8> = Vec::with_capacity(num.len());
        for &byte in &num {
            let acc = (remainder << 8) | byte as u32;
            let q = (acc / 62) as u8;
            remainder = acc % 62;
            if !quotient.is_empty() || q != 0 {
                quotient.push(q);
            }
        }
        digits.push(remainder as u8);
        num = quotient;
    }

    let mut out = String::with_capacity(zeros + digits.len());
    for _ in 0..zeros {
        out.push('0');
    }
    for &d in digits.iter().rev() {
        out.push(BASE62_ALPHABET[d as usize] as char);
    }
    out
}

/// Decode a base62 string produced by [`base62_encode`].
pub fn base62_decode(s: &str) -> Result<Vec<u8>, GatewayError> {
    let zeros = s.bytes().take_while(|&b| b == b'0').count();

    let mut num: Vec<u8> = Vec::new();
    for c in s.bytes().skip(zeros) {
        let digit = BASE62_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| GatewayError::BadRequest(format!("invalid base62 character: {}", c as char)))?
            as u32;

        // num = num * 62 + digit
        let mut carry = digit;
        for byte in num.iter_mut().rev() {
            let acc = *byte as u32 * 62 + carry;
            *byte = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        while carry > 0 {
            num.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend_from_slice(&num);
    Ok(out)
}

/// Base64url without padding — the transport encoding for token envelopes.
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(s: &str) -> Result<Vec<u8>, GatewayError> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| GatewayError::BadRequest(format!("invalid base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_is_64_hex() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hmac_verifies_and_rejects_bit_flips() {
        let key = b"0123456789abcdef0123456789abcdef";
        let mac = hmac_sha256(key, b"payload");
        assert!(ct_eq(&mac, &hmac_sha256(key, b"payload")));

        for bit in 0..8 {
            let mut tampered = mac;
            tampered[0] ^= 1 << bit;
            assert!(!ct_eq(&mac, &tampered));
        }
    }

    #[test]
    fn test_ct_eq_length_mismatch() {
        assert!(!ct_eq(b"abcd", b"abc"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn test_base62_round_trip() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0, 0, 0],
            vec![0, 0, 1],
            vec![255],
            vec![255; 16],
            b"hello world".to_vec(),
            (0..=255).collect(),
        ];
        for case in cases {
            let encoded = base62_encode(&case);
            assert!(encoded.bytes().all(|b| BASE62_ALPHABET.contains(&b)));
            assert_eq!(base62_decode(&encoded).unwrap(), case, "case {case:?}");
        }
    }

    #[test]
    fn test_base62_rejects_invalid_characters() {
        assert!(base62_decode("abc!").is_err());
        assert!(base62_decode("-").is_err());
    }

    #[test]
    fn test_short_id_alphabet_and_length() {
        let id = short_id(4);
        assert_eq!(id.len(), 4);
        assert!(id.bytes().all(|b| BASE62_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_b64url_round_trip() {
        let data = random_bytes(33);
        let encoded = b64url_encode(&data);
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), data);
    }
}
