//! Domain services over the storage adapters: principal registry, namespace
//! aliases, and the KV / blob / channel subsystems.

pub mod alias;
pub mod blob;
pub mod channel;
pub mod kv;
pub mod principal;

use stratum_core::error::GatewayError;

/// Internal keyspace prefixes, excluded from all user-facing listings.
pub const INTERNAL_MARKER: &str = "__";
pub const PRINCIPAL_PREFIX: &str = "__PRINCIPAL:";
pub const BLOB_META_PREFIX: &str = "__BLOB:";
pub const CHANNEL_INDEX_PREFIX: &str = "__CHANNEL_INDEX:";
pub const CHANNEL_OWNER_PREFIX: &str = "__CHANNEL_OWNER:";
pub const NS_ALIAS_PREFIX: &str = "__NS_ALIAS:";
pub const NS_FULL_PREFIX: &str = "__NS_FULL:";
/// Auto-generated signing secret survives restarts under this key.
pub const SIGNING_SECRET_KEY: &str = "__CONFIG:signing_secret";

/// Namespaces are URI-safe and may never collide with the internal keyspace.
pub fn validate_namespace(namespace: &str) -> Result<(), GatewayError> {
    if namespace.is_empty() {
        return Err(GatewayError::BadRequest("namespace must not be empty".into()));
    }
    if namespace.starts_with(INTERNAL_MARKER) {
        return Err(GatewayError::BadRequest(
            "namespace must not start with __".into(),
        ));
    }
    if !namespace
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'))
    {
        return Err(GatewayError::BadRequest(
            "namespace contains non-URI-safe characters".into(),
        ));
    }
    Ok(())
}

pub fn validate_key(key: &str) -> Result<(), GatewayError> {
    if key.is_empty() {
        return Err(GatewayError::BadRequest("key must not be empty".into()));
    }
    Ok(())
}

/// Storage key for a namespaced entry. Keys may themselves contain colons;
/// only the first colon separates namespace from key.
pub fn join_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

pub fn split_first_colon(raw: &str) -> Option<(&str, &str)> {
    raw.split_once(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_validation() {
        assert!(validate_namespace("myapp").is_ok());
        assert!(validate_namespace("my-app_v2.beta~x").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("__internal").is_err());
        assert!(validate_namespace("has space").is_err());
        assert!(validate_namespace("has:colon").is_err());
        assert!(validate_namespace("ünïcode").is_err());
    }

    #[test]
    fn test_split_is_first_colon_only() {
        assert_eq!(
            split_first_colon("myapp:foo:bar:baz"),
            Some(("myapp", "foo:bar:baz"))
        );
        assert_eq!(split_first_colon("nocolon"), None);
    }
}
