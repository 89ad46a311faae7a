//! Principal registry.
//!
//! A principal is an identity holding an API key. The raw secret is returned
//! exactly once at creation; only its SHA-256 hex digest is persisted, so a
//! leaked KV dump does not expose usable keys. Records are keyed
//! `__PRINCIPAL:<hex-sha256>` and never mutated.

use crate::PRINCIPAL_PREFIX;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stratum_adapter::KvStore;
use stratum_core::crypto;
use stratum_core::error::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub display_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub active: bool,
    pub secret_hash: String,
}

pub struct PrincipalRegistry {
    kv: Arc<dyn KvStore>,
}

impl PrincipalRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Create a principal. The returned secret is shown once and never
    /// recoverable afterwards.
    pub async fn create(
        &self,
        display_name: &str,
    ) -> Result<(PrincipalRecord, String), GatewayError> {
        if display_name.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "display_name must not be empty".into(),
            ));
        }

        let secret = crypto::generate_secret();
        let record = PrincipalRecord {
            display_name: display_name.to_string(),
            created_at: chrono::Utc::now(),
            active: true,
            secret_hash: crypto::sha256_hex(secret.as_bytes()),
        };

        let body = serde_json::to_string(&record)
            .map_err(|e| GatewayError::AdapterFatal(format!("encode principal: {e}")))?;
        self.kv
            .put(&format!("{PRINCIPAL_PREFIX}{}", record.secret_hash), &body)
            .await?;

        Ok((record, secret))
    }

    /// All principals. Never contains a raw secret.
    pub async fn list(&self) -> Result<Vec<PrincipalRecord>, GatewayError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .kv
                .list(Some(PRINCIPAL_PREFIX), cursor.as_deref(), None)
                .await?;
            for key in &page.keys {
                if let Some(raw) = self.kv.get(key).await? {
                    let record: PrincipalRecord = serde_json::from_str(&raw).map_err(|e| {
                        GatewayError::AdapterFatal(format!("corrupt principal record: {e}"))
                    })?;
                    records.push(record);
                }
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    /// Idempotent delete by secret hash.
    pub async fn delete(&self, secret_hash: &str) -> Result<(), GatewayError> {
        self.kv
            .delete(&format!("{PRINCIPAL_PREFIX}{secret_hash}"))
            .await
    }

    /// Resolve a presented secret to its active principal.
    pub async fn resolve(&self, secret: &str) -> Result<Option<PrincipalRecord>, GatewayError> {
        let hash = crypto::sha256_hex(secret.as_bytes());
        match self.kv.get(&format!("{PRINCIPAL_PREFIX}{hash}")).await? {
            Some(raw) => {
                let record: PrincipalRecord = serde_json::from_str(&raw).map_err(|e| {
                    GatewayError::AdapterFatal(format!("corrupt principal record: {e}"))
                })?;
                Ok(record.active.then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Whether any principal exists. Gates bootstrap-key acceptance.
    pub async fn has_any(&self) -> Result<bool, GatewayError> {
        let page = self
            .kv
            .list(Some(PRINCIPAL_PREFIX), None, Some(1))
            .await?;
        Ok(!page.keys.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_adapter::object::ObjectStoreAdapter;

    fn registry() -> PrincipalRegistry {
        PrincipalRegistry::new(Arc::new(ObjectStoreAdapter::memory()))
    }

    #[tokio::test]
    async fn test_create_returns_secret_once_and_persists_hash() {
        let registry = registry();
        let (record, secret) = registry.create("Admin").await.unwrap();

        assert_eq!(secret.len(), 64);
        assert_eq!(record.secret_hash, crypto::sha256_hex(secret.as_bytes()));
        assert!(record.active);
        assert_eq!(record.display_name, "Admin");

        let listed = registry.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].secret_hash, record.secret_hash);
        // The stored JSON has no field carrying the raw secret.
        let json = serde_json::to_string(&listed[0]).unwrap();
        assert!(!json.contains(&secret));
    }

    #[tokio::test]
    async fn test_resolve_known_and_unknown() {
        let registry = registry();
        let (_, secret) = registry.create("Admin").await.unwrap();

        let resolved = registry.resolve(&secret).await.unwrap().unwrap();
        assert_eq!(resolved.display_name, "Admin");
        assert!(registry.resolve("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_revokes() {
        let registry = registry();
        let (record, secret) = registry.create("Admin").await.unwrap();
        assert!(registry.has_any().await.unwrap());

        registry.delete(&record.secret_hash).await.unwrap();
        assert!(registry.resolve(&secret).await.unwrap().is_none());
        assert!(!registry.has_any().await.unwrap());
        // Second delete of the same hash is a no-op.
        registry.delete(&record.secret_hash).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_display_name_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.create("  ").await,
            Err(GatewayError::BadRequest(_))
        ));
    }
}
