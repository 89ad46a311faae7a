//! Namespace aliases: short, stable base62 identifiers that stand in for a
//! full namespace in public URLs. An alias is allocated on first use and the
//! `__NS_ALIAS:` / `__NS_FULL:` pair is never replaced once written.

use crate::{NS_ALIAS_PREFIX, NS_FULL_PREFIX};
use std::sync::Arc;
use stratum_adapter::KvStore;
use stratum_core::crypto;
use stratum_core::error::GatewayError;

const ALIAS_LEN: usize = 8;

#[derive(Clone)]
pub struct AliasService {
    kv: Arc<dyn KvStore>,
}

impl AliasService {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Alias for `namespace`, allocating one on first use.
    pub async fn ensure(&self, namespace: &str) -> Result<String, GatewayError> {
        if let Some(existing) = self
            .kv
            .get(&format!("{NS_FULL_PREFIX}{namespace}"))
            .await?
        {
            return Ok(existing);
        }

        loop {
            let candidate = crypto::short_id(ALIAS_LEN);
            let alias_key = format!("{NS_ALIAS_PREFIX}{candidate}");
            if self.kv.get(&alias_key).await?.is_some() {
                continue;
            }
            self.kv.put(&alias_key, namespace).await?;
            self.kv
                .put(&format!("{NS_FULL_PREFIX}{namespace}"), &candidate)
                .await?;
            return Ok(candidate);
        }
    }

    /// Namespace for an alias, if the alias exists.
    pub async fn resolve(&self, alias: &str) -> Result<Option<String>, GatewayError> {
        self.kv.get(&format!("{NS_ALIAS_PREFIX}{alias}")).await
    }

    /// Resolve a path segment that may be an alias or a raw namespace.
    pub async fn resolve_or_namespace(&self, segment: &str) -> Result<String, GatewayError> {
        match self.resolve(segment).await? {
            Some(namespace) => Ok(namespace),
            None => Ok(segment.to_string()),
        }
    }
}
