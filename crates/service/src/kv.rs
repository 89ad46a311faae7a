//! Namespaced key-value service.
//!
//! User entries are stored as `<namespace>:<key>` on the KV adapter. Keys may
//! contain colons; the namespace/key split is always on the first colon.
//! Anything under an `__` prefix is internal and never surfaces in listings
//! or dumps.

use crate::{INTERNAL_MARKER, join_key, split_first_colon, validate_key, validate_namespace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratum_adapter::KvStore;
use stratum_core::error::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceDump {
    pub namespace: String,
    pub entries: Vec<KvEntry>,
}

/// Outcome of a bulk write: entries written before the first failure, and
/// the failure itself when one occurred. Already-written entries are not
/// rolled back.
pub struct BulkWrite {
    pub count: usize,
    pub error: Option<GatewayError>,
}

#[derive(Clone)]
pub struct KvService {
    kv: Arc<dyn KvStore>,
}

impl KvService {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, GatewayError> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        self.kv.get(&join_key(namespace, key)).await
    }

    pub async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), GatewayError> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        self.kv.put(&join_key(namespace, key), value).await
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> Result<(), GatewayError> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        self.kv.delete(&join_key(namespace, key)).await
    }

    /// All keys in a namespace, lexicographic, with the `<ns>:` prefix
    /// stripped.
    pub async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, GatewayError> {
        validate_namespace(namespace)?;
        let prefix = format!("{namespace}:");
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .kv
                .list(Some(&prefix), cursor.as_deref(), None)
                .await?;
            keys.extend(
                page.keys
                    .iter()
                    .filter_map(|k| k.strip_prefix(&prefix).map(|s| s.to_string())),
            );
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    /// All namespaces with at least one entry, sorted, internal prefixes
    /// excluded. Namespaces are not materialized — this is derived by
    /// scanning.
    pub async fn list_namespaces(&self) -> Result<Vec<String>, GatewayError> {
        let mut namespaces = std::collections::BTreeSet::new();
        self.scan_user_keys(|namespace, _| {
            namespaces.insert(namespace.to_string());
        })
        .await?;
        Ok(namespaces.into_iter().collect())
    }

    /// Missing keys are skipped silently.
    pub async fn bulk_get(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> Result<Vec<KvEntry>, GatewayError> {
        validate_namespace(namespace)?;
        let mut entries = Vec::new();
        for key in keys {
            validate_key(key)?;
            if let Some(value) = self.kv.get(&join_key(namespace, key)).await? {
                entries.push(KvEntry {
                    key: key.clone(),
                    value,
                });
            }
        }
        Ok(entries)
    }

    /// Independent puts; on failure, reports how many entries were written.
    pub async fn bulk_set(&self, namespace: &str, entries: &[KvEntry]) -> BulkWrite {
        if let Err(e) = validate_namespace(namespace) {
            return BulkWrite {
                count: 0,
                error: Some(e),
            };
        }
        let mut count = 0;
        for entry in entries {
            let result = match validate_key(&entry.key) {
                Ok(()) => {
                    self.kv
                        .put(&join_key(namespace, &entry.key), &entry.value)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => count += 1,
                Err(e) => {
                    return BulkWrite {
                        count,
                        error: Some(e),
                    };
                }
            }
        }
        BulkWrite { count, error: None }
    }

    /// Every user entry grouped by namespace, sorted by namespace.
    pub async fn dump(&self) -> Result<Vec<NamespaceDump>, GatewayError> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        self.scan_user_keys(|namespace, key| {
            grouped
                .entry(namespace.to_string())
                .or_default()
                .push(key.to_string());
        })
        .await?;

        let mut dumps = Vec::with_capacity(grouped.len());
        for (namespace, keys) in grouped {
            let mut entries = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(value) = self.kv.get(&join_key(&namespace, &key)).await? {
                    entries.push(KvEntry { key, value });
                }
            }
            dumps.push(NamespaceDump { namespace, entries });
        }
        Ok(dumps)
    }

    async fn scan_user_keys(
        &self,
        mut visit: impl FnMut(&str, &str),
    ) -> Result<(), GatewayError> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.kv.list(None, cursor.as_deref(), None).await?;
            for raw in &page.keys {
                let Some((namespace, key)) = split_first_colon(raw) else {
                    continue;
                };
                if namespace.starts_with(INTERNAL_MARKER) {
                    continue;
                }
                visit(namespace, key);
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(())
    }
}
