//! Storage adapter contracts.
//!
//! The gateway is parameterized over three backend interfaces: a string
//! key-value store, a blob store, and a per-channel event log. Two concrete
//! backends exist: [`object::ObjectStoreAdapter`] (single-process, backed by
//! any `object_store` implementation) and [`edge::EdgeAdapter`] (remote edge
//! KV/object service).

pub mod coordinator;
pub mod edge;
pub mod object;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use stratum_core::error::GatewayError;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Page size applied when a list call does not specify one.
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// One page of keys from a list scan, in lexicographic order.
#[derive(Debug, Clone, Default)]
pub struct KvPage {
    pub keys: Vec<String>,
    /// Opaque continuation cursor; absent on the final page.
    pub cursor: Option<String>,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Idempotent overwrite.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// No error if the key is absent.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(
        &self,
        prefix: Option<&str>,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<KvPage>;
}

/// A byte window into a blob, resolved against the object size by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// A blob read result. `size` is the full object size regardless of range.
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub body: Bytes,
    pub size: u64,
    pub etag: Option<String>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<BlobObject>>;

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Size of the object, or `None` if it does not exist.
    async fn head(&self, key: &str) -> Result<Option<u64>>;

    async fn list(&self, prefix: Option<&str>, cursor: Option<&str>) -> Result<KvPage>;
}

/// Channel metadata held in the per-channel state container. `secret` keys
/// the channel's capability tokens and never leaves the owner's create
/// response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMetadata {
    pub channel_id: Uuid,
    pub name: String,
    pub owner_namespace: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Deletion,
}

/// One record in a channel's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEvent {
    pub id: Uuid,
    /// Dense, strictly increasing, starts at 1. Immutable once assigned.
    pub seq: u64,
    pub author_id: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<EventKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_seq: Option<u64>,
}

impl ChannelEvent {
    pub fn is_deletion(&self) -> bool {
        self.kind == Some(EventKind::Deletion)
    }
}

#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub author_id: String,
    pub content: String,
    pub kind: Option<EventKind>,
    pub target_seq: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    pub after_seq: u64,
    pub limit: usize,
    pub include_deleted: bool,
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self {
            after_seq: 0,
            limit: 100,
            include_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReadPage {
    pub events: Vec<ChannelEvent>,
    pub has_more: bool,
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Fails if the channel id already exists.
    async fn create_channel(&self, meta: &ChannelMetadata) -> Result<()>;

    async fn get_metadata(&self, channel_id: Uuid) -> Result<Option<ChannelMetadata>>;

    /// Serializes concurrent calls for the same channel and assigns dense
    /// sequence numbers.
    async fn append(&self, channel_id: Uuid, req: AppendRequest) -> Result<ChannelEvent>;

    async fn get_event(&self, channel_id: Uuid, seq: u64) -> Result<Option<ChannelEvent>>;

    /// Events ordered by seq, filtered of deletion markers and their targets
    /// unless `include_deleted` is set.
    async fn read(&self, channel_id: Uuid, req: ReadRequest) -> Result<ReadPage>;

    /// Removes metadata and all events.
    async fn delete_channel(&self, channel_id: Uuid) -> Result<()>;
}

/// Zero-padded event sequence key component, so natural byte order equals
/// numeric order under lexicographic scans.
pub(crate) fn padded_seq(seq: u64) -> String {
    format!("{seq:012}")
}

/// Apply cursor + limit to a sorted key list.
pub(crate) fn paginate(mut keys: Vec<String>, cursor: Option<&str>, limit: usize) -> KvPage {
    keys.sort();
    let start = match cursor {
        Some(c) => keys.partition_point(|k| k.as_str() <= c),
        None => 0,
    };
    let end = (start + limit).min(keys.len());
    let cursor = if end < keys.len() {
        keys.get(end - 1).cloned()
    } else {
        None
    };
    KvPage {
        keys: keys[start..end].to_vec(),
        cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_seq_orders_lexicographically() {
        let mut keys: Vec<String> = [2u64, 100, 1, 10, 99].iter().map(|&s| padded_seq(s)).collect();
        keys.sort();
        let seqs: Vec<u64> = keys.iter().map(|k| k.parse().unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 10, 99, 100]);
    }

    #[test]
    fn test_paginate_cursor_walk() {
        let keys: Vec<String> = (0..10).map(|i| format!("k{i}")).collect();

        let page1 = paginate(keys.clone(), None, 4);
        assert_eq!(page1.keys, vec!["k0", "k1", "k2", "k3"]);
        assert_eq!(page1.cursor.as_deref(), Some("k3"));

        let page2 = paginate(keys.clone(), page1.cursor.as_deref(), 4);
        assert_eq!(page2.keys, vec!["k4", "k5", "k6", "k7"]);

        let page3 = paginate(keys.clone(), page2.cursor.as_deref(), 4);
        assert_eq!(page3.keys, vec!["k8", "k9"]);
        assert!(page3.cursor.is_none());
    }

    #[test]
    fn test_paginate_empty() {
        let page = paginate(vec![], None, 10);
        assert!(page.keys.is_empty());
        assert!(page.cursor.is_none());
    }

    #[test]
    fn test_event_serde_skips_absent_kind() {
        let event = ChannelEvent {
            id: Uuid::new_v4(),
            seq: 1,
            author_id: "a1".into(),
            content: "hello".into(),
            created_at: chrono::Utc::now(),
            kind: None,
            target_seq: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("kind"));
        assert!(!json.contains("targetSeq"));

        let marker = ChannelEvent {
            kind: Some(EventKind::Deletion),
            target_seq: Some(1),
            ..event
        };
        let json = serde_json::to_string(&marker).unwrap();
        assert!(json.contains("\"kind\":\"deletion\""));
        assert!(json.contains("\"targetSeq\":1"));
    }
}
