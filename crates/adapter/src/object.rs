//! Single-process adapter over any [`object_store`] backend.
//!
//! `InMemory` serves the `memory` storage mode (tests, demos);
//! `LocalFileSystem` serves the `local` mode. KV entries, blob bytes, and
//! channel records all live in one object keyspace:
//!
//! ```text
//! kv/<hex-key>                         KV value bytes
//! blob/<hex-key>                       blob bytes
//! channel/<uuid>/meta                  channel metadata JSON
//! channel/<uuid>/seq                   last assigned sequence number
//! channel/<uuid>/deleted               JSON array of tombstoned seqs
//! channel/<uuid>/event/<padded-seq>    event JSON
//! ```
//!
//! Keys are hex-encoded: the encoding is per-byte and order-preserving, so
//! prefix scans and lexicographic ordering on encoded paths match the raw
//! keyspace. Appends for one channel are serialized with a per-channel
//! mutex.

use crate::{
    AppendRequest, BlobObject, BlobStore, ByteRange, ChannelEvent, ChannelMetadata, ChannelStore,
    DEFAULT_LIST_LIMIT, EventKind, KvPage, KvStore, ReadPage, ReadRequest, Result, padded_seq,
    paginate,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{GetOptions, GetRange, ObjectStore, PutPayload};
use std::collections::HashSet;
use std::sync::Arc;
use stratum_core::error::GatewayError;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct ObjectStoreAdapter {
    store: Arc<dyn ObjectStore>,
    channel_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ObjectStoreAdapter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            channel_locks: DashMap::new(),
        }
    }

    /// In-process volatile storage.
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Filesystem-backed storage rooted at `data_dir`.
    pub fn local(data_dir: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| GatewayError::AdapterFatal(format!("create data dir: {e}")))?;
        let fs = LocalFileSystem::new_with_prefix(data_dir)
            .map_err(|e| GatewayError::AdapterFatal(format!("open data dir: {e}")))?;
        Ok(Self::new(Arc::new(fs)))
    }

    fn channel_lock(&self, channel_id: Uuid) -> Arc<Mutex<()>> {
        self.channel_locks
            .entry(channel_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_bytes(&self, path: &Path) -> Result<Option<Bytes>> {
        match self.store.get(path).await {
            Ok(result) => {
                let bytes = result.bytes().await.map_err(map_store_err)?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_store_err(e)),
        }
    }

    async fn write_bytes(&self, path: &Path, body: Bytes) -> Result<()> {
        self.store
            .put(path, PutPayload::from(body))
            .await
            .map(|_| ())
            .map_err(map_store_err)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match self.store.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_store_err(e)),
        }
    }

    /// All raw keys under a raw-key prefix, decoded and sorted.
    async fn scan_keys(&self, root: &str, raw_prefix: Option<&str>) -> Result<Vec<String>> {
        let listing: Vec<object_store::ObjectMeta> = self
            .store
            .list(Some(&Path::from(root)))
            .try_collect()
            .await
            .map_err(map_store_err)?;

        let strip = format!("{root}/");
        let mut keys = Vec::new();
        for meta in listing {
            let location = meta.location.to_string();
            let Some(encoded) = location.strip_prefix(&strip) else {
                continue;
            };
            if let Some(key) = decode_key(encoded)
                && raw_prefix.is_none_or(|p| key.starts_with(p))
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn read_seq(&self, channel_id: Uuid) -> Result<u64> {
        let path = channel_path(channel_id, "seq");
        match self.read_bytes(&path).await? {
            Some(bytes) => String::from_utf8_lossy(&bytes)
                .trim()
                .parse()
                .map_err(|_| GatewayError::AdapterFatal("corrupt seq record".into())),
            None => Ok(0),
        }
    }

    async fn read_deleted(&self, channel_id: Uuid) -> Result<HashSet<u64>> {
        let path = channel_path(channel_id, "deleted");
        match self.read_bytes(&path).await? {
            Some(bytes) => serde_json::from_slice::<Vec<u64>>(&bytes)
                .map(|v| v.into_iter().collect())
                .map_err(|e| GatewayError::AdapterFatal(format!("corrupt deleted record: {e}"))),
            None => Ok(HashSet::new()),
        }
    }

    async fn read_event(&self, channel_id: Uuid, seq: u64) -> Result<Option<ChannelEvent>> {
        let path = channel_path(channel_id, &format!("event/{}", padded_seq(seq)));
        match self.read_bytes(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| GatewayError::AdapterFatal(format!("corrupt event record: {e}"))),
            None => Ok(None),
        }
    }
}

fn encode_key(key: &str) -> String {
    hex::encode(key)
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = hex::decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

fn kv_path(key: &str) -> Path {
    Path::from(format!("kv/{}", encode_key(key)))
}

fn blob_path(key: &str) -> Path {
    Path::from(format!("blob/{}", encode_key(key)))
}

fn channel_path(channel_id: Uuid, rest: &str) -> Path {
    Path::from(format!("channel/{channel_id}/{rest}"))
}

fn map_store_err(e: object_store::Error) -> GatewayError {
    match e {
        object_store::Error::NotFound { .. } => GatewayError::NotFound("object".into()),
        other => GatewayError::AdapterFatal(other.to_string()),
    }
}

#[async_trait]
impl KvStore for ObjectStoreAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.read_bytes(&kv_path(key)).await? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| GatewayError::AdapterFatal("kv value is not utf-8".into())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.write_bytes(&kv_path(key), Bytes::from(value.to_string()))
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove(&kv_path(key)).await
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<KvPage> {
        let keys = self.scan_keys("kv", prefix).await?;
        Ok(paginate(keys, cursor, limit.unwrap_or(DEFAULT_LIST_LIMIT)))
    }
}

#[async_trait]
impl BlobStore for ObjectStoreAdapter {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<BlobObject>> {
        let path = blob_path(key);
        let options = GetOptions {
            range: range.map(|r| GetRange::Bounded(r.offset..r.offset + r.length)),
            ..Default::default()
        };
        match self.store.get_opts(&path, options).await {
            Ok(result) => {
                let size = result.meta.size;
                let etag = result.meta.e_tag.clone();
                let body = result.bytes().await.map_err(map_store_err)?;
                Ok(Some(BlobObject { body, size, etag }))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_store_err(e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<()> {
        // Content type is served from the metadata record; the object store
        // only holds bytes.
        self.write_bytes(&blob_path(key), body).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove(&blob_path(key)).await
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        match self.store.head(&blob_path(key)).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_store_err(e)),
        }
    }

    async fn list(&self, prefix: Option<&str>, cursor: Option<&str>) -> Result<KvPage> {
        let keys = self.scan_keys("blob", prefix).await?;
        Ok(paginate(keys, cursor, DEFAULT_LIST_LIMIT))
    }
}

#[async_trait]
impl ChannelStore for ObjectStoreAdapter {
    async fn create_channel(&self, meta: &ChannelMetadata) -> Result<()> {
        let lock = self.channel_lock(meta.channel_id);
        let _guard = lock.lock().await;

        let path = channel_path(meta.channel_id, "meta");
        if self.read_bytes(&path).await?.is_some() {
            return Err(GatewayError::BadRequest("channel already exists".into()));
        }
        let body = serde_json::to_vec(meta)
            .map_err(|e| GatewayError::AdapterFatal(format!("encode channel meta: {e}")))?;
        self.write_bytes(&path, Bytes::from(body)).await
    }

    async fn get_metadata(&self, channel_id: Uuid) -> Result<Option<ChannelMetadata>> {
        match self.read_bytes(&channel_path(channel_id, "meta")).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| GatewayError::AdapterFatal(format!("corrupt channel meta: {e}"))),
            None => Ok(None),
        }
    }

    async fn append(&self, channel_id: Uuid, req: AppendRequest) -> Result<ChannelEvent> {
        let lock = self.channel_lock(channel_id);
        let _guard = lock.lock().await;

        if self.read_bytes(&channel_path(channel_id, "meta")).await?.is_none() {
            return Err(GatewayError::NotFound("channel".into()));
        }

        let last_seq = self.read_seq(channel_id).await?;
        let seq = last_seq + 1;
        let event = ChannelEvent {
            id: Uuid::new_v4(),
            seq,
            author_id: req.author_id,
            content: req.content,
            created_at: chrono::Utc::now(),
            kind: req.kind,
            target_seq: req.target_seq,
        };

        let body = serde_json::to_vec(&event)
            .map_err(|e| GatewayError::AdapterFatal(format!("encode event: {e}")))?;
        // Event first, then the tombstone index, then the seq pointer: a
        // crash mid-append leaves the pointer behind and the next append
        // overwrites the orphan.
        self.write_bytes(
            &channel_path(channel_id, &format!("event/{}", padded_seq(seq))),
            Bytes::from(body),
        )
        .await?;

        if event.kind == Some(EventKind::Deletion)
            && let Some(target) = event.target_seq
        {
            let mut deleted = self.read_deleted(channel_id).await?;
            deleted.insert(target);
            let mut sorted: Vec<u64> = deleted.into_iter().collect();
            sorted.sort_unstable();
            let body = serde_json::to_vec(&sorted)
                .map_err(|e| GatewayError::AdapterFatal(format!("encode deleted set: {e}")))?;
            self.write_bytes(&channel_path(channel_id, "deleted"), Bytes::from(body))
                .await?;
        }

        self.write_bytes(
            &channel_path(channel_id, "seq"),
            Bytes::from(seq.to_string()),
        )
        .await?;

        Ok(event)
    }

    async fn get_event(&self, channel_id: Uuid, seq: u64) -> Result<Option<ChannelEvent>> {
        self.read_event(channel_id, seq).await
    }

    async fn read(&self, channel_id: Uuid, req: ReadRequest) -> Result<ReadPage> {
        if self.read_bytes(&channel_path(channel_id, "meta")).await?.is_none() {
            return Err(GatewayError::NotFound("channel".into()));
        }

        let last_seq = self.read_seq(channel_id).await?;
        let deleted = if req.include_deleted {
            HashSet::new()
        } else {
            self.read_deleted(channel_id).await?
        };

        let mut events = Vec::new();
        let mut has_more = false;
        let mut seq = req.after_seq;
        while seq < last_seq {
            seq += 1;
            let Some(event) = self.read_event(channel_id, seq).await? else {
                continue;
            };
            if !req.include_deleted && (event.is_deletion() || deleted.contains(&event.seq)) {
                continue;
            }
            if events.len() == req.limit {
                has_more = true;
                break;
            }
            events.push(event);
        }
        Ok(ReadPage { events, has_more })
    }

    async fn delete_channel(&self, channel_id: Uuid) -> Result<()> {
        let lock = self.channel_lock(channel_id);
        {
            let _guard = lock.lock().await;
            let prefix = Path::from(format!("channel/{channel_id}"));
            let listing: Vec<object_store::ObjectMeta> = self
                .store
                .list(Some(&prefix))
                .try_collect()
                .await
                .map_err(map_store_err)?;
            for meta in listing {
                self.remove(&meta.location).await?;
            }
        }
        self.channel_locks.remove(&channel_id);
        Ok(())
    }
}
