//! Remote edge storage adapter.
//!
//! Talks to an edge-hosted KV/object service over a small REST surface:
//!
//! ```text
//! GET/PUT/DELETE {endpoint}/kv/{urlencoded-key}            value bytes
//! GET            {endpoint}/kv?prefix=&cursor=&limit=      {"keys":[…],"cursor":…}
//! GET/PUT/DELETE {endpoint}/objects/{bucket}/{urlencoded-key}
//! HEAD           {endpoint}/objects/{bucket}/{urlencoded-key}
//! GET            {endpoint}/objects/{bucket}?prefix=&cursor=
//! ```
//!
//! All calls carry `Authorization: Bearer <token>`. Channel records live in
//! the edge KV under the internal `__channel:` prefix; appends are routed
//! through a per-channel coordinator task so sequence assignment stays
//! serialized even though the remote store itself is plain KV.

use crate::coordinator::ChannelSerializer;
use crate::{
    AppendRequest, BlobObject, BlobStore, ByteRange, ChannelEvent, ChannelMetadata, ChannelStore,
    DEFAULT_LIST_LIMIT, EventKind, KvPage, KvStore, ReadPage, ReadRequest, Result, padded_seq,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use stratum_core::error::GatewayError;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ListResponse {
    keys: Vec<String>,
    #[serde(default)]
    cursor: Option<String>,
}

/// Cloneable handle shared with coordinator jobs.
#[derive(Clone)]
struct EdgeClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    bucket: String,
}

impl EdgeClient {
    fn kv_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.endpoint, urlencoding::encode(key))
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/objects/{}/{}",
            self.endpoint,
            self.bucket,
            urlencoding::encode(key)
        )
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let resp = self
            .http
            .get(self.kv_url(key))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(map_transport_err)?;
        match check_status(resp)? {
            Some(resp) => {
                let body = resp.text().await.map_err(map_transport_err)?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        let resp = self
            .http
            .put(self.kv_url(key))
            .bearer_auth(&self.token)
            .body(value.to_string())
            .send()
            .await
            .map_err(map_transport_err)?;
        check_status(resp)?
            .ok_or_else(|| GatewayError::AdapterFatal("edge kv put returned 404".into()))?;
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.kv_url(key))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(map_transport_err)?;
        check_status(resp)?;
        Ok(())
    }

    async fn kv_list(
        &self,
        prefix: Option<&str>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<KvPage> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(p) = prefix {
            query.push(("prefix", p.to_string()));
        }
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        let resp = self
            .http
            .get(format!("{}/kv", self.endpoint))
            .query(&query)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(map_transport_err)?;
        let resp = check_status(resp)?
            .ok_or_else(|| GatewayError::AdapterFatal("edge kv list returned 404".into()))?;
        let mut listing: ListResponse = resp.json().await.map_err(map_transport_err)?;
        listing.keys.sort();
        Ok(KvPage {
            keys: listing.keys,
            cursor: listing.cursor,
        })
    }
}

fn map_transport_err(e: reqwest::Error) -> GatewayError {
    tracing::warn!(error = %e, "edge storage transport error");
    if e.is_timeout() || e.is_connect() {
        GatewayError::AdapterTransient(format!("edge storage unreachable: {e}"))
    } else {
        GatewayError::AdapterTransient(format!("edge storage request failed: {e}"))
    }
}

/// 404 → `None`; 5xx → transient; other 4xx → fatal.
fn check_status(resp: reqwest::Response) -> Result<Option<reqwest::Response>> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if status.is_server_error() {
        return Err(GatewayError::AdapterTransient(format!(
            "edge storage returned {status}"
        )));
    }
    if !status.is_success() {
        return Err(GatewayError::AdapterFatal(format!(
            "edge storage returned {status}"
        )));
    }
    Ok(Some(resp))
}

pub struct EdgeAdapter {
    client: EdgeClient,
    serializer: ChannelSerializer,
}

impl EdgeAdapter {
    pub fn new(endpoint: &str, token: &str, bucket: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::AdapterFatal(format!("build edge client: {e}")))?;
        Ok(Self {
            client: EdgeClient {
                http,
                endpoint: endpoint.trim_end_matches('/').to_string(),
                token: token.to_string(),
                bucket: bucket.to_string(),
            },
            serializer: ChannelSerializer::new(),
        })
    }

    fn channel_key(channel_id: Uuid, rest: &str) -> String {
        format!("__channel:{channel_id}:{rest}")
    }

    async fn read_record<T: serde::de::DeserializeOwned>(
        client: &EdgeClient,
        key: &str,
    ) -> Result<Option<T>> {
        match client.kv_get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| GatewayError::AdapterFatal(format!("corrupt channel record: {e}"))),
            None => Ok(None),
        }
    }

    async fn read_seq(client: &EdgeClient, channel_id: Uuid) -> Result<u64> {
        match client.kv_get(&Self::channel_key(channel_id, "seq")).await? {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| GatewayError::AdapterFatal("corrupt seq record".into())),
            None => Ok(0),
        }
    }

    async fn read_deleted(client: &EdgeClient, channel_id: Uuid) -> Result<HashSet<u64>> {
        Ok(
            Self::read_record::<Vec<u64>>(client, &Self::channel_key(channel_id, "deleted"))
                .await?
                .map(|v| v.into_iter().collect())
                .unwrap_or_default(),
        )
    }

    async fn read_event_at(
        client: &EdgeClient,
        channel_id: Uuid,
        seq: u64,
    ) -> Result<Option<ChannelEvent>> {
        Self::read_record(
            client,
            &Self::channel_key(channel_id, &format!("event:{}", padded_seq(seq))),
        )
        .await
    }
}

#[async_trait]
impl KvStore for EdgeAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client.kv_get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.client.kv_put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client.kv_delete(key).await
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<KvPage> {
        self.client
            .kv_list(prefix, cursor, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await
    }
}

#[async_trait]
impl BlobStore for EdgeAdapter {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<BlobObject>> {
        let mut req = self
            .client
            .http
            .get(self.client.object_url(key))
            .bearer_auth(&self.client.token);
        if let Some(r) = range {
            req = req.header(
                "range",
                format!("bytes={}-{}", r.offset, r.offset + r.length - 1),
            );
        }
        let resp = req.send().await.map_err(map_transport_err)?;
        let Some(resp) = check_status(resp)? else {
            return Ok(None);
        };

        // Total size: Content-Range on 206, Content-Length otherwise.
        let size = match resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|total| total.parse::<u64>().ok())
        {
            Some(total) => total,
            None => resp.content_length().unwrap_or(0),
        };
        let etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.bytes().await.map_err(map_transport_err)?;
        Ok(Some(BlobObject { body, size, etag }))
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        let resp = self
            .client
            .http
            .put(self.client.object_url(key))
            .bearer_auth(&self.client.token)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .map_err(map_transport_err)?;
        check_status(resp)?
            .ok_or_else(|| GatewayError::AdapterFatal("edge object put returned 404".into()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .client
            .http
            .delete(self.client.object_url(key))
            .bearer_auth(&self.client.token)
            .send()
            .await
            .map_err(map_transport_err)?;
        check_status(resp)?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        let resp = self
            .client
            .http
            .head(self.client.object_url(key))
            .bearer_auth(&self.client.token)
            .send()
            .await
            .map_err(map_transport_err)?;
        match check_status(resp)? {
            Some(resp) => Ok(Some(resp.content_length().unwrap_or(0))),
            None => Ok(None),
        }
    }

    async fn list(&self, prefix: Option<&str>, cursor: Option<&str>) -> Result<KvPage> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(p) = prefix {
            query.push(("prefix", p.to_string()));
        }
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        let resp = self
            .client
            .http
            .get(format!("{}/objects/{}", self.client.endpoint, self.client.bucket))
            .query(&query)
            .bearer_auth(&self.client.token)
            .send()
            .await
            .map_err(map_transport_err)?;
        let resp = check_status(resp)?
            .ok_or_else(|| GatewayError::AdapterFatal("edge object list returned 404".into()))?;
        let mut listing: ListResponse = resp.json().await.map_err(map_transport_err)?;
        listing.keys.sort();
        Ok(KvPage {
            keys: listing.keys,
            cursor: listing.cursor,
        })
    }
}

#[async_trait]
impl ChannelStore for EdgeAdapter {
    async fn create_channel(&self, meta: &ChannelMetadata) -> Result<()> {
        let client = self.client.clone();
        let meta = meta.clone();
        self.serializer
            .run(meta.channel_id, async move {
                let key = Self::channel_key(meta.channel_id, "meta");
                if client.kv_get(&key).await?.is_some() {
                    return Err(GatewayError::BadRequest("channel already exists".into()));
                }
                let body = serde_json::to_string(&meta)
                    .map_err(|e| GatewayError::AdapterFatal(format!("encode channel meta: {e}")))?;
                client.kv_put(&key, &body).await
            })
            .await?
    }

    async fn get_metadata(&self, channel_id: Uuid) -> Result<Option<ChannelMetadata>> {
        Self::read_record(&self.client, &Self::channel_key(channel_id, "meta")).await
    }

    async fn append(&self, channel_id: Uuid, req: AppendRequest) -> Result<ChannelEvent> {
        let client = self.client.clone();
        self.serializer
            .run(channel_id, async move {
                if client
                    .kv_get(&Self::channel_key(channel_id, "meta"))
                    .await?
                    .is_none()
                {
                    return Err(GatewayError::NotFound("channel".into()));
                }

                let seq = Self::read_seq(&client, channel_id).await? + 1;
                let event = ChannelEvent {
                    id: Uuid::new_v4(),
                    seq,
                    author_id: req.author_id,
                    content: req.content,
                    created_at: chrono::Utc::now(),
                    kind: req.kind,
                    target_seq: req.target_seq,
                };

                let body = serde_json::to_string(&event)
                    .map_err(|e| GatewayError::AdapterFatal(format!("encode event: {e}")))?;
                client
                    .kv_put(
                        &Self::channel_key(channel_id, &format!("event:{}", padded_seq(seq))),
                        &body,
                    )
                    .await?;

                if event.kind == Some(EventKind::Deletion)
                    && let Some(target) = event.target_seq
                {
                    let mut deleted = Self::read_deleted(&client, channel_id).await?;
                    deleted.insert(target);
                    let mut sorted: Vec<u64> = deleted.into_iter().collect();
                    sorted.sort_unstable();
                    let body = serde_json::to_string(&sorted).map_err(|e| {
                        GatewayError::AdapterFatal(format!("encode deleted set: {e}"))
                    })?;
                    client
                        .kv_put(&Self::channel_key(channel_id, "deleted"), &body)
                        .await?;
                }

                client
                    .kv_put(&Self::channel_key(channel_id, "seq"), &seq.to_string())
                    .await?;
                Ok(event)
            })
            .await?
    }

    async fn get_event(&self, channel_id: Uuid, seq: u64) -> Result<Option<ChannelEvent>> {
        Self::read_event_at(&self.client, channel_id, seq).await
    }

    async fn read(&self, channel_id: Uuid, req: ReadRequest) -> Result<ReadPage> {
        if self.get_metadata(channel_id).await?.is_none() {
            return Err(GatewayError::NotFound("channel".into()));
        }

        let last_seq = Self::read_seq(&self.client, channel_id).await?;
        let deleted = if req.include_deleted {
            HashSet::new()
        } else {
            Self::read_deleted(&self.client, channel_id).await?
        };

        let mut events = Vec::new();
        let mut has_more = false;
        let mut seq = req.after_seq;
        while seq < last_seq {
            seq += 1;
            let Some(event) = Self::read_event_at(&self.client, channel_id, seq).await? else {
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
        let client = self.client.clone();
        self.serializer
            .run(channel_id, async move {
                let prefix = Self::channel_key(channel_id, "");
                loop {
                    let page = client.kv_list(Some(&prefix), None, DEFAULT_LIST_LIMIT).await?;
                    if page.keys.is_empty() {
                        break;
                    }
                    for key in &page.keys {
                        client.kv_delete(key).await?;
                    }
                    if page.cursor.is_none() {
                        break;
                    }
                }
                Ok::<(), GatewayError>(())
            })
            .await??;
        self.serializer.retire(channel_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let adapter = EdgeAdapter::new("https://edge.example.com/", "tok", "stratum").unwrap();
        assert_eq!(
            adapter.client.kv_url("myapp:foo"),
            "https://edge.example.com/kv/myapp%3Afoo"
        );
    }

    #[test]
    fn test_object_url_encodes_key() {
        let adapter = EdgeAdapter::new("https://edge.example.com", "tok", "bkt").unwrap();
        assert_eq!(
            adapter.client.object_url("ns:a b.png"),
            "https://edge.example.com/objects/bkt/ns%3Aa%20b.png"
        );
    }

    #[test]
    fn test_channel_keys_use_internal_prefix() {
        let id = Uuid::nil();
        assert_eq!(
            EdgeAdapter::channel_key(id, "seq"),
            format!("__channel:{id}:seq")
        );
        assert!(EdgeAdapter::channel_key(id, "event:000000000001").starts_with("__channel:"));
    }
}
