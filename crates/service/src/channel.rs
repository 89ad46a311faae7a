//! Channel service: append-only event logs with capability-token sharing.
//!
//! The adapter owns the per-channel state container (metadata, seq pointer,
//! events) and serializes appends. This layer adds ownership checks, index
//! records for listing, token issuance, and permission enforcement on the
//! token-routed operations.

use crate::{CHANNEL_INDEX_PREFIX, CHANNEL_OWNER_PREFIX, validate_namespace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stratum_adapter::{
    AppendRequest, ChannelEvent, ChannelMetadata, ChannelStore, EventKind, KvStore, ReadPage,
    ReadRequest,
};
use stratum_core::error::GatewayError;
use stratum_core::crypto;
use stratum_core::token::{self, TokenClaims, perms};
use uuid::Uuid;

const MAX_READ_LIMIT: usize = 1000;

/// Index record for channel listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexRecord {
    name: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub channel_id: Uuid,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub channel_id: Uuid,
    pub author_id: String,
    pub permissions: Vec<&'static str>,
    pub expires_at: i64,
}

pub struct ChannelService {
    kv: Arc<dyn KvStore>,
    channels: Arc<dyn ChannelStore>,
    default_token_ttl: u64,
}

impl ChannelService {
    pub fn new(kv: Arc<dyn KvStore>, channels: Arc<dyn ChannelStore>, default_token_ttl: u64) -> Self {
        Self {
            kv,
            channels,
            default_token_ttl,
        }
    }

    fn index_key(namespace: &str, channel_id: Uuid) -> String {
        format!("{CHANNEL_INDEX_PREFIX}{namespace}:{channel_id}")
    }

    fn owner_key(channel_id: Uuid) -> String {
        format!("{CHANNEL_OWNER_PREFIX}{channel_id}")
    }

    async fn require_owner(&self, namespace: &str, channel_id: Uuid) -> Result<(), GatewayError> {
        match self.kv.get(&Self::owner_key(channel_id)).await? {
            None => Err(GatewayError::NotFound("channel".into())),
            Some(owner) if owner == namespace => Ok(()),
            Some(_) => Err(GatewayError::PermissionDenied(
                "not the channel owner".into(),
            )),
        }
    }

    /// Create a channel owned by `namespace`. The per-channel secret is
    /// exposed only here.
    pub async fn create(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ChannelMetadata, GatewayError> {
        validate_namespace(namespace)?;
        if name.trim().is_empty() {
            return Err(GatewayError::BadRequest("name must not be empty".into()));
        }

        let metadata = ChannelMetadata {
            channel_id: Uuid::new_v4(),
            name: name.to_string(),
            owner_namespace: namespace.to_string(),
            created_at: chrono::Utc::now(),
            secret: hex::encode(crypto::random_bytes(32)),
        };
        self.channels.create_channel(&metadata).await?;

        let index = IndexRecord {
            name: metadata.name.clone(),
            created_at: metadata.created_at,
        };
        let body = serde_json::to_string(&index)
            .map_err(|e| GatewayError::AdapterFatal(format!("encode channel index: {e}")))?;
        self.kv
            .put(&Self::index_key(namespace, metadata.channel_id), &body)
            .await?;
        self.kv
            .put(&Self::owner_key(metadata.channel_id), namespace)
            .await?;

        Ok(metadata)
    }

    /// Channels owned by a namespace, from the index records.
    pub async fn list(&self, namespace: &str) -> Result<Vec<ChannelSummary>, GatewayError> {
        validate_namespace(namespace)?;
        let prefix = format!("{CHANNEL_INDEX_PREFIX}{namespace}:");

        let mut summaries = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.kv.list(Some(&prefix), cursor.as_deref(), None).await?;
            for key in &page.keys {
                let Some(id_raw) = key.strip_prefix(&prefix) else {
                    continue;
                };
                let Ok(channel_id) = Uuid::parse_str(id_raw) else {
                    continue;
                };
                if let Some(raw) = self.kv.get(key).await? {
                    let index: IndexRecord = serde_json::from_str(&raw).map_err(|e| {
                        GatewayError::AdapterFatal(format!("corrupt channel index: {e}"))
                    })?;
                    summaries.push(ChannelSummary {
                        channel_id,
                        name: index.name,
                        created_at: index.created_at,
                    });
                }
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(summaries)
    }

    /// Owner-only: remove metadata, index records, and all events.
    pub async fn delete(&self, namespace: &str, channel_id: Uuid) -> Result<(), GatewayError> {
        validate_namespace(namespace)?;
        self.require_owner(namespace, channel_id).await?;

        self.channels.delete_channel(channel_id).await?;
        self.kv
            .delete(&Self::index_key(namespace, channel_id))
            .await?;
        self.kv.delete(&Self::owner_key(channel_id)).await?;
        Ok(())
    }

    /// Owner-only: mint a capability token scoped to one channel.
    pub async fn create_token(
        &self,
        namespace: &str,
        channel_id: Uuid,
        permission_names: &[String],
        author_id: Option<&str>,
        expires_in_secs: Option<i64>,
    ) -> Result<IssuedToken, GatewayError> {
        validate_namespace(namespace)?;
        self.require_owner(namespace, channel_id).await?;

        let metadata = self
            .channels
            .get_metadata(channel_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound("channel".into()))?;
        let secret = decode_secret(&metadata.secret)?;

        let permissions = token::permissions_from_names(permission_names)?;
        let ttl = expires_in_secs.unwrap_or(self.default_token_ttl as i64);
        let (encoded, claims) =
            token::create(channel_id, permissions, author_id, ttl, &secret)?;

        Ok(IssuedToken {
            token: encoded,
            channel_id,
            author_id: claims.author_id,
            permissions: token::permission_names(claims.permissions),
            expires_at: claims.expires_at,
        })
    }

    /// Locate the channel named by a token and verify the token against its
    /// secret.
    pub async fn authorize(&self, encoded: &str) -> Result<TokenClaims, GatewayError> {
        let channel_id = token::parse_channel_id(encoded)?;
        let metadata = self
            .channels
            .get_metadata(channel_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound("channel".into()))?;
        let secret = decode_secret(&metadata.secret)?;
        token::verify(encoded, &secret)
    }

    /// Token-routed append; the author is always the token's.
    pub async fn append(
        &self,
        claims: &TokenClaims,
        content: String,
    ) -> Result<ChannelEvent, GatewayError> {
        if !claims.has(perms::APPEND) {
            return Err(GatewayError::PermissionDenied("append not granted".into()));
        }
        self.channels
            .append(
                claims.channel_id,
                AppendRequest {
                    author_id: claims.author_id.clone(),
                    content,
                    kind: None,
                    target_seq: None,
                },
            )
            .await
    }

    /// Token-routed sequential read.
    pub async fn read(
        &self,
        claims: &TokenClaims,
        after_seq: u64,
        limit: Option<usize>,
        include_deleted: bool,
    ) -> Result<ReadPage, GatewayError> {
        if !claims.has(perms::READ) {
            return Err(GatewayError::PermissionDenied("read not granted".into()));
        }
        if include_deleted && !claims.has(perms::READ_DELETED) {
            return Err(GatewayError::PermissionDenied(
                "read_deleted not granted".into(),
            ));
        }
        let limit = limit.unwrap_or(100).clamp(1, MAX_READ_LIMIT);
        self.channels
            .read(
                claims.channel_id,
                ReadRequest {
                    after_seq,
                    limit,
                    include_deleted,
                },
            )
            .await
    }

    /// Append a deletion marker for `target_seq`. Requires `delete_any`, or
    /// `delete_own` on an event the token's author wrote.
    pub async fn delete_event(
        &self,
        claims: &TokenClaims,
        target_seq: u64,
    ) -> Result<ChannelEvent, GatewayError> {
        let target = self
            .channels
            .get_event(claims.channel_id, target_seq)
            .await?
            .ok_or_else(|| GatewayError::NotFound("event".into()))?;

        let allowed = claims.has(perms::DELETE_ANY)
            || (claims.has(perms::DELETE_OWN) && target.author_id == claims.author_id);
        if !allowed {
            return Err(GatewayError::PermissionDenied(
                "delete not granted for this event".into(),
            ));
        }
        if target.is_deletion() {
            return Err(GatewayError::BadRequest(
                "cannot delete a deletion marker".into(),
            ));
        }

        self.channels
            .append(
                claims.channel_id,
                AppendRequest {
                    author_id: claims.author_id.clone(),
                    content: String::new(),
                    kind: Some(EventKind::Deletion),
                    target_seq: Some(target_seq),
                },
            )
            .await
    }
}

fn decode_secret(secret_hex: &str) -> Result<Vec<u8>, GatewayError> {
    hex::decode(secret_hex)
        .map_err(|_| GatewayError::AdapterFatal("corrupt channel secret".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_adapter::object::ObjectStoreAdapter;

    fn service() -> ChannelService {
        let adapter = Arc::new(ObjectStoreAdapter::memory());
        ChannelService::new(adapter.clone(), adapter, 604_800)
    }

    async fn channel_with_token(
        service: &ChannelService,
        permissions: &[&str],
    ) -> (ChannelMetadata, TokenClaims) {
        let metadata = service.create("myapp", "updates").await.unwrap();
        let names: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
        let issued = service
            .create_token("myapp", metadata.channel_id, &names, Some("alice"), Some(3600))
            .await
            .unwrap();
        let claims = service.authorize(&issued.token).await.unwrap();
        (metadata, claims)
    }

    #[tokio::test]
    async fn test_create_lists_under_owner_namespace() {
        let service = service();
        let metadata = service.create("myapp", "updates").await.unwrap();
        assert_eq!(metadata.owner_namespace, "myapp");
        assert_eq!(metadata.secret.len(), 64);

        let listed = service.list("myapp").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].channel_id, metadata.channel_id);
        assert_eq!(listed[0].name, "updates");
        assert!(service.list("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_round_trip_authorizes() {
        let service = service();
        let (metadata, claims) = channel_with_token(&service, &["read", "append"]).await;
        assert_eq!(claims.channel_id, metadata.channel_id);
        assert_eq!(claims.author_id, "alice");
        assert!(claims.has(perms::READ));
        assert!(claims.has(perms::APPEND));
    }

    #[tokio::test]
    async fn test_token_requires_ownership() {
        let service = service();
        let metadata = service.create("myapp", "updates").await.unwrap();
        let err = service
            .create_token(
                "intruder",
                metadata.channel_id,
                &["read".to_string()],
                None,
                None,
            )
            .await;
        assert!(matches!(err, Err(GatewayError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_append_requires_permission_and_uses_token_author() {
        let service = service();
        let (_, read_only) = channel_with_token(&service, &["read"]).await;
        assert!(matches!(
            service.append(&read_only, "hi".into()).await,
            Err(GatewayError::PermissionDenied(_))
        ));

        let (_, claims) = channel_with_token(&service, &["read", "append"]).await;
        let event = service.append(&claims, "hello".into()).await.unwrap();
        assert_eq!(event.author_id, "alice");
        assert_eq!(event.seq, 1);
    }

    #[tokio::test]
    async fn test_read_deleted_gate() {
        let service = service();
        let (_, claims) = channel_with_token(&service, &["read", "append"]).await;
        service.append(&claims, "a".into()).await.unwrap();

        assert!(matches!(
            service.read(&claims, 0, None, true).await,
            Err(GatewayError::PermissionDenied(_))
        ));
        let page = service.read(&claims, 0, None, false).await.unwrap();
        assert_eq!(page.events.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_own_only_deletes_own_events() {
        let service = service();
        let metadata = service.create("myapp", "updates").await.unwrap();

        let alice = service
            .create_token(
                "myapp",
                metadata.channel_id,
                &["read".into(), "append".into(), "delete_own".into()],
                Some("alice"),
                Some(3600),
            )
            .await
            .unwrap();
        let bob = service
            .create_token(
                "myapp",
                metadata.channel_id,
                &["read".into(), "append".into(), "delete_own".into()],
                Some("bob"),
                Some(3600),
            )
            .await
            .unwrap();
        let alice = service.authorize(&alice.token).await.unwrap();
        let bob = service.authorize(&bob.token).await.unwrap();

        let event = service.append(&alice, "mine".into()).await.unwrap();
        assert!(matches!(
            service.delete_event(&bob, event.seq).await,
            Err(GatewayError::PermissionDenied(_))
        ));

        let marker = service.delete_event(&alice, event.seq).await.unwrap();
        assert_eq!(marker.kind, Some(EventKind::Deletion));
        assert_eq!(marker.target_seq, Some(event.seq));
        assert_eq!(marker.seq, 2);

        // Default reads now hide both the marker and its target.
        let page = service.read(&alice, 0, None, false).await.unwrap();
        assert!(page.events.is_empty());
    }

    #[tokio::test]
    async fn test_delete_any_overrides_authorship() {
        let service = service();
        let metadata = service.create("myapp", "updates").await.unwrap();
        let writer = service
            .create_token(
                "myapp",
                metadata.channel_id,
                &["append".into()],
                Some("w"),
                Some(3600),
            )
            .await
            .unwrap();
        let moderator = service
            .create_token(
                "myapp",
                metadata.channel_id,
                &["read".into(), "delete_any".into()],
                Some("mod"),
                Some(3600),
            )
            .await
            .unwrap();
        let writer = service.authorize(&writer.token).await.unwrap();
        let moderator = service.authorize(&moderator.token).await.unwrap();

        let event = service.append(&writer, "content".into()).await.unwrap();
        service.delete_event(&moderator, event.seq).await.unwrap();

        assert!(matches!(
            service.delete_event(&moderator, 99).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected_at_authorize() {
        let service = service();
        let metadata = service.create("myapp", "updates").await.unwrap();
        let issued = service
            .create_token(
                "myapp",
                metadata.channel_id,
                &["read".to_string()],
                None,
                Some(-7200),
            )
            .await
            .unwrap();
        assert!(matches!(
            service.authorize(&issued.token).await,
            Err(GatewayError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_delete_channel_requires_owner_and_clears_index() {
        let service = service();
        let metadata = service.create("myapp", "updates").await.unwrap();

        assert!(matches!(
            service.delete("other", metadata.channel_id).await,
            Err(GatewayError::PermissionDenied(_))
        ));

        service.delete("myapp", metadata.channel_id).await.unwrap();
        assert!(service.list("myapp").await.unwrap().is_empty());
        assert!(matches!(
            service.delete("myapp", metadata.channel_id).await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
