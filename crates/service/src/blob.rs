//! Blob service: metadata in KV, bytes in the blob store.
//!
//! Metadata lives at `__BLOB:<namespace>:<key>`, bytes at `<namespace>:<key>`.
//! Metadata is the source of truth: it is written before a presigned upload
//! is issued (so visibility is resolvable even if the client aborts), and it
//! is removed first on delete (so a failed byte delete leaves bytes orphaned
//! but invisible). Reads verify byte existence and treat bare metadata as
//! orphaned.

use crate::alias::AliasService;
use crate::{BLOB_META_PREFIX, join_key, validate_key, validate_namespace};
use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use stratum_adapter::{BlobObject, BlobStore, ByteRange, KvStore};
use stratum_core::error::GatewayError;
use stratum_core::presign::{self, PresignClaims, PresignOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Presigned,
    Public,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub key: String,
    pub namespace: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
    pub visibility: Visibility,
}

/// Accepts both the current `visibility` field and the legacy boolean
/// `isPublic`, normalizing to `visibility`. Writers always emit `visibility`.
impl<'de> Deserialize<'de> for BlobMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            key: String,
            namespace: String,
            size: u64,
            content_type: String,
            uploaded_at: chrono::DateTime<chrono::Utc>,
            #[serde(default)]
            visibility: Option<Visibility>,
            #[serde(default)]
            is_public: Option<bool>,
        }

        let wire = Wire::deserialize(deserializer)?;
        let visibility = match (wire.visibility, wire.is_public) {
            (Some(v), _) => v,
            (None, Some(true)) => Visibility::Public,
            (None, Some(false)) => Visibility::Private,
            (None, None) => {
                return Err(D::Error::custom("metadata carries neither visibility nor isPublic"));
            }
        };
        Ok(BlobMetadata {
            key: wire.key,
            namespace: wire.namespace,
            size: wire.size,
            content_type: wire.content_type,
            uploaded_at: wire.uploaded_at,
            visibility,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub metadata: BlobMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub upload_url: String,
    pub expires_at: i64,
    pub metadata: BlobMetadata,
}

#[derive(Clone)]
pub struct BlobOptions {
    pub public_base: String,
    pub presign_enabled: bool,
    pub presign_expires_in: u64,
    pub public_presign_expires_in: u64,
    pub bucket: String,
}

pub struct BlobService {
    kv: Arc<dyn KvStore>,
    blobs: Arc<dyn BlobStore>,
    aliases: AliasService,
    signing_secret: Arc<Vec<u8>>,
    options: BlobOptions,
}

impl BlobService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        aliases: AliasService,
        signing_secret: Arc<Vec<u8>>,
        options: BlobOptions,
    ) -> Self {
        Self {
            kv,
            blobs,
            aliases,
            signing_secret,
            options,
        }
    }

    fn meta_key(namespace: &str, key: &str) -> String {
        format!("{BLOB_META_PREFIX}{namespace}:{key}")
    }

    async fn write_metadata(&self, metadata: &BlobMetadata) -> Result<(), GatewayError> {
        let body = serde_json::to_string(metadata)
            .map_err(|e| GatewayError::AdapterFatal(format!("encode blob metadata: {e}")))?;
        self.kv
            .put(&Self::meta_key(&metadata.namespace, &metadata.key), &body)
            .await
    }

    /// Metadata record, or `NotFound`.
    pub async fn metadata(&self, namespace: &str, key: &str) -> Result<BlobMetadata, GatewayError> {
        match self.kv.get(&Self::meta_key(namespace, key)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| GatewayError::AdapterFatal(format!("corrupt blob metadata: {e}"))),
            None => Err(GatewayError::NotFound("blob".into())),
        }
    }

    /// Direct upload through the gateway. Zero-byte bodies are rejected.
    pub async fn upload(
        &self,
        namespace: &str,
        key: &str,
        visibility: Visibility,
        content_type: &str,
        body: Bytes,
    ) -> Result<BlobMetadata, GatewayError> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        if body.is_empty() {
            return Err(GatewayError::BadRequest("upload body is empty".into()));
        }

        let metadata = BlobMetadata {
            key: key.to_string(),
            namespace: namespace.to_string(),
            size: body.len() as u64,
            content_type: content_type.to_string(),
            uploaded_at: chrono::Utc::now(),
            visibility,
        };
        self.blobs
            .put(&join_key(namespace, key), body, content_type)
            .await?;
        self.write_metadata(&metadata).await?;
        self.aliases.ensure(namespace).await?;
        Ok(metadata)
    }

    /// Issue a presigned PUT URL. Metadata is pre-written so visibility is
    /// already resolvable; if the client never uploads, the record is an
    /// orphan that reads treat as absent.
    pub async fn presign_upload(
        &self,
        namespace: &str,
        key: &str,
        content_type: &str,
        size: u64,
        visibility: Visibility,
    ) -> Result<PresignedUpload, GatewayError> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        if size == 0 {
            return Err(GatewayError::BadRequest("size must be positive".into()));
        }
        if !self.options.presign_enabled {
            return Err(GatewayError::PresignerUnavailable);
        }

        let metadata = BlobMetadata {
            key: key.to_string(),
            namespace: namespace.to_string(),
            size,
            content_type: content_type.to_string(),
            uploaded_at: chrono::Utc::now(),
            visibility,
        };
        self.write_metadata(&metadata).await?;
        self.aliases.ensure(namespace).await?;

        let ttl = if visibility == Visibility::Public {
            self.options.public_presign_expires_in
        } else {
            self.options.presign_expires_in
        };
        let expires_at = chrono::Utc::now().timestamp() + ttl as i64;
        let claims = PresignClaims {
            bucket: self.options.bucket.clone(),
            key: join_key(namespace, key),
            content_type: content_type.to_string(),
            content_length: size,
            expires_at,
            op: PresignOp::Put,
        };
        let token = presign::sign(&claims, &self.signing_secret)?;
        Ok(PresignedUpload {
            upload_url: format!(
                "{}/blob/presigned-put?token={token}",
                self.options.public_base
            ),
            expires_at,
            metadata,
        })
    }

    /// Accept bytes for a presigned PUT. The body must be exactly the signed
    /// content length.
    pub async fn accept_presigned_put(
        &self,
        token: &str,
        body: Bytes,
    ) -> Result<PresignClaims, GatewayError> {
        let claims = presign::verify(token, PresignOp::Put, &self.signing_secret)?;
        if body.len() as u64 != claims.content_length {
            return Err(GatewayError::BadRequest(format!(
                "body is {} bytes but {} were signed",
                body.len(),
                claims.content_length
            )));
        }
        self.blobs
            .put(&claims.key, body, &claims.content_type)
            .await?;
        Ok(claims)
    }

    /// Produce a download URL according to visibility. Returns `NotFound`
    /// when the bytes are absent (orphaned metadata).
    pub async fn get(&self, namespace: &str, key: &str) -> Result<BlobUrl, GatewayError> {
        let metadata = self.metadata(namespace, key).await?;
        if self.blobs.head(&join_key(namespace, key)).await?.is_none() {
            return Err(GatewayError::NotFound("blob bytes".into()));
        }
        let alias = self.aliases.ensure(namespace).await?;
        let encoded_key = urlencoding::encode(key);

        match metadata.visibility {
            Visibility::Public => Ok(BlobUrl {
                url: format!("{}/blob/f/{alias}/{encoded_key}", self.options.public_base),
                expires_at: None,
                metadata,
            }),
            _ if self.options.presign_enabled => {
                let expires_at =
                    chrono::Utc::now().timestamp() + self.options.presign_expires_in as i64;
                let sig = presign::sign_download(&alias, key, expires_at, &self.signing_secret);
                Ok(BlobUrl {
                    url: format!(
                        "{}/blob/f/{alias}/{encoded_key}?exp={expires_at}&sig={sig}",
                        self.options.public_base
                    ),
                    expires_at: Some(expires_at),
                    metadata,
                })
            }
            _ => Ok(BlobUrl {
                url: format!(
                    "{}/blob/download/{namespace}/{encoded_key}",
                    self.options.public_base
                ),
                expires_at: None,
                metadata,
            }),
        }
    }

    /// Signed download URL for the alias form of a key.
    pub fn signed_download_url(&self, alias: &str, key: &str) -> (String, i64) {
        let expires_at = chrono::Utc::now().timestamp() + self.options.presign_expires_in as i64;
        let sig = presign::sign_download(alias, key, expires_at, &self.signing_secret);
        (
            format!(
                "{}/blob/f/{alias}/{}?exp={expires_at}&sig={sig}",
                self.options.public_base,
                urlencoding::encode(key)
            ),
            expires_at,
        )
    }

    pub fn verify_download_sig(
        &self,
        alias: &str,
        key: &str,
        expires_at: i64,
        sig: &str,
    ) -> Result<(), GatewayError> {
        presign::verify_download(alias, key, expires_at, sig, &self.signing_secret)
    }

    pub fn presign_enabled(&self) -> bool {
        self.options.presign_enabled
    }

    pub fn aliases(&self) -> &AliasService {
        &self.aliases
    }

    /// Read bytes, optionally a range resolved against the stored size.
    pub async fn read(
        &self,
        namespace: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<BlobObject, GatewayError> {
        self.blobs
            .get(&join_key(namespace, key), range)
            .await?
            .ok_or_else(|| GatewayError::NotFound("blob bytes".into()))
    }

    /// Actual stored size, or `NotFound` for orphaned metadata.
    pub async fn size_of(&self, namespace: &str, key: &str) -> Result<u64, GatewayError> {
        self.blobs
            .head(&join_key(namespace, key))
            .await?
            .ok_or_else(|| GatewayError::NotFound("blob bytes".into()))
    }

    /// Metadata-only update; the blob must exist.
    pub async fn set_visibility(
        &self,
        namespace: &str,
        key: &str,
        visibility: Visibility,
    ) -> Result<BlobMetadata, GatewayError> {
        let mut metadata = self.metadata(namespace, key).await?;
        metadata.visibility = visibility;
        self.write_metadata(&metadata).await?;
        Ok(metadata)
    }

    /// Metadata first; a failed byte delete leaves the bytes orphaned but
    /// invisible.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<(), GatewayError> {
        self.metadata(namespace, key).await?;
        self.kv.delete(&Self::meta_key(namespace, key)).await?;
        if let Err(e) = self.blobs.delete(&join_key(namespace, key)).await {
            tracing::warn!(namespace, key, error = %e, "blob byte delete failed after metadata removal");
        }
        Ok(())
    }

    /// All metadata records, optionally scoped to one namespace.
    pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<BlobMetadata>, GatewayError> {
        if let Some(ns) = namespace {
            validate_namespace(ns)?;
        }
        let prefix = match namespace {
            Some(ns) => format!("{BLOB_META_PREFIX}{ns}:"),
            None => BLOB_META_PREFIX.to_string(),
        };

        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.kv.list(Some(&prefix), cursor.as_deref(), None).await?;
            for key in &page.keys {
                if let Some(raw) = self.kv.get(key).await? {
                    let metadata: BlobMetadata = serde_json::from_str(&raw).map_err(|e| {
                        GatewayError::AdapterFatal(format!("corrupt blob metadata: {e}"))
                    })?;
                    records.push(metadata);
                }
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }
}

/// Resolve an HTTP `Range` header against the object size. Only single
/// ranges are supported.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, GatewayError> {
    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| GatewayError::BadRequest("unsupported range unit".into()))?;
    if spec.contains(',') {
        return Err(GatewayError::BadRequest("multipart ranges unsupported".into()));
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        // bytes=-N → final N bytes
        let n: u64 = suffix
            .parse()
            .map_err(|_| GatewayError::BadRequest("invalid range".into()))?;
        let length = n.min(size);
        if length == 0 {
            return Err(GatewayError::RangeNotSatisfiable("empty suffix range".into()));
        }
        return Ok(ByteRange {
            offset: size - length,
            length,
        });
    }

    let (start_raw, end_raw) = spec
        .split_once('-')
        .ok_or_else(|| GatewayError::BadRequest("invalid range".into()))?;
    let start: u64 = start_raw
        .parse()
        .map_err(|_| GatewayError::BadRequest("invalid range".into()))?;
    if start >= size {
        return Err(GatewayError::RangeNotSatisfiable(format!(
            "start {start} beyond size {size}"
        )));
    }
    let end = if end_raw.is_empty() {
        size - 1
    } else {
        end_raw
            .parse::<u64>()
            .map_err(|_| GatewayError::BadRequest("invalid range".into()))?
            .min(size - 1)
    };
    if end < start {
        return Err(GatewayError::BadRequest("range end before start".into()));
    }
    Ok(ByteRange {
        offset: start,
        length: end - start + 1,
    })
}

/// Whether a content type renders inline in the browser or downloads as an
/// attachment.
pub fn disposition(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    let inline = essence.starts_with("image/")
        || essence.starts_with("video/")
        || essence.starts_with("audio/")
        || essence.starts_with("text/")
        || essence == "application/pdf"
        || essence == "application/json";
    if inline { "inline" } else { "attachment" }
}
