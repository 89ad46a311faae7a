use crate::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use stratum_core::error::GatewayError;
use stratum_service::blob::{BlobMetadata, BlobUrl, PresignedUpload, Visibility, disposition, parse_range};

#[derive(Deserialize)]
pub struct BlobKeyRequest {
    pub namespace: String,
    pub key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadRequest {
    pub namespace: String,
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub visibility: Visibility,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub namespace: String,
    pub key: String,
    pub visibility: Visibility,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub sig: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Deserialize)]
pub struct PresignedPutQuery {
    pub token: String,
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, GatewayError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::BadRequest(format!("missing {name} header")))
}

fn parse_visibility(raw: &str) -> Result<Visibility, GatewayError> {
    match raw {
        "private" => Ok(Visibility::Private),
        "presigned" => Ok(Visibility::Presigned),
        "public" => Ok(Visibility::Public),
        other => Err(GatewayError::BadRequest(format!(
            "unknown visibility: {other}"
        ))),
    }
}

/// POST /blob/upload — raw body; namespace/key/visibility carried in
/// headers.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BlobMetadata>, GatewayError> {
    let namespace = required_header(&headers, "x-namespace")?.to_string();
    let key = required_header(&headers, "x-key")?.to_string();
    let visibility = match headers.get("x-visibility").and_then(|v| v.to_str().ok()) {
        Some(raw) => parse_visibility(raw)?,
        None => Visibility::Private,
    };
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let metadata = state
        .blobs
        .upload(&namespace, &key, visibility, &content_type, body)
        .await?;
    Ok(Json(metadata))
}

/// POST /blob/presign-upload
pub async fn presign_upload(
    State(state): State<AppState>,
    Json(body): Json<PresignUploadRequest>,
) -> Result<Json<PresignedUpload>, GatewayError> {
    let issued = state
        .blobs
        .presign_upload(
            &body.namespace,
            &body.key,
            &body.content_type,
            body.size,
            body.visibility,
        )
        .await?;
    Ok(Json(issued))
}

/// PUT /blob/presigned-put?token=… — the self-hosted presigned upload
/// target; the body must be exactly the signed length.
pub async fn presigned_put(
    State(state): State<AppState>,
    Query(query): Query<PresignedPutQuery>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let claims = state.blobs.accept_presigned_put(&query.token, body).await?;
    Ok(Json(json!({ "success": true, "key": claims.key })))
}

/// POST /blob/get — download URL according to visibility.
pub async fn get(
    State(state): State<AppState>,
    Json(body): Json<BlobKeyRequest>,
) -> Result<Json<BlobUrl>, GatewayError> {
    Ok(Json(state.blobs.get(&body.namespace, &body.key).await?))
}

/// POST /blob/delete
pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<BlobKeyRequest>,
) -> Result<StatusCode, GatewayError> {
    state.blobs.delete(&body.namespace, &body.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /blob/list
pub async fn list(
    State(state): State<AppState>,
    Json(body): Json<ListRequest>,
) -> Result<Json<Vec<BlobMetadata>>, GatewayError> {
    Ok(Json(state.blobs.list(body.namespace.as_deref()).await?))
}

/// POST /blob/visibility — metadata-only update.
pub async fn visibility(
    State(state): State<AppState>,
    Json(body): Json<VisibilityRequest>,
) -> Result<Json<BlobMetadata>, GatewayError> {
    let metadata = state
        .blobs
        .set_visibility(&body.namespace, &body.key, body.visibility)
        .await?;
    Ok(Json(metadata))
}

/// GET /blob/f/{alias}/{key} — the public download route.
///
/// `public` blobs need no credentials. Any other visibility requires a
/// valid `sig`/`exp` pair, verified on the alias form so re-aliasing can
/// never invalidate existing links.
pub async fn public_download(
    State(state): State<AppState>,
    Path((alias, key)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let namespace = state
        .blobs
        .aliases()
        .resolve(&alias)
        .await?
        .ok_or_else(|| GatewayError::NotFound("alias".into()))?;
    let metadata = state.blobs.metadata(&namespace, &key).await?;

    let cache_control = match metadata.visibility {
        Visibility::Public => "public, max-age=31536000, immutable",
        // Any non-public blob needs a valid signature pair on this route.
        Visibility::Presigned | Visibility::Private => {
            let (exp, sig) = match (query.exp, query.sig.as_deref()) {
                (Some(exp), Some(sig)) => (exp, sig),
                _ => {
                    return Err(GatewayError::TokenInvalid(
                        "sig and exp query parameters required".into(),
                    ));
                }
            };
            state.blobs.verify_download_sig(&alias, &key, exp, sig)?;
            "private, no-store"
        }
    };

    serve_bytes(&state, &namespace, &key, &metadata, &headers, cache_control).await
}

/// GET /blob/download/{namespace-or-alias}/{key} — principal-authenticated
/// download: 302 to a signed URL when the presigner is enabled, proxied
/// bytes otherwise.
pub async fn authenticated_download(
    State(state): State<AppState>,
    Path((namespace_or_alias, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let namespace = state
        .blobs
        .aliases()
        .resolve_or_namespace(&namespace_or_alias)
        .await?;
    let metadata = state.blobs.metadata(&namespace, &key).await?;

    if state.blobs.presign_enabled() {
        let alias = state.blobs.aliases().ensure(&namespace).await?;
        let (url, expires_at) = state.blobs.signed_download_url(&alias, &key);
        let max_age = (expires_at - chrono::Utc::now().timestamp()).max(0);
        return Response::builder()
            .status(StatusCode::FOUND)
            .header("location", url)
            .header("cache-control", format!("public, max-age={max_age}"))
            .body(Body::empty())
            .map_err(|e| GatewayError::AdapterFatal(format!("build redirect: {e}")));
    }

    serve_bytes(&state, &namespace, &key, &metadata, &headers, "private, no-store").await
}

/// Stream stored bytes with content, caching, disposition, and range
/// headers. Returns 404 when the bytes are absent (orphaned metadata).
async fn serve_bytes(
    state: &AppState,
    namespace: &str,
    key: &str,
    metadata: &BlobMetadata,
    headers: &HeaderMap,
    cache_control: &str,
) -> Result<Response, GatewayError> {
    let size = state.blobs.size_of(namespace, key).await?;

    let range = match headers.get("range").map(|v| v.to_str()) {
        Some(Ok(header)) => Some(parse_range(header, size)?),
        Some(Err(_)) => return Err(GatewayError::BadRequest("invalid range header".into())),
        None => None,
    };

    let blob = state.blobs.read(namespace, key, range).await?;

    let filename = key.rsplit('/').next().unwrap_or(key).replace('"', "");
    let mut builder = Response::builder()
        .status(if range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        })
        .header("content-type", metadata.content_type.as_str())
        .header("cache-control", cache_control)
        .header("accept-ranges", "bytes")
        .header(
            "content-disposition",
            format!("{}; filename=\"{filename}\"", disposition(&metadata.content_type)),
        )
        .header("content-length", blob.body.len());
    if let Some(r) = range {
        builder = builder.header(
            "content-range",
            format!("bytes {}-{}/{size}", r.offset, r.offset + r.length - 1),
        );
    }
    builder
        .body(Body::from(blob.body))
        .map_err(|e| GatewayError::AdapterFatal(format!("build response: {e}")))
}
