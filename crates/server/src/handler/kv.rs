use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stratum_core::error::GatewayError;
use stratum_service::kv::{KvEntry, NamespaceDump};

#[derive(Deserialize)]
pub struct KeyRequest {
    pub namespace: String,
    pub key: String,
}

#[derive(Deserialize)]
pub struct SetRequest {
    pub namespace: String,
    pub key: String,
    pub value: String,
}

#[derive(Deserialize)]
pub struct NamespaceRequest {
    pub namespace: String,
}

#[derive(Deserialize)]
pub struct BulkGetRequest {
    pub namespace: String,
    pub keys: Vec<String>,
}

#[derive(Deserialize)]
pub struct BulkSetRequest {
    pub namespace: String,
    pub entries: Vec<KvEntry>,
}

#[derive(Serialize)]
pub struct EntryResponse {
    pub key: String,
    pub value: String,
}

/// POST /kv/get
pub async fn get(
    State(state): State<AppState>,
    Json(body): Json<KeyRequest>,
) -> Result<Json<EntryResponse>, GatewayError> {
    match state.kv.get(&body.namespace, &body.key).await? {
        Some(value) => Ok(Json(EntryResponse {
            key: body.key,
            value,
        })),
        None => Err(GatewayError::NotFound("key".into())),
    }
}

/// POST /kv/set — idempotent overwrite.
pub async fn set(
    State(state): State<AppState>,
    Json(body): Json<SetRequest>,
) -> Result<StatusCode, GatewayError> {
    state.kv.set(&body.namespace, &body.key, &body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /kv/delete — idempotent.
pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<KeyRequest>,
) -> Result<StatusCode, GatewayError> {
    state.kv.delete(&body.namespace, &body.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /kv/keys
pub async fn keys(
    State(state): State<AppState>,
    Json(body): Json<NamespaceRequest>,
) -> Result<Json<Vec<String>>, GatewayError> {
    Ok(Json(state.kv.list_keys(&body.namespace).await?))
}

/// POST /kv/namespaces
pub async fn namespaces(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, GatewayError> {
    Ok(Json(state.kv.list_namespaces().await?))
}

/// POST /kv/bulk/get — missing keys are skipped.
pub async fn bulk_get(
    State(state): State<AppState>,
    Json(body): Json<BulkGetRequest>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let entries = state.kv.bulk_get(&body.namespace, &body.keys).await?;
    Ok(Json(json!({ "entries": entries })))
}

/// POST /kv/bulk/set — no rollback; reports how many entries were written.
pub async fn bulk_set(
    State(state): State<AppState>,
    Json(body): Json<BulkSetRequest>,
) -> Json<serde_json::Value> {
    let outcome = state.kv.bulk_set(&body.namespace, &body.entries).await;
    Json(json!({
        "success": outcome.error.is_none(),
        "count": outcome.count,
    }))
}

/// POST /kv/dump
pub async fn dump(
    State(state): State<AppState>,
) -> Result<Json<Vec<NamespaceDump>>, GatewayError> {
    Ok(Json(state.kv.dump().await?))
}
