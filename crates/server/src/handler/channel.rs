use crate::AppState;
use crate::handler::channel_token;
use crate::streaming;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use stratum_adapter::{ChannelEvent, ChannelMetadata};
use stratum_core::error::GatewayError;
use stratum_core::token::perms;
use stratum_service::channel::{ChannelSummary, IssuedToken};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRequest {
    pub namespace: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub namespace: String,
    pub channel_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCreateRequest {
    pub namespace: String,
    pub channel_id: Uuid,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    #[serde(default)]
    pub after_seq: u64,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub events: Vec<ChannelEvent>,
    pub has_more: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEventRequest {
    pub target_seq: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeQuery {
    pub token: String,
    #[serde(default)]
    pub channel_id: Option<Uuid>,
    #[serde(default)]
    pub after_seq: u64,
}

/// POST /channel/create — the only response that ever carries the channel
/// secret.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Result<Json<ChannelMetadata>, GatewayError> {
    Ok(Json(
        state.channels.create(&body.namespace, &body.name).await?,
    ))
}

/// POST /channel/list
pub async fn list(
    State(state): State<AppState>,
    Json(body): Json<NamespaceRequest>,
) -> Result<Json<Vec<ChannelSummary>>, GatewayError> {
    Ok(Json(state.channels.list(&body.namespace).await?))
}

/// POST /channel/delete — owner only.
pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<DeleteRequest>,
) -> Result<StatusCode, GatewayError> {
    state
        .channels
        .delete(&body.namespace, body.channel_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /channel/token/create — owner only.
pub async fn token_create(
    State(state): State<AppState>,
    Json(body): Json<TokenCreateRequest>,
) -> Result<Json<IssuedToken>, GatewayError> {
    let issued = state
        .channels
        .create_token(
            &body.namespace,
            body.channel_id,
            &body.permissions,
            body.author_id.as_deref(),
            body.expires_in_seconds,
        )
        .await?;
    Ok(Json(issued))
}

/// POST /channel/append — token-routed; author comes from the token.
pub async fn append(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AppendRequest>,
) -> Result<Json<ChannelEvent>, GatewayError> {
    let claims = state.channels.authorize(channel_token(&headers)?).await?;
    Ok(Json(state.channels.append(&claims, body.content).await?))
}

/// POST /channel/read — token-routed sequential read.
pub async fn read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, GatewayError> {
    let claims = state.channels.authorize(channel_token(&headers)?).await?;
    let page = state
        .channels
        .read(&claims, body.after_seq, body.limit, body.include_deleted)
        .await?;
    Ok(Json(ReadResponse {
        events: page.events,
        has_more: page.has_more,
    }))
}

/// POST /channel/delete-event — appends a deletion marker.
pub async fn delete_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DeleteEventRequest>,
) -> Result<Json<ChannelEvent>, GatewayError> {
    let claims = state.channels.authorize(channel_token(&headers)?).await?;
    Ok(Json(
        state.channels.delete_event(&claims, body.target_seq).await?,
    ))
}

/// GET /channel/subscribe?token=…&channelId=…&afterSeq=… — SSE stream of
/// events in sequence order.
pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Result<impl axum::response::IntoResponse, GatewayError> {
    let claims = state.channels.authorize(&query.token).await?;
    if !claims.has(perms::READ) {
        return Err(GatewayError::PermissionDenied("read not granted".into()));
    }
    if let Some(channel_id) = query.channel_id
        && channel_id != claims.channel_id
    {
        return Err(GatewayError::PermissionDenied(
            "token is for a different channel".into(),
        ));
    }
    Ok(streaming::subscribe_stream(
        state.channels.clone(),
        claims,
        query.after_seq,
    ))
}
