use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use stratum_core::context::Identity;
use stratum_core::error::GatewayError;
use stratum_service::principal::PrincipalRecord;

#[derive(Deserialize)]
pub struct CreateRequest {
    pub display_name: String,
}

#[derive(Serialize)]
pub struct CreateResponse {
    #[serde(flatten)]
    pub principal: PrincipalRecord,
    /// Returned exactly once; only the hash is persisted.
    pub secret: String,
}

/// POST /principal/create — reachable with the bootstrap key (first
/// principal) or any active principal.
pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateRequest>,
) -> Result<Json<CreateResponse>, GatewayError> {
    let (principal, secret) = state.principals.create(&body.display_name).await?;
    match identity {
        Identity::Bootstrap => {
            tracing::info!(display_name = %principal.display_name, "principal bootstrapped")
        }
        Identity::Principal(actor) => tracing::info!(
            actor = %actor.display_name,
            display_name = %principal.display_name,
            "principal created"
        ),
    }
    Ok(Json(CreateResponse { principal, secret }))
}

/// POST /principal/list
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<PrincipalRecord>>, GatewayError> {
    Ok(Json(state.principals.list().await?))
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub secret_hash: String,
}

/// POST /principal/delete — idempotent.
pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<DeleteRequest>,
) -> Result<StatusCode, GatewayError> {
    state.principals.delete(&body.secret_hash).await?;
    if let Identity::Principal(actor) = &identity {
        tracing::info!(actor = %actor.display_name, secret_hash = %body.secret_hash, "principal deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}
