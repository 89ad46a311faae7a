use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

pub async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "pong",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
