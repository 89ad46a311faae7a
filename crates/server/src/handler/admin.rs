use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;
use std::time::Instant;

const PROBE_KEY: &str = "__HEALTH:probe";

/// POST /admin/check — round-trips each backend and reports per-component
/// health with latency.
pub async fn check(State(state): State<AppState>) -> impl IntoResponse {
    let kv = probe_kv(&state).await;
    let blob = probe_blob(&state).await;
    let channel = probe_channel(&state).await;

    Json(json!({
        "kv": kv,
        "blob": blob,
        "channel": channel,
    }))
}

async fn probe_kv(state: &AppState) -> serde_json::Value {
    let started = Instant::now();
    let stamp = chrono::Utc::now().to_rfc3339();
    let outcome = async {
        state.kv_store.put(PROBE_KEY, &stamp).await?;
        let read_back = state.kv_store.get(PROBE_KEY).await?;
        state.kv_store.delete(PROBE_KEY).await?;
        if read_back.as_deref() != Some(stamp.as_str()) {
            return Err(stratum_core::error::GatewayError::AdapterFatal(
                "kv probe read back a different value".into(),
            ));
        }
        Ok::<(), stratum_core::error::GatewayError>(())
    }
    .await;
    report(outcome.err().map(|e| e.to_string()), started)
}

async fn probe_blob(state: &AppState) -> serde_json::Value {
    let started = Instant::now();
    // A head on a key that never exists still proves the backend responds.
    let outcome = state.blob_store.head(PROBE_KEY).await;
    report(outcome.err().map(|e| e.to_string()), started)
}

async fn probe_channel(state: &AppState) -> serde_json::Value {
    let started = Instant::now();
    let outcome = state.channel_store.get_metadata(uuid::Uuid::nil()).await;
    report(outcome.err().map(|e| e.to_string()), started)
}

fn report(error: Option<String>, started: Instant) -> serde_json::Value {
    let latency_ms = started.elapsed().as_millis() as u64;
    match error {
        None => json!({"status": "ok", "latencyMs": latency_ms}),
        Some(message) => json!({"status": "error", "latencyMs": latency_ms, "message": message}),
    }
}
