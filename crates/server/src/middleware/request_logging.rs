use crate::AppState;
use axum::extract::{Request, State};
use axum::{middleware::Next, response::Response};
use stratum_core::context::RequestContext;

/// Logs request/response lines and feeds the in-process metrics.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    // First two path segments ("kv.set", "blob.f") so metrics cardinality
    // stays bounded regardless of keys and aliases in the path.
    let op = uri
        .trim_start_matches('/')
        .split('/')
        .take(2)
        .collect::<Vec<_>>()
        .join(".");

    let ctx = request.extensions().get::<RequestContext>().cloned();
    let request_id = ctx
        .as_ref()
        .map(|c| c.request_id.clone())
        .unwrap_or_default();
    let client_ip = ctx
        .as_ref()
        .and_then(|c| c.client_ip.clone())
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        request_id = %request_id,
        client_ip = %client_ip,
        method = %method,
        path = %uri,
        "Request received"
    );

    let response = next.run(request).await;

    let elapsed = ctx.map(|c| c.elapsed_ms()).unwrap_or(0);
    let status = response.status().as_u16();

    state.metrics.record_request(&op);
    state.metrics.record_latency(elapsed as u64);
    if status >= 500 {
        state.metrics.record_error();
    }

    tracing::info!(
        request_id = %request_id,
        status = status,
        elapsed_ms = elapsed,
        "Request completed"
    );

    response
}
