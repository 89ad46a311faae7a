pub mod auth;
pub mod handler;
pub mod middleware;
pub mod streaming;

use axum::{Router, middleware as axum_mw};
use std::sync::Arc;
use std::time::Instant;
use stratum_adapter::{BlobStore, ChannelStore, KvStore};
use stratum_core::config::Config;
use stratum_core::crypto;
use stratum_core::error::GatewayError;
use stratum_core::metrics::Metrics;
use stratum_service::alias::AliasService;
use stratum_service::blob::{BlobOptions, BlobService};
use stratum_service::channel::ChannelService;
use stratum_service::kv::KvService;
use stratum_service::principal::PrincipalRegistry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub principals: Arc<PrincipalRegistry>,
    pub kv: Arc<KvService>,
    pub blobs: Arc<BlobService>,
    pub channels: Arc<ChannelService>,
    // Raw adapter handles, for the admin health probes.
    pub kv_store: Arc<dyn KvStore>,
    pub blob_store: Arc<dyn BlobStore>,
    pub channel_store: Arc<dyn ChannelStore>,
    pub metrics: Arc<Metrics>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the service layer over a set of adapters.
    ///
    /// The signing secret comes from config when present; otherwise it is
    /// loaded from (or generated into) a well-known internal KV key so
    /// presigned URLs survive restarts.
    pub async fn assemble(
        config: Arc<Config>,
        kv_store: Arc<dyn KvStore>,
        blob_store: Arc<dyn BlobStore>,
        channel_store: Arc<dyn ChannelStore>,
    ) -> Result<Self, GatewayError> {
        let signing_secret = match config.signing_secret_bytes() {
            Some(secret) => secret,
            None => resolve_signing_secret(kv_store.as_ref()).await?,
        };
        let signing_secret = Arc::new(signing_secret);

        let aliases = AliasService::new(kv_store.clone());
        let blobs = BlobService::new(
            kv_store.clone(),
            blob_store.clone(),
            aliases,
            signing_secret,
            BlobOptions {
                public_base: config.public_base(),
                presign_enabled: config.presign.enabled,
                presign_expires_in: config.presign.expires_in,
                public_presign_expires_in: config.presign.public_expires_in,
                bucket: config.storage.edge.bucket.clone(),
            },
        );

        Ok(Self {
            principals: Arc::new(PrincipalRegistry::new(kv_store.clone())),
            kv: Arc::new(KvService::new(kv_store.clone())),
            blobs: Arc::new(blobs),
            channels: Arc::new(ChannelService::new(
                kv_store.clone(),
                channel_store.clone(),
                config.token.default_ttl,
            )),
            kv_store,
            blob_store,
            channel_store,
            metrics: Arc::new(Metrics::new()),
            start_time: Instant::now(),
            config,
        })
    }
}

async fn resolve_signing_secret(kv: &dyn KvStore) -> Result<Vec<u8>, GatewayError> {
    if let Some(existing) = kv.get(stratum_service::SIGNING_SECRET_KEY).await? {
        if let Ok(bytes) = hex::decode(existing.trim())
            && bytes.len() == 32
        {
            return Ok(bytes);
        }
        return Err(GatewayError::AdapterFatal(
            "persisted signing secret is corrupt".into(),
        ));
    }
    let secret = crypto::random_bytes(32);
    kv.put(stratum_service::SIGNING_SECRET_KEY, &hex::encode(&secret))
        .await?;
    tracing::info!("generated and persisted a new signing secret");
    Ok(secret)
}

pub fn build_router(state: AppState) -> Router {
    let body_limit_bytes = state.config.body_limit_mb * 1024 * 1024;
    let blob_limit_bytes = state.config.max_blob_mb * 1024 * 1024;

    // Public routes — no credentials; the handlers enforce visibility and
    // URL signatures themselves.
    let public_routes = Router::new()
        .route("/ping", axum::routing::get(handler::ping::ping))
        .route("/metrics", axum::routing::get(handler::ping::metrics))
        .route(
            "/blob/f/{alias}/{*key}",
            axum::routing::get(handler::blob::public_download),
        )
        .route(
            "/channel/subscribe",
            axum::routing::get(handler::channel::subscribe),
        );

    // Capability-token routes — the token in X-Channel-Token authorizes
    // inside the handler.
    let token_routes = Router::new()
        .route("/channel/append", axum::routing::post(handler::channel::append))
        .route("/channel/read", axum::routing::post(handler::channel::read))
        .route(
            "/channel/delete-event",
            axum::routing::post(handler::channel::delete_event),
        )
        .layer(RequestBodyLimitLayer::new(body_limit_bytes));

    // Presigned PUT — authorized by the URL token alone.
    let presigned_routes = Router::new()
        .route(
            "/blob/presigned-put",
            axum::routing::put(handler::blob::presigned_put),
        )
        .layer(RequestBodyLimitLayer::new(blob_limit_bytes));

    // Principal routes — ApiKey auth (or bootstrap, for create-principal
    // only).
    let principal_routes = Router::new()
        .route(
            "/principal/create",
            axum::routing::post(handler::principal::create),
        )
        .route(
            "/principal/list",
            axum::routing::post(handler::principal::list),
        )
        .route(
            "/principal/delete",
            axum::routing::post(handler::principal::delete),
        )
        .route("/kv/get", axum::routing::post(handler::kv::get))
        .route("/kv/set", axum::routing::post(handler::kv::set))
        .route("/kv/delete", axum::routing::post(handler::kv::delete))
        .route("/kv/keys", axum::routing::post(handler::kv::keys))
        .route(
            "/kv/namespaces",
            axum::routing::post(handler::kv::namespaces),
        )
        .route("/kv/bulk/get", axum::routing::post(handler::kv::bulk_get))
        .route("/kv/bulk/set", axum::routing::post(handler::kv::bulk_set))
        .route("/kv/dump", axum::routing::post(handler::kv::dump))
        .route(
            "/blob/presign-upload",
            axum::routing::post(handler::blob::presign_upload),
        )
        .route("/blob/get", axum::routing::post(handler::blob::get))
        .route("/blob/delete", axum::routing::post(handler::blob::delete))
        .route("/blob/list", axum::routing::post(handler::blob::list))
        .route(
            "/blob/visibility",
            axum::routing::post(handler::blob::visibility),
        )
        .route(
            "/blob/download/{namespace}/{*key}",
            axum::routing::get(handler::blob::authenticated_download),
        )
        .route(
            "/channel/create",
            axum::routing::post(handler::channel::create),
        )
        .route("/channel/list", axum::routing::post(handler::channel::list))
        .route(
            "/channel/delete",
            axum::routing::post(handler::channel::delete),
        )
        .route(
            "/channel/token/create",
            axum::routing::post(handler::channel::token_create),
        )
        .route("/admin/check", axum::routing::post(handler::admin::check))
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    // Direct upload — ApiKey auth with the blob-sized body limit.
    let upload_routes = Router::new()
        .route("/blob/upload", axum::routing::post(handler::blob::upload))
        .layer(RequestBodyLimitLayer::new(blob_limit_bytes))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let cors = if state.config.cors_origin == "*" {
        CorsLayer::permissive()
    } else {
        match state.config.cors_origin.parse::<axum::http::HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin([origin])
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                tracing::warn!(
                    origin = %state.config.cors_origin,
                    "invalid cors-origin, falling back to permissive"
                );
                CorsLayer::permissive()
            }
        }
    };

    Router::new()
        .merge(public_routes)
        .merge(token_routes)
        .merge(presigned_routes)
        .merge(principal_routes)
        .merge(upload_routes)
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::request_logging::request_logging_middleware,
        ))
        .layer(axum_mw::from_fn(
            middleware::request_context::request_context_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
