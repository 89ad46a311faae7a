//! Application struct that encapsulates server assembly and serving logic.

use crate::cli::RunArgs;
use std::sync::Arc;
use stratum_adapter::edge::EdgeAdapter;
use stratum_adapter::object::ObjectStoreAdapter;
use stratum_adapter::{BlobStore, ChannelStore, KvStore};
use stratum_core::config::{Config, StorageMode};
use stratum_core::lifecycle::signal::SignalHandler;
use stratum_server::AppState;

pub struct Application {
    config: Arc<Config>,
    app_router: axum::Router,
}

impl Application {
    /// Build the application from CLI args: load config, open the configured
    /// storage backend, and wire the service layer.
    pub async fn build(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Config::load(&args.config).unwrap_or_else(|e| {
            tracing::warn!(
                "Failed to load config from '{}': {e}, using defaults",
                args.config
            );
            Config::default()
        });

        // CLI overrides
        if let Some(ref host) = args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(ref key) = args.bootstrap_api_key {
            config.bootstrap_api_key = Some(key.clone());
        }
        config.validate()?;

        let config = Arc::new(config);
        let (kv_store, blob_store, channel_store) = open_adapters(&config)?;

        tracing::info!(
            mode = ?config.storage.mode,
            host = %config.host,
            port = config.port,
            "Storage gateway configured"
        );
        if config.bootstrap_api_key.is_none() {
            tracing::warn!("no bootstrap-api-key configured; the first principal cannot be created");
        }

        let state =
            AppState::assemble(config.clone(), kv_store, blob_store, channel_store).await?;
        let app_router = stratum_server::build_router(state);

        Ok(Self { config, app_router })
    }

    /// Start serving HTTP and drain gracefully on SIGINT/SIGTERM.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {addr}");

        let (signal_handler, mut shutdown_rx) = SignalHandler::new();
        tokio::spawn(signal_handler.run());

        axum::serve(listener, self.app_router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await?;

        tracing::info!("Shutdown complete");
        Ok(())
    }
}

fn open_adapters(
    config: &Config,
) -> anyhow::Result<(Arc<dyn KvStore>, Arc<dyn BlobStore>, Arc<dyn ChannelStore>)> {
    match config.storage.mode {
        StorageMode::Memory => {
            let adapter = Arc::new(ObjectStoreAdapter::memory());
            Ok((
                adapter.clone() as Arc<dyn KvStore>,
                adapter.clone() as Arc<dyn BlobStore>,
                adapter as Arc<dyn ChannelStore>,
            ))
        }
        StorageMode::Local => {
            let adapter = Arc::new(ObjectStoreAdapter::local(&config.storage.data_dir)?);
            Ok((
                adapter.clone() as Arc<dyn KvStore>,
                adapter.clone() as Arc<dyn BlobStore>,
                adapter as Arc<dyn ChannelStore>,
            ))
        }
        StorageMode::Edge => {
            let edge = &config.storage.edge;
            let endpoint = edge
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("edge storage requires an endpoint"))?;
            let token = edge
                .token
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("edge storage requires a token"))?;
            let adapter = Arc::new(EdgeAdapter::new(endpoint, token, &edge.bucket)?);
            Ok((
                adapter.clone() as Arc<dyn KvStore>,
                adapter.clone() as Arc<dyn BlobStore>,
                adapter as Arc<dyn ChannelStore>,
            ))
        }
    }
}
