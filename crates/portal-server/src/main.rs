//! Portal server entry point.
//!
//! Loads configuration, opens the storage backend and key material, builds
//! the document store and access gate, then serves the Axum router until
//! SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use portal_core::keyfile::KeyMaterial;
use portal_server::config::{ServerConfig, StorageBackendType};
use portal_server::routes;
use portal_server::state::{AppState, StateOptions};
use portal_storage::{FileBackend, MemoryBackend, StorageBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "portal starting");

    let storage = open_storage(&config.storage_backend).await?;

    let keys = KeyMaterial::load_or_generate(&config.key_file, &config.iv_file)
        .await
        .context("failed to load encryption key material")?;

    let state = AppState::build(
        storage,
        &keys,
        StateOptions {
            throttle: config.throttle,
            require_unlock_for_writes: config.require_unlock_for_writes,
            bootstrap_password: config.bootstrap_password.clone(),
        },
    )
    .await?;

    if !state.gate.is_configured().await.context("failed to read gate state")? {
        info!("no unlock password configured; POST /v1/sys/init to set one");
    }

    let app = routes::router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "portal listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("portal stopped");
    Ok(())
}

/// Open the configured storage backend.
async fn open_storage(kind: &StorageBackendType) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let storage: Arc<dyn StorageBackend> = match kind {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        StorageBackendType::File { path } => {
            let backend = FileBackend::open(path)
                .await
                .context("failed to open file storage")?;
            info!(path = %backend.root().display(), "using file storage");
            Arc::new(backend)
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!(url = %"[redacted]", "using PostgreSQL storage");
            Arc::new(
                portal_storage::PostgresBackend::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            )
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!(
                "PostgreSQL backend requested but feature 'postgres-backend' is not enabled"
            );
        }
    };
    Ok(storage)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
