//! Serve command

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use apkrepo_core::{
    LocalStorage, RemoteStorage, Repository, RepositoryConfig, RepositoryError, SigningKey,
    StorageDriver,
};
use tracing::{info, warn};

use crate::ServeArgs;
use crate::server::{self, AppState};

/// Run the HTTP API until interrupted
pub async fn serve(args: ServeArgs) -> Result<()> {
    let storage: Arc<dyn StorageDriver> = match (&args.repo_path, &args.remote_repo_url) {
        (Some(path), _) => Arc::new(
            LocalStorage::new(path)
                .await
                .with_context(|| format!("Failed to open repository {}", path.display()))?,
        ),
        (None, Some(url)) => {
            let auth = args
                .remote_username
                .clone()
                .map(|user| (user, args.remote_password.clone().unwrap_or_default()));
            Arc::new(RemoteStorage::new(url.as_str(), auth).context("Failed to set up remote storage")?)
        }
        (None, None) => anyhow::bail!("Either --repo-path or --remote-repo-url is required"),
    };

    let signing_key = match (&args.priv_key, &args.priv_key_file) {
        (Some(pem), _) => {
            Some(SigningKey::from_pem(pem).context("Failed to store the private key")?)
        }
        (None, Some(path)) => Some(
            SigningKey::from_file(path)
                .with_context(|| format!("Failed to load private key {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let mut engine = args.tools.engine(signing_key);
    if let Some(wait) = args.lock_wait() {
        engine = engine.with_lock_wait(wait);
    }

    let repo = Repository::new(
        storage,
        Arc::new(engine),
        RepositoryConfig {
            default_arch: args.default_arch,
            command_timeout: args.tools.timeout(),
        },
    );

    if args.clean {
        match repo.clean_repository().await {
            Ok(removed) => info!(removed, "repository cleaned"),
            Err(RepositoryError::UnsupportedInMode { driver, .. }) => {
                warn!("--clean ignored: the {driver} driver cannot be cleaned");
            }
            Err(e) => return Err(e).context("Failed to clean the repository"),
        }
    }

    let state = AppState::new(repo);
    let app = server::create_router(state, args.max_content_length);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
