use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use services::{
    access_gate::{AccessGate, UserRegistry},
    file_storage::FileStorage,
    token_service::TokenService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting puny-oss with config: {:?}", cfg);

    // --- Initialize core services ---
    let storage = FileStorage::open(&cfg.storage_dir)
        .await
        .with_context(|| format!("preparing storage directory {}", cfg.storage_dir.display()))?;
    tracing::info!("Serving buckets from {}", storage.base_path().display());

    let users = UserRegistry::new(cfg.users.clone());
    tracing::info!("Loaded {} user(s)", users.len());
    let gate = AccessGate::new(TokenService::new(&cfg.jwt_secret), users);

    // --- Build router ---
    let app_state = state::AppState::new(Arc::new(storage), gate, &cfg.public_url);
    let app: Router = routes::routes::routes(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
