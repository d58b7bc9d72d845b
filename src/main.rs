use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, RunMode};
use handlers::media_response::CorsPolicy;
use services::{
    auth_service::TokenVerifier,
    cache_service::{CacheLimits, MemoryEdgeCache},
    media_service::MediaService,
    storage_service::DiskObjectStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-edge with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let connect = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true);
    if let Some(parent) = connect.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect)
            .await?,
    );

    let store = DiskObjectStore::new(db, cfg.storage_dir.clone(), cfg.bucket.clone());

    // --- Schema is idempotent; apply it in every mode ---
    store.migrate().await?;

    match mode {
        RunMode::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        RunMode::Import(dir) => {
            let count = store
                .import_directory(&dir)
                .await
                .with_context(|| format!("importing {}", dir.display()))?;
            tracing::info!(
                "Imported {} objects from {} into bucket {}",
                count,
                dir.display(),
                store.bucket_name()
            );
            return Ok(());
        }
        RunMode::Serve => {
            store.ensure_bucket().await?;
        }
    }

    // --- Initialize media service ---
    let service = MediaService::new(
        Arc::new(store),
        Arc::new(MemoryEdgeCache::new(CacheLimits {
            max_entries: cfg.cache_max_entries,
            capacity_bytes: usize::try_from(cfg.cache_capacity_bytes).unwrap_or(usize::MAX),
            max_entry_bytes: usize::try_from(cfg.cache_max_object_bytes).unwrap_or(usize::MAX),
        })),
        TokenVerifier::new(&cfg.jwt_secret),
        CorsPolicy::new(cfg.allowed_origins.clone()),
        cfg.public_origin.clone(),
        cfg.cache_max_object_bytes,
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

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
