//! fts-daemon entry point.
//!
//! Thin on purpose: loads configuration, picks the store, wires middleware,
//! and serves. Handlers live in `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use fts_config::{LoadedConfig, ServiceConfig, UnusedKeyPolicy};
use fts_daemon::{routes, state};
use fts_db::PgAggregateStore;
use fts_reconcile::InMemoryStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Comma-separated YAML layer paths, base first.
const ENV_CONFIG_PATHS: &str = "FTS_CONFIG";
const ENV_DAEMON_ADDR: &str = "FTS_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    let report = fts_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "config contains keys nothing reads");
    }
    let cfg = loaded.service_config()?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");

    let store = select_store(&cfg).await?;
    let shared = Arc::new(state::AppState::new(store, &cfg, loaded.config_hash.clone()));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&cfg)?;
    info!("fts-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config() -> anyhow::Result<LoadedConfig> {
    match std::env::var(ENV_CONFIG_PATHS) {
        Ok(raw) if !raw.trim().is_empty() => {
            let paths: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            fts_config::load_layered_yaml(&paths)
                .with_context(|| format!("loading {ENV_CONFIG_PATHS}={raw}"))
        }
        _ => fts_config::load_defaults(),
    }
}

/// Postgres when the configured env var resolves, otherwise in-memory.
async fn select_store(cfg: &ServiceConfig) -> anyhow::Result<state::SharedStore> {
    let secrets = fts_config::resolve_secrets(cfg);
    match secrets.database_url.as_deref() {
        Some(url) => {
            let pool = fts_db::connect(url, cfg.store.max_connections).await?;
            fts_db::migrate(&pool).await?;
            info!(max_connections = cfg.store.max_connections, "using postgres aggregate store");
            Ok(Arc::new(PgAggregateStore::new(pool)))
        }
        None => {
            warn!(
                env = %secrets.database_url_env,
                "database url not set; aggregates are kept in memory and lost on exit"
            );
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

fn bind_addr(cfg: &ServiceConfig) -> anyhow::Result<SocketAddr> {
    let raw = std::env::var(ENV_DAEMON_ADDR).unwrap_or_else(|_| cfg.daemon.bind_addr.clone());
    raw.parse()
        .with_context(|| format!("invalid bind address: {raw}"))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("ctrl-c handler unavailable; shutdown only by kill");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
