//! cvg-daemon entry point.
//!
//! Thin: sets up tracing, loads config, opens the stores, resumes unresolved
//! operations, and serves the router from `routes.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use cvg_audit::{ActivityFeed, ActivityLog};
use cvg_config::{
    empty_config, load_layered_yaml, report_unused_keys, ConfigMode, LoadedConfig,
    UnusedKeyPolicy,
};
use cvg_daemon::{routes, state};
use cvg_runtime::{Stores, SubmissionRuntime, SubmissionSettings};
use cvg_transport_http::HttpTransport;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config_from_env()?;
    let unused = report_unused_keys(ConfigMode::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config contains unused keys");
    }
    let cfg = loaded.engine()?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let stores = Stores::open(&cfg.storage)?;
    let transport = HttpTransport::from_config(&cfg.transport)?;
    let runtime = Arc::new(SubmissionRuntime::new(
        Arc::clone(&stores.ledger),
        Arc::new(transport),
        SubmissionSettings::from_config(&cfg.submission),
    ));

    let mut feed = ActivityFeed::new(cfg.activity.capacity);
    if let Some(path) = &cfg.activity.log_path {
        feed = feed.with_sink(ActivityLog::new(path)?);
    }

    let shared = Arc::new(state::AppState::new(
        Arc::clone(&runtime),
        Arc::clone(&stores.reconciler),
        Arc::new(feed),
    ));

    // Bridges first so resumed transitions reach the bus and the feed.
    state::spawn_bridges(&shared);
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let report = runtime.resume();
    info!(
        inspected = report.inspected,
        resumed = report.resumed,
        "startup resumption"
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = match bind_addr_from_env() {
        Some(addr) => addr,
        None => cfg
            .daemon
            .addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid daemon.addr: {}", cfg.daemon.addr))?,
    };
    info!("cvg-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    runtime.shutdown().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `CVG_CONFIG` holds comma-separated YAML layers, base first.
fn load_config_from_env() -> anyhow::Result<LoadedConfig> {
    match std::env::var("CVG_CONFIG") {
        Ok(raw) if !raw.trim().is_empty() => {
            let paths: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            load_layered_yaml(&paths)
        }
        _ => empty_config(),
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("CVG_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler unavailable");
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
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
