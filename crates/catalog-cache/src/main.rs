//! Subscriber worker: consumes catalog domain events (audit trail, dependent
//! cache invalidation) and serves `/health` and `/metrics`.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, put},
};
use catalog_cache::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use catalog_cache::{
    AppConfig, AuditLogHandler, CacheClient, CacheInvalidationHandler, EventSubscriber,
    RateLimitState, RateLimiter, create_cache_client, metrics, observability,
    rate_limit::rate_limit_middleware,
};
use serde::Deserialize;
use tokio::task::JoinHandle;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From CATALOG_CACHE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (catalog-cache.toml, optional)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (CATALOG_CACHE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    observability::init_tracing(&cfg.logging);
    tracing::info!(
        path = config_path.as_deref().unwrap_or(DEFAULT_CONFIG_FILE),
        source = %source,
        "Configuration loaded"
    );

    if let Err(e) = run(cfg).await {
        tracing::error!(error = %format!("{e:#}"), "worker failed");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    metrics::init_metrics();

    let client = create_cache_client(&cfg.redis).await;
    let subscribers = start_subscribers(&cfg, &client).await?;

    let mut app = admin_router(client.clone());
    if cfg.rate_limit.enabled {
        let limiter = RateLimiter::new(client.clone(), cfg.rate_limit.window(), cfg.rate_limit.limit);
        let state = RateLimitState::new(limiter, cfg.rate_limit.window(), cfg.rate_limit.limit)
            .per_endpoint(cfg.rate_limit.per_endpoint);
        app = app.layer(middleware::from_fn_with_state(state, rate_limit_middleware));
    }

    let addr = cfg.server.addr().map_err(anyhow::Error::msg)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, mode = client.mode(), "catalog cache worker listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await
    .context("admin server error")?;

    for task in subscribers {
        task.abort();
    }
    Ok(())
}

async fn start_subscribers(cfg: &AppConfig, client: &CacheClient) -> anyhow::Result<Vec<JoinHandle<()>>> {
    if !cfg.events.enabled {
        tracing::info!("event subscribers disabled");
        return Ok(Vec::new());
    }

    let invalidation = Arc::new(CacheInvalidationHandler::new(client.clone()));

    let domain = EventSubscriber::new(client.clone())
        .with_retry_policy(cfg.events.retry_policy())
        .with_handler(Arc::new(AuditLogHandler))
        .with_handler(invalidation.clone())
        .start(&cfg.events.channel)
        .await?;

    let notices = EventSubscriber::new(client.clone())
        .with_retry_policy(cfg.events.retry_policy())
        .with_handler(invalidation)
        .start(&cfg.events.invalidation_channel)
        .await?;

    Ok(vec![domain, notices])
}

fn admin_router(client: CacheClient) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/admin/log-level", put(set_log_level))
        .with_state(client)
}

async fn health(State(client): State<CacheClient>) -> impl IntoResponse {
    let available = client.is_available().await;
    let status = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if available { "ok" } else { "degraded" },
            "cache_mode": client.mode(),
        })),
    )
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, "metrics not initialized".to_string()),
    }
}

#[derive(Deserialize)]
struct LogLevel {
    level: String,
}

async fn set_log_level(Json(body): Json<LogLevel>) -> StatusCode {
    observability::apply_logging_level(&body.level);
    tracing::info!(level = %body.level, "log level changed");
    StatusCode::NO_CONTENT
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: CATALOG_CACHE_CONFIG
/// 3. Default: catalog-cache.toml if present, otherwise built-in defaults
fn resolve_config_path() -> (Option<String>, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (Some(path), ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("CATALOG_CACHE_CONFIG")
        && !path.is_empty()
    {
        return (Some(path), ConfigSource::EnvironmentVariable);
    }

    (None, ConfigSource::Default)
}
