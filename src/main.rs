mod api;
mod auth;
mod config;
mod engine;
mod error;
mod geo;
mod models;
mod observability;
mod realtime;
mod state;
mod store;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};
use crate::store::cache::{run_cache_sweeper, KeyValueCache, MemoryCache};
use crate::store::orders::InMemoryOrderStore;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let cache = build_cache(&config)?;
    tokio::spawn(run_cache_sweeper(cache.clone(), config.cache_sweep_interval));

    let shared_state = Arc::new(state::AppState::new(
        &config,
        cache,
        Arc::new(InMemoryOrderStore::new()),
    ));

    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

#[cfg(feature = "redis")]
fn build_cache(config: &Config) -> Result<Arc<dyn KeyValueCache>, error::AppError> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!("using redis position cache");
            Ok(Arc::new(store::cache::RedisCache::new(url)?))
        }
        None => Ok(Arc::new(MemoryCache::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn build_cache(config: &Config) -> Result<Arc<dyn KeyValueCache>, error::AppError> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-memory cache");
    }
    Ok(Arc::new(MemoryCache::new()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
