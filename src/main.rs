use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use pantry::{
    cache::CacheStore,
    config,
    engine::Engine,
    registry::{self, RegistryState},
    server,
    tracing::init_tracing,
    upstream::{HttpServer, StorageServer},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .context("usage: pantry <config.json>")?;
    let config = config::load(&config_path)?;

    init_tracing(&config.log_filter);

    let cache = CacheStore::new(config.cache_dir.clone(), config.temp_dir.clone());
    cache.prepare_directories().await.context("preparing cache/temp directories")?;

    let head_timeout = Duration::from_secs(config.head_timeout_secs);
    let get_timeout = Duration::from_secs(config.get_timeout_secs);
    let servers = config
        .upstreams
        .iter()
        .map(|base_url| {
            Arc::new(HttpServer::new(base_url.clone(), head_timeout, get_timeout)) as Arc<dyn StorageServer>
        })
        .collect();

    let engine = Arc::new(Engine::new(cache, servers, config.shard_count));
    let registry_state = Arc::new(RegistryState::new(config.registries.clone()));

    registry::spawn(
        engine.clone(),
        registry_state,
        Duration::from_secs(config.tick_interval_secs),
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    server::serve(listener, engine).await.context("serving")?;
    Ok(())
}
