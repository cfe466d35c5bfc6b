use std::sync::Arc;

use limitd::config::watcher::{DirectoryRuntime, Runtime};
use limitd::config::Settings;
use limitd::limiter::fixed_window::FixedWindowLimiter;
use limitd::limiter::{JitterSource, RandomJitterSource, SystemTimeSource, TimeSource};
use limitd::redis::client::RedisCounterStore;
use limitd::redis::pool::create_redis_pool;
use limitd::redis::CounterStore;
use limitd::{RateLimitService, ServerConfig};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "limitd=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("rate limit service starting");

    let settings = Settings::from_env();

    tracing::info!("initializing redis connection pool");
    let pool = create_redis_pool(&settings.redis)?;
    let store: Arc<dyn CounterStore> = Arc::new(RedisCounterStore::new(pool.clone()));
    store.ping().await?;
    let stats = limitd::redis::pool::pool_stats(&pool);
    tracing::info!(size = stats.size, max_size = stats.max_size, "redis connection verified");

    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let jitter: Arc<dyn JitterSource> = Arc::new(RandomJitterSource::new());
    let mut limiter = FixedWindowLimiter::new(store, time, jitter)
        .with_expiration_jitter(settings.expiration_jitter_max_seconds);

    if let Some(per_second_settings) = &settings.redis_per_second {
        tracing::info!("initializing per-second redis connection pool");
        let per_second_pool = create_redis_pool(per_second_settings)?;
        let per_second_store: Arc<dyn CounterStore> =
            Arc::new(RedisCounterStore::new(per_second_pool));
        per_second_store.ping().await?;
        limiter = limiter.with_per_second_store(per_second_store);
    }

    let runtime: Arc<dyn Runtime> = Arc::new(DirectoryRuntime::new(&settings.runtime_path)?);
    let service = RateLimitService::new(
        runtime,
        Arc::new(limiter),
        settings.shadow_mode,
        settings.runtime_watch_root,
    );

    // Held for the process lifetime; dropping it would stop the reloader.
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    service.spawn_reloader(shutdown_rx);

    let metrics_port = settings.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = limitd::metrics_server::start_metrics_server(metrics_port).await {
            tracing::error!("metrics server failed: {}", e);
        }
    });

    let server_config = ServerConfig::from_env();
    tracing::info!("gRPC server will listen on {}", server_config.addr());
    limitd::server::start_server(server_config, service).await?;

    Ok(())
}
