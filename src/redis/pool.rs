use deadpool::managed::PoolConfig as DeadpoolPoolConfig;
use deadpool_redis::{Config as DeadpoolRedisConfig, Pool, Runtime};
use std::time::Duration;
use tracing::info;

use crate::config::RedisSettings;
use crate::errors::{RateLimitError, Result};

/// Create a Redis connection pool. Connections are established lazily;
/// callers probe liveness through the counter store's ping.
pub fn create_redis_pool(settings: &RedisSettings) -> Result<Pool> {
    let mut cfg = DeadpoolRedisConfig::from_url(settings.connection_url());

    let mut pool_cfg = DeadpoolPoolConfig::new(settings.max_connections);
    pool_cfg.timeouts.wait = Some(Duration::from_secs(settings.connection_timeout_secs));
    pool_cfg.timeouts.create = Some(Duration::from_secs(settings.connection_timeout_secs));
    cfg.pool = Some(pool_cfg);

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RateLimitError::backend(format!("pool creation failed: {}", e)))?;

    info!(
        max_connections = settings.max_connections,
        "redis connection pool created"
    );

    Ok(pool)
}

/// Point-in-time pool usage, for logging and health endpoints.
pub fn pool_stats(pool: &Pool) -> PoolStats {
    let status = pool.status();
    PoolStats {
        size: status.size,
        available: status.available,
        max_size: status.max_size,
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: usize,
    pub available: usize,
    pub max_size: usize,
}
