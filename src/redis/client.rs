use async_trait::async_trait;
use deadpool_redis::Pool;
use tracing::debug;

use crate::errors::{RateLimitError, Result};
use crate::redis::{CounterIncrement, CounterStore};

/// Counter store over a pooled Redis connection.
///
/// Windows are plain integer keys: `INCRBY` creates-or-adds atomically, and
/// `EXPIRE .. NX` arms the TTL on first touch only, so an existing window
/// keeps its original deadline. All increments of a call share one
/// pipeline, one round trip.
pub struct RedisCounterStore {
    pool: Pool,
}

impl RedisCounterStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, increments: &[CounterIncrement]) -> Result<Vec<u64>> {
        if increments.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::backend(format!("failed to get connection: {}", e)))?;

        let mut pipe = redis::pipe();
        for inc in increments {
            pipe.cmd("INCRBY").arg(&inc.key).arg(inc.amount);
            pipe.cmd("EXPIRE")
                .arg(&inc.key)
                .arg(inc.ttl_seconds)
                .arg("NX")
                .ignore();
        }

        debug!(increments = increments.len(), "pipelining counter increments");
        let post_counts: Vec<u64> = pipe.query_async(&mut *conn).await?;

        if post_counts.len() != increments.len() {
            return Err(RateLimitError::backend(format!(
                "store returned {} responses for {} increments",
                post_counts.len(),
                increments.len()
            )));
        }
        Ok(post_counts)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::backend(format!("failed to get connection: {}", e)))?;
        let response: String = redis::cmd("PING").query_async(&mut *conn).await?;
        if response != "PONG" {
            return Err(RateLimitError::backend(format!(
                "unexpected PING response: {}",
                response
            )));
        }
        Ok(())
    }
}
