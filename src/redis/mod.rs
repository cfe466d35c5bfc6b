pub mod client;
pub mod pool;

use async_trait::async_trait;

use crate::errors::Result;

/// One pending counter bump: `INCRBY key, amount` with the window TTL
/// armed on first touch only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterIncrement {
    pub key: String,
    pub amount: u64,
    pub ttl_seconds: u64,
}

/// Capability surface of a counter store.
///
/// One store serves all units by default; a second instance may be wired in
/// to isolate high-frequency per-second keys. Selection by unit happens in
/// the evaluator, not here.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Apply all increments in a single pipelined round trip and return the
    /// post-increment values in submission order. Each increment is atomic;
    /// a fault anywhere fails the whole call.
    async fn increment(&self, increments: &[CounterIncrement]) -> Result<Vec<u64>>;

    /// Liveness probe against the store.
    async fn ping(&self) -> Result<()>;
}
