use std::sync::Arc;

use tracing::debug;

use crate::config::{RateLimit, RateLimitUnit};
use crate::errors::Result;
use crate::generated::rate_limit_response::{Code, DescriptorStatus};
use crate::generated::RateLimitRequest;
use crate::limiter::{counter_key, seconds_until_reset, window_start, JitterSource, TimeSource};
use crate::redis::{CounterIncrement, CounterStore};

/// Fixed-window evaluator over one or two counter stores.
///
/// Stateless apart from its collaborators: each call captures `now` once,
/// pipelines every chargeable descriptor, and maps post-counts back onto
/// per-descriptor verdicts. The increment is unconditional — a request that
/// pushes a counter past its limit still consumes its units, and later
/// requests in the window find it already spent.
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    per_second_store: Option<Arc<dyn CounterStore>>,
    time: Arc<dyn TimeSource>,
    jitter: Arc<dyn JitterSource>,
    jitter_max_seconds: u64,
}

impl FixedWindowLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        time: Arc<dyn TimeSource>,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            store,
            per_second_store: None,
            time,
            jitter,
            jitter_max_seconds: 0,
        }
    }

    /// Route per-second windows to a dedicated store.
    pub fn with_per_second_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.per_second_store = Some(store);
        self
    }

    /// Spread window expirations by up to `max` extra seconds.
    pub fn with_expiration_jitter(mut self, max: u64) -> Self {
        self.jitter_max_seconds = max;
        self
    }

    /// Evaluate every descriptor of `request` against its resolved limit.
    ///
    /// `limits` is parallel to `request.descriptors`; `None` means no limit
    /// applies. The result is parallel to both. A store fault anywhere
    /// aborts the call — no partial statuses.
    pub async fn do_limit(
        &self,
        request: &RateLimitRequest,
        limits: &[Option<Arc<RateLimit>>],
    ) -> Result<Vec<DescriptorStatus>> {
        debug_assert_eq!(request.descriptors.len(), limits.len());

        let now = self.time.unix_now();
        let hits = match request.hits_addend {
            0 => 1,
            n => u64::from(n),
        };

        let mut statuses: Vec<Option<DescriptorStatus>> = vec![None; request.descriptors.len()];
        let mut default_indexes = Vec::new();
        let mut default_increments = Vec::new();
        let mut second_indexes = Vec::new();
        let mut second_increments = Vec::new();

        for (i, descriptor) in request.descriptors.iter().enumerate() {
            let Some(limit) = &limits[i] else {
                statuses[i] = Some(DescriptorStatus {
                    code: Code::Ok as i32,
                    current_limit: None,
                    limit_remaining: 0,
                    duration_until_reset: 0,
                });
                continue;
            };
            // The loader rejects zero quotas; hitting one here is a bug.
            assert!(limit.requests_per_unit > 0);

            if limit.unlimited {
                statuses[i] = Some(DescriptorStatus {
                    code: Code::Ok as i32,
                    current_limit: Some(limit.to_proto()),
                    limit_remaining: limit.requests_per_unit,
                    duration_until_reset: 0,
                });
                continue;
            }

            let unit_seconds = limit.unit.as_seconds();
            let window = window_start(now, unit_seconds);
            let increment = CounterIncrement {
                key: counter_key(&request.domain, &descriptor.entries, window),
                amount: hits,
                ttl_seconds: unit_seconds + self.jitter.next_jitter(self.jitter_max_seconds),
            };
            if self.per_second_store.is_some() && limit.unit == RateLimitUnit::Second {
                second_indexes.push(i);
                second_increments.push(increment);
            } else {
                default_indexes.push(i);
                default_increments.push(increment);
            }
        }

        let (default_counts, second_counts) = match &self.per_second_store {
            Some(per_second) => {
                let (default, second) = tokio::join!(
                    increment_if_any(&self.store, &default_increments),
                    increment_if_any(per_second, &second_increments),
                );
                (default?, second?)
            }
            None => (
                increment_if_any(&self.store, &default_increments).await?,
                Vec::new(),
            ),
        };

        for (batch_indexes, batch_counts) in [
            (&default_indexes, default_counts),
            (&second_indexes, second_counts),
        ] {
            assert_eq!(batch_indexes.len(), batch_counts.len());
            for (&i, post_count) in batch_indexes.iter().zip(batch_counts) {
                let limit = limits[i]
                    .as_ref()
                    .expect("batched descriptors always carry a limit");
                statuses[i] = Some(status_for(limit, post_count, now));
            }
        }

        let statuses: Vec<DescriptorStatus> = statuses
            .into_iter()
            .map(|s| s.expect("every descriptor produced a status"))
            .collect();
        debug!(
            descriptors = statuses.len(),
            over_limit = statuses
                .iter()
                .filter(|s| s.code == Code::OverLimit as i32)
                .count(),
            "rate limit evaluation complete"
        );
        Ok(statuses)
    }
}

/// Requests whose descriptors all resolve to null or unlimited limits must
/// not touch the backend at all.
async fn increment_if_any(
    store: &Arc<dyn CounterStore>,
    increments: &[CounterIncrement],
) -> Result<Vec<u64>> {
    if increments.is_empty() {
        return Ok(Vec::new());
    }
    store.increment(increments).await
}

fn status_for(limit: &RateLimit, post_count: u64, now: u64) -> DescriptorStatus {
    let quota = u64::from(limit.requests_per_unit);
    let duration_until_reset = seconds_until_reset(now, limit.unit.as_seconds()) as u32;
    if post_count > quota {
        DescriptorStatus {
            code: Code::OverLimit as i32,
            current_limit: Some(limit.to_proto()),
            limit_remaining: 0,
            duration_until_reset,
        }
    } else {
        DescriptorStatus {
            code: Code::Ok as i32,
            current_limit: Some(limit.to_proto()),
            limit_remaining: (quota - post_count) as u32,
            duration_until_reset,
        }
    }
}
