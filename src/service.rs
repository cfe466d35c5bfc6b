//! Request evaluation facade and the configuration reload loop.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::loader::{self, ConfigFile};
use crate::config::watcher::Runtime;
use crate::config::{RateLimit, RateLimitConfig};
use crate::errors::{RateLimitError, Result};
use crate::generated::rate_limit_response::Code;
use crate::generated::{RateLimitDescriptor, RateLimitRequest, RateLimitResponse};
use crate::limiter::fixed_window::FixedWindowLimiter;
use crate::metrics;

/// Keys the reloader considers when the watch root is restricted.
const RUNTIME_ROOT_PREFIX: &str = "config.";

/// The rate limit service facade.
///
/// Owns the single piece of shared mutable state: the configuration
/// pointer. Requests copy the pointer once and evaluate against that
/// immutable snapshot; the reloader swaps in replacements wholesale.
pub struct RateLimitService {
    config: ArcSwapOption<RateLimitConfig>,
    limiter: Arc<FixedWindowLimiter>,
    runtime: Arc<dyn Runtime>,
    shadow_mode: bool,
    runtime_watch_root: bool,
}

impl RateLimitService {
    /// Build the facade and run the initial configuration load.
    ///
    /// A failing initial load is contained exactly like a failing reload:
    /// the service starts without a configuration and every request errors
    /// until the runtime delivers a loadable one.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        limiter: Arc<FixedWindowLimiter>,
        shadow_mode: bool,
        runtime_watch_root: bool,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            config: ArcSwapOption::empty(),
            limiter,
            runtime,
            shadow_mode,
            runtime_watch_root,
        });
        service.reload_config();
        service
    }

    /// Spawn the background reload loop.
    ///
    /// Registers an update channel with the runtime, then re-runs the
    /// loader on every edge. The task lives for the whole process and
    /// exits only when `shutdown` is signalled or its sender is dropped.
    pub fn spawn_reloader(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let (tx, mut updates) = mpsc::unbounded_channel();
        self.runtime.add_update_callback(tx);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("configuration reloader shutting down");
                        break;
                    }
                    edge = updates.recv() => match edge {
                        Some(()) => {
                            debug!("runtime updated, reloading configuration");
                            service.reload_config();
                        }
                        None => {
                            warn!("runtime update channel closed, reloader exiting");
                            break;
                        }
                    },
                }
            }
        })
    }

    /// Load a fresh configuration from the current runtime snapshot,
    /// swapping it in only when the loader accepts it whole.
    fn reload_config(&self) {
        let snapshot = self.runtime.snapshot();
        let files: Vec<ConfigFile> = snapshot
            .keys()
            .filter(|key| !self.runtime_watch_root || key.starts_with(RUNTIME_ROOT_PREFIX))
            .map(|key| ConfigFile {
                name: key.to_string(),
                body: snapshot.get(key).unwrap_or_default().to_string(),
            })
            .collect();

        match loader::load(&files) {
            Ok(new_config) => {
                info!(domains = new_config.domain_count(), "configuration loaded");
                self.config.store(Some(Arc::new(new_config)));
                metrics::record_config_load(true);
            }
            Err(RateLimitError::Config(message)) => {
                metrics::record_config_load(false);
                metrics::record_service_error("config_reload");
                error!("error loading new configuration from runtime: {}", message);
            }
            // The loader only produces config errors; anything else is a
            // bug and takes the reloader down with it.
            Err(other) => panic!("unexpected loader failure: {}", other),
        }
    }

    /// Current configuration snapshot, if one has been loaded.
    pub fn current_config(&self) -> Option<Arc<RateLimitConfig>> {
        self.config.load_full()
    }

    /// Evaluate one request and return the aggregated response.
    pub async fn should_rate_limit(&self, request: &RateLimitRequest) -> Result<RateLimitResponse> {
        let start = Instant::now();
        let result = self.should_rate_limit_worker(request).await;
        metrics::record_request_time(start.elapsed().as_secs_f64());
        result.map_err(dispatch_error)
    }

    async fn should_rate_limit_worker(
        &self,
        request: &RateLimitRequest,
    ) -> Result<RateLimitResponse> {
        if request.domain.is_empty() {
            return Err(RateLimitError::Service(
                "rate limit domain must not be empty".to_string(),
            ));
        }
        if request.descriptors.is_empty() {
            return Err(RateLimitError::Service(
                "rate limit descriptor list must not be empty".to_string(),
            ));
        }
        let config = self.current_config().ok_or_else(|| {
            RateLimitError::Service("no rate limit configuration loaded".to_string())
        })?;

        let limits: Vec<Option<Arc<RateLimit>>> = request
            .descriptors
            .iter()
            .map(|descriptor| config.get_limit(&request.domain, &descriptor.entries))
            .collect();

        let statuses = self.limiter.do_limit(request, &limits).await?;
        assert_eq!(statuses.len(), request.descriptors.len());

        // Record metrics for every over-limit descriptor first, then
        // rewrite the overall code once. A verdict is shadowed when the
        // service-wide flag or the limit's own flag is set; the request
        // only blocks when some over-limit verdict is not shadowed.
        let mut blocked = false;
        for (i, status) in statuses.iter().enumerate() {
            if status.code != Code::OverLimit as i32 {
                continue;
            }
            let limit = limits[i].as_ref();
            let shadowed = self.shadow_mode || limit.is_some_and(|l| l.shadow_mode);
            let (key_label, value_label) = descriptor_labels(&request.descriptors[i]);
            let (quota, unit) = limit
                .map(|l| (l.requests_per_unit, l.unit.as_str()))
                .unwrap_or((0, ""));
            if shadowed {
                debug!(descriptor = %key_label, "shadow mode: suppressing over-limit verdict");
                metrics::record_shadow(&key_label, &value_label, quota, unit);
                metrics::record_call_outcome("shadow_block");
            } else {
                metrics::record_limited(&key_label, &value_label, quota, unit);
                blocked = true;
            }
        }

        let overall_code = if blocked { Code::OverLimit } else { Code::Ok };
        Ok(RateLimitResponse {
            overall_code: overall_code as i32,
            statuses,
        })
    }
}

/// Classify an error into its metric kind before surfacing it.
fn dispatch_error(err: RateLimitError) -> RateLimitError {
    match &err {
        RateLimitError::Redis(_) => {
            metrics::record_call_outcome("redis_error");
            metrics::record_service_error("redis");
        }
        RateLimitError::Service(_) => {
            metrics::record_call_outcome("service_error");
            metrics::record_service_error("service");
        }
        // Config errors never reach the request path; internal errors are
        // bootstrap-only.
        RateLimitError::Config(_) | RateLimitError::Internal(_) => {}
    }
    err
}

/// Stable label projection of a descriptor: keys and values joined
/// independently, in entry order.
fn descriptor_labels(descriptor: &RateLimitDescriptor) -> (String, String) {
    let keys: Vec<&str> = descriptor.entries.iter().map(|e| e.key.as_str()).collect();
    let values: Vec<&str> = descriptor
        .entries
        .iter()
        .map(|e| e.value.as_str())
        .collect();
    (keys.join("_"), values.join("_"))
}
