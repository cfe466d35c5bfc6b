use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use limitd::config::watcher::{Runtime, StaticRuntime};
use limitd::errors::{RateLimitError, Result};
use limitd::generated::rate_limit_descriptor::Entry;
use limitd::generated::rate_limit_response::Code;
use limitd::generated::{RateLimitDescriptor, RateLimitRequest};
use limitd::limiter::fixed_window::FixedWindowLimiter;
use limitd::limiter::{JitterSource, TimeSource};
use limitd::redis::{CounterIncrement, CounterStore};
use limitd::RateLimitService;
use tokio::sync::watch;

/// In-memory stand-in for the Redis counter store.
#[derive(Default)]
struct MemoryStore {
    counters: Mutex<HashMap<String, u64>>,
    offline: AtomicBool,
}

impl MemoryStore {
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, increments: &[CounterIncrement]) -> Result<Vec<u64>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RateLimitError::backend("store offline"));
        }
        let mut counters = self.counters.lock().unwrap();
        Ok(increments
            .iter()
            .map(|inc| {
                let slot = counters.entry(inc.key.clone()).or_insert(0);
                *slot += inc.amount;
                *slot
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct TestClock(AtomicU64);

impl TimeSource for TestClock {
    fn unix_now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

struct NoJitter;

impl JitterSource for NoJitter {
    fn next_jitter(&self, _max: u64) -> u64 {
        0
    }
}

struct Harness {
    runtime: Arc<StaticRuntime>,
    store: Arc<MemoryStore>,
    clock: Arc<TestClock>,
    service: Arc<RateLimitService>,
}

fn harness(config: &str, shadow_mode: bool) -> Harness {
    let runtime = Arc::new(StaticRuntime::default());
    runtime.set("config.test.yaml", config);
    let store = Arc::new(MemoryStore::default());
    let clock = Arc::new(TestClock(AtomicU64::new(1_700_000_000)));
    let limiter = FixedWindowLimiter::new(
        Arc::clone(&store) as Arc<dyn CounterStore>,
        Arc::clone(&clock) as Arc<dyn TimeSource>,
        Arc::new(NoJitter),
    );
    let service = RateLimitService::new(
        Arc::clone(&runtime) as Arc<dyn Runtime>,
        Arc::new(limiter),
        shadow_mode,
        true,
    );
    Harness {
        runtime,
        store,
        clock,
        service,
    }
}

fn entry(key: &str, value: &str) -> Entry {
    Entry {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn descriptor(entries: Vec<Entry>) -> RateLimitDescriptor {
    RateLimitDescriptor { entries }
}

fn request(domain: &str, descriptors: Vec<RateLimitDescriptor>) -> RateLimitRequest {
    RateLimitRequest {
        domain: domain.to_string(),
        descriptors,
        hits_addend: 1,
    }
}

const SINGLE_LIMIT: &str = "\
domain: d
descriptors:
  - key: k
    value: v
    rate_limit:
      unit: minute
      requests_per_unit: 2
";

#[tokio::test]
async fn single_limit_exhausts_within_one_window() {
    let h = harness(SINGLE_LIMIT, false);
    let req = request("d", vec![descriptor(vec![entry("k", "v")])]);

    let expectations = [
        (Code::Ok, 1u32),
        (Code::Ok, 0),
        (Code::OverLimit, 0),
    ];
    for (code, remaining) in expectations {
        let response = h.service.should_rate_limit(&req).await.unwrap();
        let overall = if code == Code::OverLimit {
            Code::OverLimit
        } else {
            Code::Ok
        };
        assert_eq!(response.overall_code, overall as i32);
        assert_eq!(response.statuses[0].code, code as i32);
        assert_eq!(response.statuses[0].limit_remaining, remaining);
    }
}

#[tokio::test]
async fn wildcard_fallback_prefers_specific_value() {
    let config = "\
domain: d
descriptors:
  - key: k
    rate_limit:
      unit: second
      requests_per_unit: 5
  - key: k
    value: special
    rate_limit:
      unit: second
      requests_per_unit: 1
";
    let h = harness(config, false);

    let special = h
        .service
        .should_rate_limit(&request("d", vec![descriptor(vec![entry("k", "special")])]))
        .await
        .unwrap();
    let special_limit = special.statuses[0].current_limit.unwrap();
    assert_eq!(special_limit.requests_per_unit, 1);

    let other = h
        .service
        .should_rate_limit(&request("d", vec![descriptor(vec![entry("k", "other")])]))
        .await
        .unwrap();
    let other_limit = other.statuses[0].current_limit.unwrap();
    assert_eq!(other_limit.requests_per_unit, 5);
}

#[tokio::test]
async fn multi_descriptor_requests_aggregate_to_over_limit() {
    let config = "\
domain: d
descriptors:
  - key: a
    rate_limit:
      unit: minute
      requests_per_unit: 10
  - key: b
    rate_limit:
      unit: minute
      requests_per_unit: 1
";
    let h = harness(config, false);
    let req = request(
        "d",
        vec![
            descriptor(vec![entry("a", "x")]),
            descriptor(vec![entry("b", "y")]),
        ],
    );

    let first = h.service.should_rate_limit(&req).await.unwrap();
    assert_eq!(first.overall_code, Code::Ok as i32);
    assert_eq!(first.statuses[0].limit_remaining, 9);
    assert_eq!(first.statuses[1].limit_remaining, 0);

    let second = h.service.should_rate_limit(&req).await.unwrap();
    assert_eq!(second.overall_code, Code::OverLimit as i32);
    assert_eq!(second.statuses[0].limit_remaining, 8);
    assert_eq!(second.statuses[1].code, Code::OverLimit as i32);
}

#[tokio::test]
async fn shadow_mode_reports_ok_but_keeps_descriptor_verdicts() {
    let h = harness(SINGLE_LIMIT, true);
    let req = request("d", vec![descriptor(vec![entry("k", "v")])]);

    for _ in 0..2 {
        let response = h.service.should_rate_limit(&req).await.unwrap();
        assert_eq!(response.overall_code, Code::Ok as i32);
        assert_eq!(response.statuses[0].code, Code::Ok as i32);
    }

    let third = h.service.should_rate_limit(&req).await.unwrap();
    assert_eq!(third.overall_code, Code::Ok as i32);
    assert_eq!(third.statuses[0].code, Code::OverLimit as i32);
}

#[tokio::test]
async fn config_reload_applies_new_limits_to_inflight_traffic() {
    let h = harness(SINGLE_LIMIT, false);
    let req = request("d", vec![descriptor(vec![entry("k", "v")])]);

    let first = h.service.should_rate_limit(&req).await.unwrap();
    assert_eq!(first.overall_code, Code::Ok as i32);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reloader = h.service.spawn_reloader(shutdown_rx);

    let relaxed = "\
domain: d
descriptors:
  - key: k
    value: v
    rate_limit:
      unit: minute
      requests_per_unit: 5
";
    h.runtime.set("config.test.yaml", relaxed);

    // Probe the config pointer rather than sending requests, so waiting for
    // the reload does not consume quota.
    let mut reloaded = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let config = h.service.current_config().unwrap();
        let limit = config.get_limit("d", &[entry("k", "v")]);
        if limit.is_some_and(|l| l.requests_per_unit == 5) {
            reloaded = true;
            break;
        }
    }
    assert!(reloaded, "reloader never applied the new configuration");

    // The window counter is keyed independently of the configuration, so
    // the request made under the old config still counts against the new
    // quota: post-count 2 of 5.
    let second = h.service.should_rate_limit(&req).await.unwrap();
    assert_eq!(second.overall_code, Code::Ok as i32);
    assert_eq!(second.statuses[0].limit_remaining, 3);

    shutdown_tx.send(true).unwrap();
    reloader.await.unwrap();
}

#[tokio::test]
async fn backend_failure_is_an_error_without_partial_statuses() {
    let h = harness(SINGLE_LIMIT, false);
    h.store.set_offline(true);

    let err = h
        .service
        .should_rate_limit(&request("d", vec![descriptor(vec![entry("k", "v")])]))
        .await
        .unwrap_err();
    assert!(matches!(err, RateLimitError::Redis(_)));
}

#[tokio::test]
async fn windows_roll_over_with_the_clock() {
    let h = harness(SINGLE_LIMIT, false);
    let req = request("d", vec![descriptor(vec![entry("k", "v")])]);

    for _ in 0..2 {
        h.service.should_rate_limit(&req).await.unwrap();
    }
    let exhausted = h.service.should_rate_limit(&req).await.unwrap();
    assert_eq!(exhausted.overall_code, Code::OverLimit as i32);

    h.clock.0.fetch_add(60, Ordering::SeqCst);
    let fresh = h.service.should_rate_limit(&req).await.unwrap();
    assert_eq!(fresh.overall_code, Code::Ok as i32);
    assert_eq!(fresh.statuses[0].limit_remaining, 1);
}

#[tokio::test]
async fn unknown_domain_is_ok_with_no_limit() {
    let h = harness(SINGLE_LIMIT, false);
    let response = h
        .service
        .should_rate_limit(&request("nowhere", vec![descriptor(vec![entry("k", "v")])]))
        .await
        .unwrap();
    assert_eq!(response.overall_code, Code::Ok as i32);
    assert_eq!(response.statuses[0].current_limit, None);
    assert!(h.store.counters.lock().unwrap().is_empty());
}
