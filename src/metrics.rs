use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};

lazy_static! {
    // Request metrics
    pub static ref REQUEST_TIME: Histogram = register_histogram!(
        "rate_limiting_request_time_sec",
        "Rate limiting request times in seconds",
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    ).unwrap();

    pub static ref SERVICE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "rate_limiting_service_errors",
        "Count of different rate limiting errors",
        &["type"]
    ).unwrap();

    pub static ref LIMITED_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "rate_limiting_limited_requests",
        "Total number of requests that have been rate limited",
        &["descriptor_key", "descriptor_value", "limit", "unit"]
    ).unwrap();

    pub static ref SHADOW_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "rate_limiting_shadow_requests",
        "Requests that would have been rate limited outside shadow mode",
        &["descriptor_key", "descriptor_value", "limit", "unit"]
    ).unwrap();

    // Internal call outcomes (the gostats-style scope flattened to labels)
    pub static ref CALL_SHOULD_RATE_LIMIT: IntCounterVec = register_int_counter_vec!(
        "call_should_rate_limit",
        "Internal ShouldRateLimit call outcomes",
        &["result"]
    ).unwrap();

    // Config metrics
    pub static ref CONFIG_LOAD_SUCCESS: IntCounter = register_int_counter!(
        "config_load_success",
        "Successful configuration loads"
    ).unwrap();

    pub static ref CONFIG_LOAD_ERROR: IntCounter = register_int_counter!(
        "config_load_error",
        "Failed configuration loads"
    ).unwrap();

    pub static ref CONFIG_DESCRIPTORS: GaugeVec = register_gauge_vec!(
        "rate_limiting_config_descriptors",
        "Number of configured rate limits per domain",
        &["domain"]
    ).unwrap();
}

/// Observe one request's wall-clock latency.
pub fn record_request_time(seconds: f64) {
    REQUEST_TIME.observe(seconds);
}

/// Record a classified service error (`redis`, `service`, `config_reload`).
pub fn record_service_error(kind: &str) {
    SERVICE_ERRORS.with_label_values(&[kind]).inc();
}

/// Record an internal call outcome (`redis_error`, `service_error`, `shadow_block`).
pub fn record_call_outcome(result: &str) {
    CALL_SHOULD_RATE_LIMIT.with_label_values(&[result]).inc();
}

/// Record a request blocked by a limit.
pub fn record_limited(descriptor_key: &str, descriptor_value: &str, limit: u32, unit: &str) {
    LIMITED_REQUESTS
        .with_label_values(&[descriptor_key, descriptor_value, &limit.to_string(), unit])
        .inc();
}

/// Record a request that a shadowed limit would have blocked.
pub fn record_shadow(descriptor_key: &str, descriptor_value: &str, limit: u32, unit: &str) {
    SHADOW_REQUESTS
        .with_label_values(&[descriptor_key, descriptor_value, &limit.to_string(), unit])
        .inc();
}

/// Record a configuration load attempt.
pub fn record_config_load(success: bool) {
    if success {
        CONFIG_LOAD_SUCCESS.inc();
    } else {
        CONFIG_LOAD_ERROR.inc();
    }
}

/// Publish per-domain limit counts after a successful load.
pub fn set_config_descriptors(counts: &[(String, usize)]) {
    CONFIG_DESCRIPTORS.reset();
    for (domain, count) in counts {
        CONFIG_DESCRIPTORS
            .with_label_values(&[domain])
            .set(*count as f64);
    }
}
