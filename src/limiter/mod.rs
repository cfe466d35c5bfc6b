pub mod fixed_window;

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::generated::rate_limit_descriptor::Entry;

/// Wall-clock provider, injectable for tests.
pub trait TimeSource: Send + Sync {
    /// Current Unix time in whole seconds.
    fn unix_now(&self) -> u64;
}

pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn unix_now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs()
    }
}

/// Seeded pseudo-random generator for spreading window expirations,
/// injectable for tests.
pub trait JitterSource: Send + Sync {
    /// Uniform value in `[0, max]`.
    fn next_jitter(&self, max: u64) -> u64;
}

pub struct RandomJitterSource {
    rng: Mutex<StdRng>,
}

impl RandomJitterSource {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomJitterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for RandomJitterSource {
    fn next_jitter(&self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        self.rng.lock().unwrap().gen_range(0..=max)
    }
}

/// Aligned start of the window containing `now` for the given unit length.
pub(crate) fn window_start(now: u64, unit_seconds: u64) -> u64 {
    (now / unit_seconds) * unit_seconds
}

/// Seconds until the window containing `now` rolls over.
pub(crate) fn seconds_until_reset(now: u64, unit_seconds: u64) -> u64 {
    window_start(now, unit_seconds) + unit_seconds - now
}

/// Deterministic store key for one (domain, descriptor, window) triple.
/// Replicas must produce identical bytes so their counters coalesce.
pub(crate) fn counter_key(domain: &str, entries: &[Entry], window: u64) -> String {
    let mut key = String::with_capacity(domain.len() + 16 * entries.len() + 12);
    key.push_str(domain);
    for entry in entries {
        key.push('_');
        key.push_str(&entry.key);
        key.push('_');
        key.push_str(&entry.value);
    }
    key.push('_');
    key.push_str(&window.to_string());
    key
}
