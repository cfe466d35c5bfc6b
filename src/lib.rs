pub mod config;
pub mod errors;
pub mod limiter;
pub mod metrics;
pub mod metrics_server;
pub mod redis;
pub mod server;
pub mod service;
pub mod generated {
    // absolute path relative to crate root:
    include!(concat!(env!("CARGO_MANIFEST_DIR"), "/src/gen/limitd.v1.rs"));
}

// Re-export commonly used types
pub use config::Settings;
pub use errors::{RateLimitError, Result};
pub use server::{start_server, ServerConfig};
pub use service::RateLimitService;
