use thiserror::Error;
use tonic::{Code, Status};

#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Structural problem in a configuration blob. Only the reload path
    /// observes these; the previous configuration stays live.
    #[error("configuration error: {0}")]
    Config(String),

    /// Counter store unreachable, protocol fault, or cancelled call.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Request-level validation failure.
    #[error("{0}")]
    Service(String),

    /// Process-level fault during bootstrap or serving.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RateLimitError {
    /// Fold a non-protocol backend fault (pool exhaustion, bad reply shape)
    /// into the redis error kind so callers see a single backend error.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        RateLimitError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "backend error",
            err.to_string(),
        )))
    }
}

impl From<RateLimitError> for Status {
    fn from(value: RateLimitError) -> Self {
        match value {
            RateLimitError::Config(msg) => {
                Status::new(Code::Internal, format!("configuration error: {}", msg))
            }
            RateLimitError::Redis(err) => {
                Status::new(Code::Unavailable, format!("redis error: {}", err))
            }
            RateLimitError::Service(msg) => Status::new(Code::InvalidArgument, msg),
            RateLimitError::Internal(msg) => {
                Status::new(Code::Internal, format!("internal error: {}", msg))
            }
        }
    }
}

/// Result type alias for rate limiter operations
pub type Result<T> = std::result::Result<T, RateLimitError>;
