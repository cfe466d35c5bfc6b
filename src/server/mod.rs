pub mod handler;

use std::sync::Arc;

use tonic::transport::Server;
use tracing::info;

use crate::errors::{RateLimitError, Result};
use crate::generated::rate_limit_service_server::RateLimitServiceServer;
use crate::service::RateLimitService;

/// gRPC server configuration
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("GRPC_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("GRPC_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(50051),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serve the rate limit service until the process exits.
pub async fn start_server(config: ServerConfig, service: Arc<RateLimitService>) -> Result<()> {
    let addr = config
        .addr()
        .parse()
        .map_err(|e| RateLimitError::Internal(format!("invalid server address: {}", e)))?;

    info!("starting gRPC server on {}", addr);

    let handler = handler::RateLimitHandler::new(service);
    Server::builder()
        .add_service(RateLimitServiceServer::new(handler))
        .serve(addr)
        .await
        .map_err(|e| RateLimitError::Internal(format!("server error: {}", e)))?;

    Ok(())
}
