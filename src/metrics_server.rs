use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::errors::{RateLimitError, Result};

/// Serve the Prometheus text exposition on `GET /metrics`.
pub async fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RateLimitError::Internal(format!("failed to bind metrics server: {}", e)))?;

    info!("metrics server listening on http://0.0.0.0:{}/metrics", port);

    loop {
        match listener.accept().await {
            Ok((mut socket, _)) => {
                tokio::spawn(async move {
                    let mut buffer = [0u8; 1024];
                    let Ok(_) = socket.read(&mut buffer).await else {
                        return;
                    };
                    let request = String::from_utf8_lossy(&buffer);
                    let response = if request.starts_with("GET /metrics")
                        || request.starts_with("GET / ")
                    {
                        match gather_metrics() {
                            Ok(body) => format!(
                                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                                body.len(),
                                body
                            ),
                            Err(e) => {
                                error!("failed to gather metrics: {}", e);
                                "HTTP/1.1 500 Internal Server Error\r\n\r\n".to_string()
                            }
                        }
                    } else {
                        "HTTP/1.1 404 Not Found\r\n\r\n".to_string()
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
            Err(e) => error!("failed to accept metrics connection: {}", e),
        }
    }
}

fn gather_metrics() -> std::result::Result<String, String> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| format!("failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("metrics are not valid UTF-8: {}", e))
}
