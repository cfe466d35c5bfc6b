use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use crate::generated::{RateLimitRequest, RateLimitResponse};
use crate::service::RateLimitService;

/// Thin gRPC adapter over the service facade.
pub struct RateLimitHandler {
    service: Arc<RateLimitService>,
}

impl RateLimitHandler {
    pub fn new(service: Arc<RateLimitService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl crate::generated::rate_limit_service_server::RateLimitService for RateLimitHandler {
    async fn should_rate_limit(
        &self,
        request: Request<RateLimitRequest>,
    ) -> Result<Response<RateLimitResponse>, Status> {
        let req = request.into_inner();
        debug!(
            domain = %req.domain,
            descriptors = req.descriptors.len(),
            hits_addend = req.hits_addend,
            "received ShouldRateLimit request"
        );
        let response = self.service.should_rate_limit(&req).await?;
        Ok(Response::new(response))
    }
}
