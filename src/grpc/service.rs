//! Admission check service implementation.

use std::sync::Arc;

use tonic::{Response, Status};
use tracing::{debug, instrument};

use super::proto::warden::v1::{
    authorization_server::Authorization, CheckRequest, CheckResponse,
};
use crate::authz::{DecisionEngine, Request};

/// Implementation of the Authorization gRPC interface.
pub struct AuthorizationService {
    /// The decision engine instance
    engine: Arc<DecisionEngine>,
}

impl AuthorizationService {
    /// Create a new AuthorizationService with the given engine.
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl Authorization for AuthorizationService {
    /// Decide whether the described request may proceed.
    ///
    /// Malformed addresses and paths are tolerated: they simply never match
    /// CIDR or route predicates, and the engine fails open on store errors,
    /// so this method only errs on transport problems.
    #[instrument(
        skip(self, request),
        fields(
            authority = %request.get_ref().authority,
            path = %request.get_ref().path,
            method = %request.get_ref().method
        )
    )]
    async fn check(
        &self,
        request: tonic::Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();

        let req = Request {
            remote_address: req.remote_address,
            authority: req.authority,
            path: req.path,
            method: req.method,
        };

        let decision = self.engine.decide(&req).await;

        debug!(
            blocked = decision.blocked,
            remaining = decision.remaining,
            error = decision.error.is_some(),
            "admission check complete"
        );

        Ok(Response::new(CheckResponse {
            allowed: !decision.blocked,
            tokens_remaining: decision.remaining,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::authz::{
        Chain, GlobalLimitProvider, RateLimiter, StopOnBlacklist, StopOnOverLimit,
        StopOnWhitelist,
    };
    use crate::conf::{parse_cidrs, ConfStore, Limit};
    use crate::metrics::NullReporter;
    use crate::store::{MemoryStore, Store};

    fn test_engine(blacklist: &[&str], limit_count: u64) -> Arc<DecisionEngine> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let conf = Arc::new(ConfStore::new(
            store.clone(),
            Vec::new(),
            parse_cidrs(blacklist),
            Limit {
                count: limit_count,
                duration: Duration::from_secs(60),
                enabled: true,
            },
            false,
        ));
        let chain = Chain::new(vec![
            Box::new(StopOnWhitelist),
            Box::new(StopOnBlacklist),
            Box::new(StopOnOverLimit::new(RateLimiter::new(
                store,
                Box::new(GlobalLimitProvider),
            ))),
        ]);
        Arc::new(DecisionEngine::new(chain, conf, Arc::new(NullReporter)))
    }

    fn check_request(addr: &str) -> tonic::Request<CheckRequest> {
        tonic::Request::new(CheckRequest {
            remote_address: addr.to_string(),
            authority: "example.com".to_string(),
            path: "/api/foo".to_string(),
            method: "GET".to_string(),
        })
    }

    #[tokio::test]
    async fn test_allowed_request_reports_remaining_tokens() {
        let service = AuthorizationService::new(test_engine(&[], 3));

        let response = service
            .check(check_request("192.168.1.2"))
            .await
            .unwrap()
            .into_inner();

        assert!(response.allowed);
        assert_eq!(response.tokens_remaining, 2);
    }

    #[tokio::test]
    async fn test_blacklisted_client_is_denied() {
        let service = AuthorizationService::new(test_engine(&["12.0.0.0/8"], 3));

        let response = service
            .check(check_request("12.0.0.1"))
            .await
            .unwrap()
            .into_inner();

        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn test_over_limit_client_is_denied() {
        let service = AuthorizationService::new(test_engine(&[], 1));

        let first = service
            .check(check_request("192.168.1.2"))
            .await
            .unwrap()
            .into_inner();
        let second = service
            .check(check_request("192.168.1.2"))
            .await
            .unwrap()
            .into_inner();

        assert!(first.allowed);
        assert!(!second.allowed);
        assert_eq!(second.tokens_remaining, 0);
    }

    #[tokio::test]
    async fn test_unparseable_address_is_tolerated() {
        let service = AuthorizationService::new(test_engine(&["0.0.0.0/0"], 3));

        let response = service
            .check(check_request("not-an-address"))
            .await
            .unwrap()
            .into_inner();

        // Never matches the blacklist, still rate-limited under the raw key.
        assert!(response.allowed);
        assert_eq!(response.tokens_remaining, 2);
    }
}
