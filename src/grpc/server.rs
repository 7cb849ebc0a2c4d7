//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tracing::{error, info};

use super::proto::warden::v1::authorization_server::AuthorizationServer;
use super::service::AuthorizationService;
use crate::authz::DecisionEngine;
use crate::error::{Result, WardenError};

/// gRPC server for the admission check service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The decision engine instance
    engine: Arc<DecisionEngine>,
}

impl GrpcServer {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, engine: Arc<DecisionEngine>) -> Self {
        Self { addr, engine }
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        let service = AuthorizationService::new(self.engine);

        info!(addr = %self.addr, "Starting gRPC server for Authorization");

        Server::builder()
            .add_service(AuthorizationServer::new(service))
            .serve(self.addr)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                WardenError::Grpc(e)
            })
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = AuthorizationService::new(self.engine);

        info!(
            addr = %self.addr,
            "Starting gRPC server for Authorization with graceful shutdown"
        );

        Server::builder()
            .add_service(AuthorizationServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                WardenError::Grpc(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Chain;
    use crate::conf::{ConfStore, Limit};
    use crate::metrics::NullReporter;
    use crate::store::MemoryStore;

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let conf = Arc::new(ConfStore::new(
            Arc::new(MemoryStore::new()),
            Vec::new(),
            Vec::new(),
            Limit::disabled(),
            false,
        ));
        let engine = Arc::new(DecisionEngine::new(
            Chain::new(Vec::new()),
            conf,
            Arc::new(NullReporter),
        ));
        let _server = GrpcServer::new(addr, engine);
    }
}
