//! gRPC front-end for the admission check API.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::AuthorizationService;

// Include the generated protobuf code
pub mod proto {
    pub mod warden {
        pub mod v1 {
            tonic::include_proto!("warden.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::warden::v1::{
    authorization_server::AuthorizationServer, CheckRequest, CheckResponse,
};
