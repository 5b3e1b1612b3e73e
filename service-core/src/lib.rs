//! service-core: configuration, errors, tracing and gRPC plumbing shared by
//! the receivables services.
pub mod config;
pub mod error;
pub mod grpc;
pub mod middleware;
pub mod observability;
