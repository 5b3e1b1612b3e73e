//! Shared gRPC plumbing: status mapping and interceptors.

pub mod error;
pub mod interceptors;

pub use error::IntoStatus;
pub use interceptors::{extract_request_id, extract_traceparent, trace_context_interceptor};

