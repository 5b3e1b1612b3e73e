//! gRPC module for receivables-service.

mod convert;
mod service;

pub use service::ReceivablesServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("micros.receivables.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("receivables_descriptor");
}
