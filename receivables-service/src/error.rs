//! Error taxonomy for the receivables ledger.

use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use thiserror::Error;
use tonic::Status;

/// Every failure a ledger operation can report.
///
/// All rule checks run before the first write; any error drops the
/// surrounding transaction, so a failed call leaves no partial effect.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed input: non-positive amounts, empty reasons or item lists,
    /// duplicate lines, fractional quantities on whole-unit items.
    #[error("{0}")]
    Validation(String),

    /// An amount exceeds what the target can absorb.
    #[error("{0}")]
    OverAllocation(String),

    #[error("{0}")]
    NotFound(String),

    /// The entity's current state forbids the operation.
    #[error("{0}")]
    IllegalStateTransition(String),

    #[error(transparent)]
    Database(#[from] AppError),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn over_allocation(msg: impl Into<String>) -> Self {
        LedgerError::OverAllocation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        LedgerError::NotFound(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        LedgerError::IllegalStateTransition(msg.into())
    }

    /// Label for `receivables_errors_total` and the gRPC status counter.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::OverAllocation(_) => "over_allocation",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::IllegalStateTransition(_) => "illegal_state_transition",
            LedgerError::Database(_) => "db_error",
        }
    }
}

impl From<LedgerError> for Status {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => Status::invalid_argument(msg),
            LedgerError::OverAllocation(msg) => Status::failed_precondition(msg),
            LedgerError::NotFound(msg) => Status::not_found(msg),
            LedgerError::IllegalStateTransition(msg) => Status::failed_precondition(msg),
            LedgerError::Database(err) => match err {
                AppError::DatabaseError(_) | AppError::InternalError(_) => {
                    tracing::error!(error = %err, "Ledger storage failure");
                    Status::internal("Internal server error")
                }
                other => other.into_status(),
            },
        }
    }
}
