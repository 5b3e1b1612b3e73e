//! Domain models for receivables-service.

mod debt;
mod invoice;
mod invoice_return;
mod payment;

pub use debt::{AgingBucket, CustomerDebtSummary};
pub use invoice::{Invoice, InvoiceBalance, InvoiceItem, InvoiceStatus, LedgerMovement, EPSILON};
pub use invoice_return::{
    AvailableReturnQuantity, CreateReturn, CreateReturnItem, InvoiceReturn, InvoiceReturnItem,
    ReturnStatus, UpdateReturnStatus,
};
pub use payment::{
    AllocationMode, ListPaymentsFilter, ManualAllocation, Payment, PaymentAllocation, PaymentKind,
    PaymentMethod, RecordPayment,
};
