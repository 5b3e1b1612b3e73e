//! Payment model for receivables-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How the cash changed hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Card => "card",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "transfer" => PaymentMethod::Transfer,
            "card" => PaymentMethod::Card,
            _ => PaymentMethod::Cash,
        }
    }
}

/// Direction of a payment, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentKind {
    Receipt,
    Settlement,
}

/// A cash movement between the shop and a customer.
///
/// `amount` is signed: positive for cash received, negative for cash paid out
/// to settle a return. Allocations carry the same sign. A reversed payment
/// keeps its rows; `reversed_utc` and `reversal_reason` record the reversal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub payment_number: String,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub reversed_utc: Option<DateTime<Utc>>,
    pub reversal_reason: Option<String>,
    #[sqlx(skip)]
    pub allocations: Vec<PaymentAllocation>,
}

impl Payment {
    pub fn kind(&self) -> PaymentKind {
        if self.amount < Decimal::ZERO {
            PaymentKind::Settlement
        } else {
            PaymentKind::Receipt
        }
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed_utc.is_some()
    }

    /// Sum of the allocation amounts.
    pub fn allocated(&self) -> Decimal {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

/// The share of a payment applied to one invoice. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAllocation {
    pub allocation_id: Uuid,
    pub tenant_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub position: i32,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    /// True once the owning payment has been reversed.
    #[sqlx(default)]
    pub payment_reversed: bool,
}

/// Caller-chosen amount for one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualAllocation {
    pub invoice_id: Uuid,
    pub amount: Decimal,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub invoice_ids: Vec<Uuid>,
    pub manual_allocations: Vec<ManualAllocation>,
    pub notes: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub created_by: Option<String>,
}

/// Allocation strategy selected by the shape of a [`RecordPayment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationMode {
    /// Exact amounts per invoice, applied in the given order.
    Manual(Vec<ManualAllocation>),
    /// Oldest first, restricted to the listed invoices.
    ConstrainedFifo(Vec<Uuid>),
    /// Oldest first across every exported open invoice of the customer.
    AutoFifo,
}

impl RecordPayment {
    pub fn mode(&self) -> AllocationMode {
        if !self.manual_allocations.is_empty() {
            AllocationMode::Manual(self.manual_allocations.clone())
        } else if !self.invoice_ids.is_empty() {
            AllocationMode::ConstrainedFifo(self.invoice_ids.clone())
        } else {
            AllocationMode::AutoFifo
        }
    }
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default)]
pub struct ListPaymentsFilter {
    pub customer_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub include_reversed: bool,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

impl ListPaymentsFilter {
    pub const DEFAULT_PAGE_SIZE: i64 = 50;
    pub const MAX_PAGE_SIZE: i64 = 100;

    /// Rows per page; non-positive sizes fall back to the default.
    pub fn limit(&self) -> i64 {
        if self.page_size <= 0 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            (self.page_size as i64).min(Self::MAX_PAGE_SIZE)
        }
    }
}
