//! Invoice return model for receivables-service.

use crate::models::PaymentMethod;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Return workflow state. `Refunded` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    PendingRefund,
    Refunded,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::PendingRefund => "pending_refund",
            ReturnStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "refunded" => ReturnStatus::Refunded,
            _ => ReturnStatus::PendingRefund,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceReturn {
    pub return_id: Uuid,
    pub tenant_id: Uuid,
    pub return_number: String,
    pub invoice_id: Uuid,
    pub customer_id: Uuid,
    pub reason: String,
    pub refund_amount: Decimal,
    pub is_full_return: bool,
    pub status: String,
    pub refund_payment_id: Option<Uuid>,
    pub refund_method: String,
    /// Informational; settlement always pays out cash when the invoice is overpaid.
    pub create_refund_payment: bool,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub refunded_utc: Option<DateTime<Utc>>,
    pub exported_utc: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    pub items: Vec<InvoiceReturnItem>,
}

impl InvoiceReturn {
    pub fn status(&self) -> ReturnStatus {
        ReturnStatus::from_string(&self.status)
    }

    pub fn refund_method(&self) -> PaymentMethod {
        PaymentMethod::from_string(&self.refund_method)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceReturnItem {
    pub return_item_id: Uuid,
    pub tenant_id: Uuid,
    pub return_id: Uuid,
    pub invoice_item_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub unit: String,
    pub unit_price: Decimal,
    pub quantity_returned: Decimal,
    pub subtotal: Decimal,
    pub restore_inventory: bool,
}

/// One requested line of a return.
#[derive(Debug, Clone)]
pub struct CreateReturnItem {
    pub invoice_item_id: Uuid,
    pub quantity: Decimal,
    pub restore_inventory: bool,
}

/// Input for creating a return.
#[derive(Debug, Clone)]
pub struct CreateReturn {
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub items: Vec<CreateReturnItem>,
    pub reason: String,
    /// Defaults to the sum of line subtotals.
    pub refund_amount: Option<Decimal>,
    pub create_refund_payment: bool,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

/// Input for moving a return along its workflow.
#[derive(Debug, Clone)]
pub struct UpdateReturnStatus {
    pub tenant_id: Uuid,
    pub return_id: Uuid,
    pub status: ReturnStatus,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

/// Per-line quantities still eligible for return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableReturnQuantity {
    pub invoice_item_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub unit: String,
    pub unit_price: Decimal,
    pub original_quantity: Decimal,
    pub already_returned: Decimal,
    pub available_for_return: Decimal,
    pub allows_decimal: bool,
}
