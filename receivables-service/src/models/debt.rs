//! Customer debt report model.

use crate::models::Invoice;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open invoices grouped by age in days: `min_days <= age < max_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingBucket {
    pub label: String,
    pub min_days: i64,
    /// `None` for the open-ended oldest bucket.
    pub max_days: Option<i64>,
    pub invoice_count: i32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDebtSummary {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub total_debt: Decimal,
    pub total_revenue: Decimal,
    pub total_returned: Decimal,
    pub net_revenue: Decimal,
    pub total_invoices: i32,
    pub unpaid_invoices: i32,
    pub partially_paid_invoices: i32,
    pub overdue_debt: Decimal,
    pub overdue_invoices: i32,
    pub aging_buckets: Vec<AgingBucket>,
    /// Open invoices, oldest first.
    pub invoices: Vec<Invoice>,
}
