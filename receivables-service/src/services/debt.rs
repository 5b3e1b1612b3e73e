//! Customer debt reporting.

use crate::error::LedgerError;
use crate::models::{AgingBucket, CustomerDebtSummary, Invoice, EPSILON};
use crate::services::database::Database;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::payments::ensure_customer;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

/// Bucket edges in days; the last bucket is open-ended.
const AGING_EDGES: [(i64, Option<i64>); 4] = [(0, Some(30)), (30, Some(60)), (60, Some(90)), (90, None)];

fn bucket_label(min_days: i64, max_days: Option<i64>) -> String {
    match max_days {
        Some(max) => format!("{}-{}", min_days, max),
        None => format!("{}+", min_days),
    }
}

/// Build the debt report from the customer's exported `pending`/`paid` invoices.
///
/// Revenue figures cover every invoice passed in; debt figures and aging only
/// the ones with something left to pay.
pub fn summarize(
    customer_id: Uuid,
    customer_name: String,
    invoices: Vec<Invoice>,
    now: DateTime<Utc>,
    overdue_after_days: i64,
) -> CustomerDebtSummary {
    let total_revenue: Decimal = invoices.iter().map(|i| i.total).sum();
    let total_returned: Decimal = invoices.iter().map(|i| i.returned_amount).sum();

    let open: Vec<Invoice> = invoices
        .into_iter()
        .filter(|i| i.remaining_amount > Decimal::ZERO)
        .collect();

    let mut aging_buckets: Vec<AgingBucket> = AGING_EDGES
        .iter()
        .map(|&(min_days, max_days)| AgingBucket {
            label: bucket_label(min_days, max_days),
            min_days,
            max_days,
            invoice_count: 0,
            amount: Decimal::ZERO,
        })
        .collect();

    let mut total_debt = Decimal::ZERO;
    let mut unpaid_invoices = 0;
    let mut partially_paid_invoices = 0;
    let mut overdue_debt = Decimal::ZERO;
    let mut overdue_invoices = 0;

    let overdue_before = now - Duration::days(overdue_after_days);
    for invoice in &open {
        total_debt += invoice.remaining_amount;

        if invoice.paid_amount.is_zero() {
            unpaid_invoices += 1;
        } else if invoice.paid_amount > Decimal::ZERO && invoice.remaining_amount > EPSILON {
            partially_paid_invoices += 1;
        }

        if invoice.created_utc < overdue_before {
            overdue_debt += invoice.remaining_amount;
            overdue_invoices += 1;
        }

        let age = (now - invoice.created_utc).num_days().max(0);
        if let Some(bucket) = aging_buckets
            .iter_mut()
            .find(|b| age >= b.min_days && b.max_days.map_or(true, |max| age < max))
        {
            bucket.invoice_count += 1;
            bucket.amount += invoice.remaining_amount;
        }
    }

    CustomerDebtSummary {
        customer_id,
        customer_name,
        total_debt,
        total_revenue,
        total_returned,
        net_revenue: total_revenue - total_returned,
        total_invoices: open.len() as i32,
        unpaid_invoices,
        partially_paid_invoices,
        overdue_debt,
        overdue_invoices,
        aging_buckets,
        invoices: open,
    }
}

impl Database {
    /// Outstanding debt of one customer with aging and revenue totals.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
    pub async fn get_customer_debt_summary(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        overdue_after_days: i64,
    ) -> Result<CustomerDebtSummary, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer_debt_summary"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;

        let customer_name = ensure_customer(&mut *conn, tenant_id, customer_id).await?;

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, invoice_number, customer_id, total, paid_amount,
                refunded_amount, returned_amount, remaining_amount, status, exported_utc,
                created_utc, updated_utc
            FROM invoices
            WHERE tenant_id = $1
              AND customer_id = $2
              AND status IN ('pending', 'paid')
              AND exported_utc IS NOT NULL
            ORDER BY created_utc, invoice_id
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load invoices: {}", e)))?;

        timer.observe_duration();

        Ok(summarize(
            customer_id,
            customer_name,
            invoices,
            Utc::now(),
            overdue_after_days,
        ))
    }
}
