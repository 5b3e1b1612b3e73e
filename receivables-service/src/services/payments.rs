//! Payment recording and reversal.

use crate::error::LedgerError;
use crate::models::{
    AllocationMode, LedgerMovement, ListPaymentsFilter, Payment, PaymentAllocation, PaymentKind,
    RecordPayment,
};
use crate::services::allocation::{
    check_fifo_capacity, plan_fifo, plan_manual, validate_manual, validate_payment_amount,
    PlannedAllocation,
};
use crate::services::database::{commit, Database};
use crate::services::ledger::{self, AllocationLink, OpenInvoiceScope};
use crate::services::metrics::{
    CASH_AMOUNT_TOTAL, DB_QUERY_DURATION, PAYMENTS_TOTAL, REVERSALS_TOTAL,
};
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

/// Columns of `payments`, in `Payment` field order.
const PAYMENT_COLUMNS: &str = "payment_id, tenant_id, payment_number, customer_id, amount, \
     payment_method, payment_date, notes, created_by, created_utc, reversed_utc, reversal_reason";

impl AllocationMode {
    fn label(&self) -> &'static str {
        match self {
            AllocationMode::Manual(_) => "manual",
            AllocationMode::ConstrainedFifo(_) => "constrained_fifo",
            AllocationMode::AutoFifo => "auto_fifo",
        }
    }
}

/// New payment row; the number is drawn from the tenant's daily sequence
/// unless given.
pub(crate) struct NewPayment<'a> {
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub payment_number: Option<&'a str>,
    pub amount: rust_decimal::Decimal,
    pub payment_method: &'a str,
    pub payment_date: chrono::NaiveDate,
    pub notes: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

pub(crate) async fn insert_payment(
    conn: &mut PgConnection,
    payment: NewPayment<'_>,
) -> Result<Payment, LedgerError> {
    let sql = format!(
        r#"
        INSERT INTO payments (
            payment_id, tenant_id, payment_number, customer_id, amount, payment_method,
            payment_date, notes, created_by
        )
        VALUES ($1, $2, COALESCE($3, next_document_number($2, 'PAY')), $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    );

    let inserted = sqlx::query_as::<_, Payment>(&sql)
        .bind(Uuid::new_v4())
        .bind(payment.tenant_id)
        .bind(payment.payment_number)
        .bind(payment.customer_id)
        .bind(payment.amount)
        .bind(payment.payment_method)
        .bind(payment.payment_date)
        .bind(payment.notes)
        .bind(payment.created_by)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                LedgerError::Database(AppError::Conflict(anyhow::anyhow!(
                    "Payment number already in use"
                )))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e))
                .into(),
        })?;

    Ok(inserted)
}

pub(crate) async fn ensure_customer(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    customer_id: Uuid,
) -> Result<String, LedgerError> {
    sqlx::query_scalar::<_, String>(
        "SELECT name FROM customers WHERE tenant_id = $1 AND customer_id = $2",
    )
    .bind(tenant_id)
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?
    .ok_or_else(|| LedgerError::not_found(format!("Customer {} not found", customer_id)))
}

async fn allocations_for_payments(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    payment_ids: &[Uuid],
) -> Result<Vec<PaymentAllocation>, LedgerError> {
    sqlx::query_as::<_, PaymentAllocation>(
        r#"
        SELECT a.allocation_id, a.tenant_id, a.payment_id, a.invoice_id, a.position, a.amount,
            a.notes, a.created_utc, (p.reversed_utc IS NOT NULL) AS payment_reversed
        FROM payment_allocations a
        JOIN payments p ON p.payment_id = a.payment_id
        WHERE a.tenant_id = $1 AND a.payment_id = ANY($2)
        ORDER BY a.payment_id, a.position
        "#,
    )
    .bind(tenant_id)
    .bind(payment_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to load allocations: {}", e)).into()
    })
}

async fn attach_allocations(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    payments: &mut [Payment],
) -> Result<(), LedgerError> {
    let ids: Vec<Uuid> = payments.iter().map(|p| p.payment_id).collect();
    let mut by_payment: HashMap<Uuid, Vec<PaymentAllocation>> = HashMap::new();
    for allocation in allocations_for_payments(conn, tenant_id, &ids).await? {
        by_payment
            .entry(allocation.payment_id)
            .or_default()
            .push(allocation);
    }
    for payment in payments.iter_mut() {
        payment.allocations = by_payment.remove(&payment.payment_id).unwrap_or_default();
    }
    Ok(())
}

impl Database {
    /// Record a customer payment and allocate it to invoices.
    ///
    /// The allocation mode follows the input: manual amounts, FIFO over the
    /// listed invoices, or FIFO over every exported open invoice.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, customer_id = %input.customer_id))]
    pub async fn record_payment(&self, input: &RecordPayment) -> Result<Payment, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        validate_payment_amount(input.amount)?;
        let mode = input.mode();
        if let AllocationMode::Manual(entries) = &mode {
            validate_manual(entries, input.amount)?;
        }

        let mut tx = self.begin().await?;

        ensure_customer(&mut *tx, input.tenant_id, input.customer_id).await?;

        let payment_date = input
            .payment_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        let mut payment = insert_payment(
            &mut *tx,
            NewPayment {
                tenant_id: input.tenant_id,
                customer_id: input.customer_id,
                payment_number: None,
                amount: input.amount,
                payment_method: input.payment_method.as_str(),
                payment_date,
                notes: input.notes.as_deref(),
                created_by: input.created_by.as_deref(),
            },
        )
        .await?;

        let plan: Vec<PlannedAllocation> = match &mode {
            AllocationMode::Manual(entries) => plan_manual(entries),
            AllocationMode::ConstrainedFifo(invoice_ids) => {
                let open = ledger::lock_open_invoices(
                    &mut *tx,
                    input.tenant_id,
                    input.customer_id,
                    OpenInvoiceScope::Selected(invoice_ids),
                )
                .await?;
                if open.is_empty() {
                    return Err(LedgerError::validation(
                        "None of the selected invoices has an outstanding balance",
                    ));
                }
                plan_fifo(&open, input.amount)
            }
            AllocationMode::AutoFifo => {
                let open = ledger::lock_open_invoices(
                    &mut *tx,
                    input.tenant_id,
                    input.customer_id,
                    OpenInvoiceScope::Exported,
                )
                .await?;
                check_fifo_capacity(&open, input.amount)?;
                plan_fifo(&open, input.amount)
            }
        };

        for (position, planned) in plan.iter().enumerate() {
            let applied = ledger::allocate(
                &mut *tx,
                input.tenant_id,
                planned.invoice_id,
                LedgerMovement::Receipt(planned.amount),
                Some(AllocationLink {
                    payment_id: payment.payment_id,
                    customer_id: input.customer_id,
                    position: position as i32,
                    notes: None,
                }),
            )
            .await?;
            payment.allocations.extend(applied.allocation);
        }

        commit(tx).await?;

        timer.observe_duration();
        PAYMENTS_TOTAL
            .with_label_values(&[input.payment_method.as_str(), mode.label()])
            .inc();
        CASH_AMOUNT_TOTAL
            .with_label_values(&["received"])
            .inc_by(input.amount.to_f64().unwrap_or(0.0));

        info!(
            payment_id = %payment.payment_id,
            payment_number = %payment.payment_number,
            amount = %payment.amount,
            allocated = %payment.allocated(),
            mode = mode.label(),
            allocations = payment.allocations.len(),
            "Payment recorded"
        );

        Ok(payment)
    }

    /// Undo every allocation of a receipt. The payment row is kept and flagged.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn reverse_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<Payment, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reverse_payment"])
            .start_timer();

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::validation("A reversal reason is required"));
        }

        let mut tx = self.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE tenant_id = $1 AND payment_id = $2 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock payment: {}", e)))?
        .ok_or_else(|| LedgerError::not_found(format!("Payment {} not found", payment_id)))?;

        if payment.is_reversed() {
            return Err(LedgerError::illegal_state(format!(
                "Payment {} has already been reversed",
                payment.payment_number
            )));
        }
        if payment.kind() == PaymentKind::Settlement {
            return Err(LedgerError::illegal_state(format!(
                "Payment {} settles a refunded return and cannot be reversed",
                payment.payment_number
            )));
        }

        // Same lock order as FIFO allocation.
        let allocations = sqlx::query_as::<_, PaymentAllocation>(
            r#"
            SELECT a.allocation_id, a.tenant_id, a.payment_id, a.invoice_id, a.position, a.amount,
                a.notes, a.created_utc
            FROM payment_allocations a
            JOIN invoices i ON i.invoice_id = a.invoice_id
            WHERE a.tenant_id = $1 AND a.payment_id = $2
            ORDER BY i.created_utc, i.invoice_id, a.position
            "#,
        )
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load allocations: {}", e))
        })?;

        for allocation in &allocations {
            ledger::allocate(
                &mut *tx,
                tenant_id,
                allocation.invoice_id,
                LedgerMovement::ReceiptReversal(allocation.amount),
                None,
            )
            .await?;
        }

        let mut reversed = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET reversed_utc = NOW(), reversal_reason = $3
            WHERE tenant_id = $1 AND payment_id = $2
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark payment reversed: {}", e))
        })?;

        attach_allocations(&mut *tx, tenant_id, std::slice::from_mut(&mut reversed)).await?;

        commit(tx).await?;

        timer.observe_duration();
        REVERSALS_TOTAL
            .with_label_values(&[reversed.payment_method.as_str()])
            .inc();

        info!(
            payment_number = %reversed.payment_number,
            amount = %reversed.amount,
            invoices = allocations.len(),
            "Payment reversed"
        );

        Ok(reversed)
    }

    /// Get a payment with its allocations.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE tenant_id = $1 AND payment_id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        let payment = match payment {
            Some(mut payment) => {
                attach_allocations(&mut conn, tenant_id, std::slice::from_mut(&mut payment))
                    .await?;
                Some(payment)
            }
            None => None,
        };

        timer.observe_duration();

        Ok(payment)
    }

    /// List payments for a tenant, ordered by id for cursor pagination.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_payments(
        &self,
        tenant_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let limit = filter.limit();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;

        let mut payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {}
            FROM payments p
            WHERE p.tenant_id = $1
              AND ($2::uuid IS NULL OR p.customer_id = $2)
              AND ($3::uuid IS NULL OR EXISTS (
                    SELECT 1 FROM payment_allocations a
                    WHERE a.payment_id = p.payment_id AND a.invoice_id = $3))
              AND ($4::date IS NULL OR p.payment_date >= $4)
              AND ($5::date IS NULL OR p.payment_date <= $5)
              AND ($6 OR p.reversed_utc IS NULL)
              AND ($7::uuid IS NULL OR p.payment_id > $7)
            ORDER BY p.payment_id
            LIMIT $8
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(filter.customer_id)
        .bind(filter.invoice_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.include_reversed)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        attach_allocations(&mut conn, tenant_id, &mut payments).await?;

        timer.observe_duration();

        Ok(payments)
    }

    /// Every allocation booked against an invoice, reversed payments included.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn list_invoice_allocations(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoice_allocations"])
            .start_timer();

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM invoices WHERE tenant_id = $1 AND invoice_id = $2)",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;
        if !exists {
            return Err(LedgerError::not_found(format!(
                "Invoice {} not found",
                invoice_id
            )));
        }

        let allocations = sqlx::query_as::<_, PaymentAllocation>(
            r#"
            SELECT a.allocation_id, a.tenant_id, a.payment_id, a.invoice_id, a.position, a.amount,
                a.notes, a.created_utc, (p.reversed_utc IS NOT NULL) AS payment_reversed
            FROM payment_allocations a
            JOIN payments p ON p.payment_id = a.payment_id
            WHERE a.tenant_id = $1 AND a.invoice_id = $2
            ORDER BY a.created_utc, a.payment_id, a.position
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list allocations: {}", e))
        })?;

        timer.observe_duration();

        Ok(allocations)
    }
}
