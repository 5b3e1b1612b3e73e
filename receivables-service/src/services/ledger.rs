//! Allocation writer.
//!
//! Every change to an invoice's financial columns goes through [`allocate`],
//! and every invoice row lock is taken in this module. Callers pass the
//! connection of their open transaction; locks are held until it commits or
//! rolls back.

use crate::error::LedgerError;
use crate::models::{Invoice, InvoiceStatus, LedgerMovement, PaymentAllocation};
use crate::services::metrics::{DB_QUERY_DURATION, LEDGER_MOVEMENTS_TOTAL};
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{debug, instrument};
use uuid::Uuid;

/// The payment a movement is booked against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AllocationLink<'a> {
    pub payment_id: Uuid,
    pub customer_id: Uuid,
    pub position: i32,
    pub notes: Option<&'a str>,
}

#[derive(Debug)]
pub(crate) struct AppliedMovement {
    pub invoice: Invoice,
    pub allocation: Option<PaymentAllocation>,
}

/// Which open invoices a FIFO payment may reach.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OpenInvoiceScope<'a> {
    /// Exported `pending`/`paid` invoices of the customer.
    Exported,
    /// The listed invoices of the customer, exported or not.
    Selected(&'a [Uuid]),
}

/// Lock one invoice row for the rest of the transaction.
pub(crate) async fn lock_invoice(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Invoice, LedgerError> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, tenant_id, invoice_number, customer_id, total, paid_amount,
            refunded_amount, returned_amount, remaining_amount, status, exported_utc,
            created_utc, updated_utc
        FROM invoices
        WHERE tenant_id = $1 AND invoice_id = $2
        FOR UPDATE
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
    .ok_or_else(|| LedgerError::not_found(format!("Invoice {} not found", invoice_id)))
}

/// Lock a customer's open invoices, oldest first.
///
/// Rows are locked in `(created_utc, invoice_id)` order, so concurrent FIFO
/// payments for the same customer queue up instead of deadlocking.
#[instrument(skip(conn, scope), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
pub(crate) async fn lock_open_invoices(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    customer_id: Uuid,
    scope: OpenInvoiceScope<'_>,
) -> Result<Vec<Invoice>, LedgerError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["lock_open_invoices"])
        .start_timer();

    let invoices = match scope {
        OpenInvoiceScope::Exported => {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, tenant_id, invoice_number, customer_id, total, paid_amount,
                    refunded_amount, returned_amount, remaining_amount, status, exported_utc,
                    created_utc, updated_utc
                FROM invoices
                WHERE tenant_id = $1
                  AND customer_id = $2
                  AND status IN ('pending', 'paid')
                  AND exported_utc IS NOT NULL
                  AND remaining_amount > 0
                ORDER BY created_utc, invoice_id
                FOR UPDATE
                "#,
            )
            .bind(tenant_id)
            .bind(customer_id)
            .fetch_all(&mut *conn)
            .await
        }
        OpenInvoiceScope::Selected(invoice_ids) => {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, tenant_id, invoice_number, customer_id, total, paid_amount,
                    refunded_amount, returned_amount, remaining_amount, status, exported_utc,
                    created_utc, updated_utc
                FROM invoices
                WHERE tenant_id = $1
                  AND customer_id = $2
                  AND invoice_id = ANY($3)
                  AND status <> 'cancelled'
                  AND remaining_amount > 0
                ORDER BY created_utc, invoice_id
                FOR UPDATE
                "#,
            )
            .bind(tenant_id)
            .bind(customer_id)
            .bind(invoice_ids)
            .fetch_all(&mut *conn)
            .await
        }
    }
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to lock open invoices: {}", e))
    })?;

    timer.observe_duration();

    Ok(invoices)
}

/// Apply one signed movement to one invoice.
///
/// Locks the invoice, checks the movement against the locked balance,
/// writes the new balance and status, and for receipts and settlements
/// appends the allocation row. A rejected movement writes nothing.
#[instrument(
    skip(conn, link, movement),
    fields(tenant_id = %tenant_id, invoice_id = %invoice_id, movement = movement.label())
)]
pub(crate) async fn allocate(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
    movement: LedgerMovement,
    link: Option<AllocationLink<'_>>,
) -> Result<AppliedMovement, LedgerError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["allocate"])
        .start_timer();

    let invoice = lock_invoice(conn, tenant_id, invoice_id).await?;

    if let Some(link) = link {
        if invoice.customer_id != link.customer_id {
            return Err(LedgerError::validation(format!(
                "Invoice {} does not belong to customer {}",
                invoice.invoice_number, link.customer_id
            )));
        }
    }

    let next = invoice.balance().apply(movement)?;

    let updated = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET paid_amount = $3,
            refunded_amount = $4,
            returned_amount = $5,
            remaining_amount = $6,
            status = $7,
            updated_utc = NOW()
        WHERE tenant_id = $1 AND invoice_id = $2
        RETURNING invoice_id, tenant_id, invoice_number, customer_id, total, paid_amount,
            refunded_amount, returned_amount, remaining_amount, status, exported_utc,
            created_utc, updated_utc
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .bind(next.paid)
    .bind(next.refunded)
    .bind(next.returned)
    .bind(next.remaining)
    .bind(next.status.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice balance: {}", e))
    })?;

    let allocation = match (movement.allocation_amount(), link) {
        (Some(amount), Some(link)) => {
            Some(insert_allocation(conn, tenant_id, invoice_id, amount, link).await?)
        }
        _ => None,
    };

    timer.observe_duration();
    LEDGER_MOVEMENTS_TOTAL
        .with_label_values(&[movement.label()])
        .inc();

    debug!(
        paid_amount = %updated.paid_amount,
        remaining_amount = %updated.remaining_amount,
        status = %updated.status,
        "Ledger movement applied"
    );

    Ok(AppliedMovement {
        invoice: updated,
        allocation,
    })
}

async fn insert_allocation(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
    amount: rust_decimal::Decimal,
    link: AllocationLink<'_>,
) -> Result<PaymentAllocation, LedgerError> {
    let allocation = sqlx::query_as::<_, PaymentAllocation>(
        r#"
        INSERT INTO payment_allocations (allocation_id, tenant_id, payment_id, invoice_id, position, amount, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING allocation_id, tenant_id, payment_id, invoice_id, position, amount, notes, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(link.payment_id)
    .bind(invoice_id)
    .bind(link.position)
    .bind(amount)
    .bind(link.notes)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record allocation: {}", e)))?;

    Ok(allocation)
}

/// Mark an invoice cancelled, refusing while live allocations or unsettled
/// returns point at it.
#[instrument(skip(conn), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
pub(crate) async fn cancel(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Invoice, LedgerError> {
    let invoice = lock_invoice(conn, tenant_id, invoice_id).await?;
    if invoice.status() == InvoiceStatus::Cancelled {
        return Ok(invoice);
    }

    let live_allocations = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM payment_allocations a
        JOIN payments p ON p.payment_id = a.payment_id
        WHERE a.tenant_id = $1 AND a.invoice_id = $2 AND p.reversed_utc IS NULL
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count allocations: {}", e)))?;

    if live_allocations > 0 {
        return Err(LedgerError::illegal_state(format!(
            "Invoice {} has {} active payment allocation(s); reverse them before cancelling",
            invoice.invoice_number, live_allocations
        )));
    }

    let pending_returns = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM invoice_returns
        WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'pending_refund'
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count returns: {}", e)))?;

    if pending_returns > 0 {
        return Err(LedgerError::illegal_state(format!(
            "Invoice {} has {} return(s) awaiting refund; settle them before cancelling",
            invoice.invoice_number, pending_returns
        )));
    }

    let cancelled = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = 'cancelled', updated_utc = NOW()
        WHERE tenant_id = $1 AND invoice_id = $2
        RETURNING invoice_id, tenant_id, invoice_number, customer_id, total, paid_amount,
            refunded_amount, returned_amount, remaining_amount, status, exported_utc,
            created_utc, updated_utc
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel invoice: {}", e)))?;

    Ok(cancelled)
}
