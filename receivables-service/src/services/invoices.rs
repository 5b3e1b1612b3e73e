//! Invoice balance reads and the cancellation guard.

use crate::error::LedgerError;
use crate::models::Invoice;
use crate::services::database::{commit, Database};
use crate::services::ledger;
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

impl Database {
    /// Get an invoice's financial fields.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice_balance(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_balance"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, invoice_number, customer_id, total, paid_amount,
                refunded_amount, returned_amount, remaining_amount, status, exported_utc,
                created_utc, updated_utc
            FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Cancel an invoice that has no live payment allocations.
    ///
    /// Cancelling an already cancelled invoice returns it unchanged.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, LedgerError> {
        let mut tx = self.begin().await?;
        let invoice = ledger::cancel(&mut *tx, tenant_id, invoice_id).await?;
        commit(tx).await?;

        info!(invoice_number = %invoice.invoice_number, "Invoice cancelled");

        Ok(invoice)
    }
}
