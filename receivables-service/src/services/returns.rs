//! Returns and their settlement into the invoice ledger.
//!
//! A return is recorded in `pending_refund` without touching the invoice
//! balance. Moving it to `refunded` credits the returned value and, when the
//! credit leaves the invoice overpaid, pays the difference back through a
//! negative settlement payment.

use crate::error::LedgerError;
use crate::models::{
    AvailableReturnQuantity, CreateReturn, CreateReturnItem, InvoiceItem, InvoiceReturn,
    InvoiceReturnItem, InvoiceStatus, LedgerMovement, Payment, ReturnStatus, UpdateReturnStatus,
};
use crate::services::allocation::validate_money;
use crate::services::database::{commit, Database};
use crate::services::ledger::{self, AllocationLink};
use crate::services::metrics::{
    CASH_AMOUNT_TOTAL, DB_QUERY_DURATION, PAYMENTS_TOTAL, RETURNS_TOTAL,
};
use crate::services::payments::{insert_payment, NewPayment};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};
use uuid::Uuid;

const RETURN_COLUMNS: &str = "return_id, tenant_id, return_number, invoice_id, customer_id, \
     reason, refund_amount, is_full_return, status, refund_payment_id, refund_method, \
     create_refund_payment, notes, created_by, created_utc, refunded_utc, exported_utc";

/// One validated line of a return, priced from the invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedReturnLine {
    pub invoice_item_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub unit: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub subtotal: Decimal,
    pub restore_inventory: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnPlan {
    pub lines: Vec<PlannedReturnLine>,
    /// Sum of line subtotals.
    pub total: Decimal,
    /// Every invoice line is returned in full once this return is counted.
    pub is_full_return: bool,
}

/// Input checks that need no database access.
pub fn validate_return_request(input: &CreateReturn) -> Result<(), LedgerError> {
    if input.reason.trim().is_empty() {
        return Err(LedgerError::validation("A return reason is required"));
    }
    if input.items.is_empty() {
        return Err(LedgerError::validation("A return needs at least one item"));
    }

    let mut seen = HashSet::with_capacity(input.items.len());
    for item in &input.items {
        if item.quantity <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "Return quantity for item {} must be positive, got {}",
                item.invoice_item_id, item.quantity
            )));
        }
        if item.quantity.normalize().scale() > 3 {
            return Err(LedgerError::validation(format!(
                "Return quantity {} for item {} has more than three decimal places",
                item.quantity, item.invoice_item_id
            )));
        }
        if !seen.insert(item.invoice_item_id) {
            return Err(LedgerError::validation(format!(
                "Item {} appears more than once in the return",
                item.invoice_item_id
            )));
        }
    }

    if let Some(refund) = input.refund_amount {
        if refund < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "Refund amount cannot be negative, got {}",
                refund
            )));
        }
        validate_money("Refund amount", refund)?;
    }
    Ok(())
}

/// Check requested quantities against what is still returnable and price the lines.
pub fn plan_return(
    items: &[InvoiceItem],
    already_returned: &HashMap<Uuid, Decimal>,
    requested: &[CreateReturnItem],
) -> Result<ReturnPlan, LedgerError> {
    let by_id: HashMap<Uuid, &InvoiceItem> =
        items.iter().map(|i| (i.invoice_item_id, i)).collect();

    let mut lines = Vec::with_capacity(requested.len());
    for request in requested {
        let item = by_id.get(&request.invoice_item_id).ok_or_else(|| {
            LedgerError::validation(format!(
                "Item {} is not on this invoice",
                request.invoice_item_id
            ))
        })?;

        if !item.allows_decimal && !request.quantity.fract().is_zero() {
            return Err(LedgerError::validation(format!(
                "{} is sold in whole {}; got quantity {}",
                item.product_name, item.unit, request.quantity
            )));
        }

        let returned = already_returned
            .get(&item.invoice_item_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let available = item.quantity - returned;
        if request.quantity > available {
            return Err(LedgerError::over_allocation(format!(
                "Cannot return {} of {}: only {} available",
                request.quantity,
                item.product_name,
                available.max(Decimal::ZERO)
            )));
        }

        lines.push(PlannedReturnLine {
            invoice_item_id: item.invoice_item_id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            unit: item.unit.clone(),
            unit_price: item.unit_price,
            quantity: request.quantity,
            subtotal: (request.quantity * item.unit_price).round_dp(2),
            restore_inventory: request.restore_inventory,
        });
    }

    let is_full_return = items.iter().all(|item| {
        let before = already_returned
            .get(&item.invoice_item_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let now: Decimal = lines
            .iter()
            .filter(|l| l.invoice_item_id == item.invoice_item_id)
            .map(|l| l.quantity)
            .sum();
        before + now >= item.quantity
    });

    let total: Decimal = lines.iter().map(|l| l.subtotal).sum();

    Ok(ReturnPlan {
        lines,
        total,
        is_full_return,
    })
}

pub fn available_quantities(
    items: &[InvoiceItem],
    already_returned: &HashMap<Uuid, Decimal>,
) -> Vec<AvailableReturnQuantity> {
    items
        .iter()
        .map(|item| {
            let returned = already_returned
                .get(&item.invoice_item_id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            AvailableReturnQuantity {
                invoice_item_id: item.invoice_item_id,
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                unit: item.unit.clone(),
                unit_price: item.unit_price,
                original_quantity: item.quantity,
                already_returned: returned,
                available_for_return: (item.quantity - returned).max(Decimal::ZERO),
                allows_decimal: item.allows_decimal,
            }
        })
        .collect()
}

/// Cash owed back to the customer once the return credit has been applied.
pub fn settlement_amount(remaining: Decimal) -> Decimal {
    (-remaining).max(Decimal::ZERO)
}

/// Append a `[from -> to] notes` line to the existing notes.
pub fn append_status_note(
    existing: Option<&str>,
    from: ReturnStatus,
    to: ReturnStatus,
    notes: Option<&str>,
) -> Option<String> {
    let notes = match notes.map(str::trim) {
        Some(n) if !n.is_empty() => n,
        _ => return existing.map(str::to_string),
    };

    let line = format!("[{} -> {}] {}", from.as_str(), to.as_str(), notes);
    match existing {
        Some(prev) if !prev.is_empty() => Some(format!("{}\n{}", prev, line)),
        _ => Some(line),
    }
}

async fn load_invoice_items(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Vec<InvoiceItem>, LedgerError> {
    sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT invoice_item_id, tenant_id, invoice_id, product_id, product_name, unit,
            allows_decimal, unit_price, quantity
        FROM invoice_items
        WHERE tenant_id = $1 AND invoice_id = $2
        ORDER BY sort_order, invoice_item_id
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice items: {}", e)).into()
    })
}

async fn load_returned_quantities(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<HashMap<Uuid, Decimal>, LedgerError> {
    let rows = sqlx::query_as::<_, (Uuid, Decimal)>(
        r#"
        SELECT ri.invoice_item_id, SUM(ri.quantity_returned)
        FROM invoice_return_items ri
        JOIN invoice_returns r ON r.return_id = ri.return_id
        WHERE r.tenant_id = $1 AND r.invoice_id = $2
        GROUP BY ri.invoice_item_id
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to load returned quantities: {}", e))
    })?;

    Ok(rows.into_iter().collect())
}

async fn attach_items(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    returns: &mut [InvoiceReturn],
) -> Result<(), LedgerError> {
    let ids: Vec<Uuid> = returns.iter().map(|r| r.return_id).collect();
    let items = sqlx::query_as::<_, InvoiceReturnItem>(
        r#"
        SELECT return_item_id, tenant_id, return_id, invoice_item_id, product_id, product_name,
            unit, unit_price, quantity_returned, subtotal, restore_inventory
        FROM invoice_return_items
        WHERE tenant_id = $1 AND return_id = ANY($2)
        ORDER BY return_id, product_name, return_item_id
        "#,
    )
    .bind(tenant_id)
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to load return items: {}", e))
    })?;

    let mut by_return: HashMap<Uuid, Vec<InvoiceReturnItem>> = HashMap::new();
    for item in items {
        by_return.entry(item.return_id).or_default().push(item);
    }
    for ret in returns.iter_mut() {
        ret.items = by_return.remove(&ret.return_id).unwrap_or_default();
    }
    Ok(())
}

async fn restore_stock(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE products
        SET stock_quantity = stock_quantity + $3
        WHERE tenant_id = $1 AND product_id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(product_id)
    .bind(quantity)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to restore stock: {}", e)))?;

    Ok(())
}

impl Database {
    /// Record returned goods against an invoice in `pending_refund`.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, invoice_id = %input.invoice_id))]
    pub async fn create_return(&self, input: &CreateReturn) -> Result<InvoiceReturn, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_return"])
            .start_timer();

        validate_return_request(input)?;

        let mut tx = self.begin().await?;

        let return_number = sqlx::query_scalar::<_, String>("SELECT next_document_number($1, 'RET')")
            .bind(input.tenant_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to allocate return number: {}", e))
            })?;

        // Held until commit so concurrent returns see each other's quantities.
        let invoice = ledger::lock_invoice(&mut *tx, input.tenant_id, input.invoice_id).await?;
        match invoice.status() {
            InvoiceStatus::Pending | InvoiceStatus::Paid => {}
            other => {
                return Err(LedgerError::illegal_state(format!(
                    "Invoice {} is {} and cannot take returns",
                    invoice.invoice_number,
                    other.as_str()
                )));
            }
        }

        let items = load_invoice_items(&mut *tx, input.tenant_id, input.invoice_id).await?;
        if items.is_empty() {
            return Err(LedgerError::validation(format!(
                "Invoice {} has no line items",
                invoice.invoice_number
            )));
        }
        let already_returned =
            load_returned_quantities(&mut *tx, input.tenant_id, input.invoice_id).await?;

        let plan = plan_return(&items, &already_returned, &input.items)?;
        let refund_amount = input.refund_amount.unwrap_or(plan.total);

        let mut created = sqlx::query_as::<_, InvoiceReturn>(&format!(
            r#"
            INSERT INTO invoice_returns (
                return_id, tenant_id, return_number, invoice_id, customer_id, reason,
                refund_amount, is_full_return, status, refund_method, create_refund_payment,
                notes, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending_refund', $9, $10, $11, $12)
            RETURNING {}
            "#,
            RETURN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&return_number)
        .bind(input.invoice_id)
        .bind(invoice.customer_id)
        .bind(input.reason.trim())
        .bind(refund_amount)
        .bind(plan.is_full_return)
        .bind(input.payment_method.as_str())
        .bind(input.create_refund_payment)
        .bind(input.notes.as_deref())
        .bind(input.created_by.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create return: {}", e)))?;

        for line in &plan.lines {
            let item = sqlx::query_as::<_, InvoiceReturnItem>(
                r#"
                INSERT INTO invoice_return_items (
                    return_item_id, tenant_id, return_id, invoice_item_id, product_id,
                    product_name, unit, unit_price, quantity_returned, subtotal, restore_inventory
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING return_item_id, tenant_id, return_id, invoice_item_id, product_id,
                    product_name, unit, unit_price, quantity_returned, subtotal, restore_inventory
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(input.tenant_id)
            .bind(created.return_id)
            .bind(line.invoice_item_id)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(&line.unit)
            .bind(line.unit_price)
            .bind(line.quantity)
            .bind(line.subtotal)
            .bind(line.restore_inventory)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create return item: {}", e))
            })?;

            if let (true, Some(product_id)) = (line.restore_inventory, line.product_id) {
                restore_stock(&mut *tx, input.tenant_id, product_id, line.quantity).await?;
            }

            created.items.push(item);
        }

        commit(tx).await?;

        timer.observe_duration();
        RETURNS_TOTAL
            .with_label_values(&[ReturnStatus::PendingRefund.as_str()])
            .inc();

        info!(
            return_id = %created.return_id,
            return_number = %created.return_number,
            refund_amount = %created.refund_amount,
            is_full_return = created.is_full_return,
            "Return created"
        );

        Ok(created)
    }

    /// Move a return along its workflow, settling it into the invoice on `refunded`.
    ///
    /// Returns the updated return and the settlement payment when one was created.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, return_id = %input.return_id))]
    pub async fn update_return_status(
        &self,
        input: &UpdateReturnStatus,
    ) -> Result<(InvoiceReturn, Option<Payment>), LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_return_status"])
            .start_timer();

        let tenant_id = input.tenant_id;
        let mut tx = self.begin().await?;

        let mut current = sqlx::query_as::<_, InvoiceReturn>(&format!(
            "SELECT {} FROM invoice_returns WHERE tenant_id = $1 AND return_id = $2 FOR UPDATE",
            RETURN_COLUMNS
        ))
        .bind(tenant_id)
        .bind(input.return_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock return: {}", e)))?
        .ok_or_else(|| LedgerError::not_found(format!("Return {} not found", input.return_id)))?;

        let from = current.status();
        if from == input.status {
            attach_items(&mut *tx, tenant_id, std::slice::from_mut(&mut current)).await?;
            return Ok((current, None));
        }
        if from == ReturnStatus::Refunded {
            return Err(LedgerError::illegal_state(format!(
                "Return {} is already refunded",
                current.return_number
            )));
        }

        let invoice = if current.refund_amount > Decimal::ZERO {
            ledger::allocate(
                &mut *tx,
                tenant_id,
                current.invoice_id,
                LedgerMovement::ReturnCredit(current.refund_amount),
                None,
            )
            .await?
            .invoice
        } else {
            ledger::lock_invoice(&mut *tx, tenant_id, current.invoice_id).await?
        };

        let settlement = settlement_amount(invoice.remaining_amount);
        let method = input
            .payment_method
            .unwrap_or_else(|| current.refund_method());

        let mut refund_payment_id = current.refund_payment_id;
        let mut settlement_payment = None;
        if settlement > Decimal::ZERO && refund_payment_id.is_none() {
            let payment_number = format!("REFUND-{}", current.return_number);
            let notes = format!("Refund for return {}", current.return_number);
            let mut payment = insert_payment(
                &mut *tx,
                NewPayment {
                    tenant_id,
                    customer_id: invoice.customer_id,
                    payment_number: Some(&payment_number),
                    amount: -settlement,
                    payment_method: method.as_str(),
                    payment_date: chrono::Utc::now().date_naive(),
                    notes: Some(&notes),
                    created_by: current.created_by.as_deref(),
                },
            )
            .await?;

            let applied = ledger::allocate(
                &mut *tx,
                tenant_id,
                current.invoice_id,
                LedgerMovement::Settlement(settlement),
                Some(AllocationLink {
                    payment_id: payment.payment_id,
                    customer_id: invoice.customer_id,
                    position: 0,
                    notes: Some(&notes),
                }),
            )
            .await?;
            payment.allocations.extend(applied.allocation);

            refund_payment_id = Some(payment.payment_id);
            settlement_payment = Some(payment);
        }

        let notes = append_status_note(
            current.notes.as_deref(),
            from,
            input.status,
            input.notes.as_deref(),
        );

        let mut updated = sqlx::query_as::<_, InvoiceReturn>(&format!(
            r#"
            UPDATE invoice_returns
            SET status = $3, refunded_utc = NOW(), refund_payment_id = $4,
                refund_method = $5, notes = $6
            WHERE tenant_id = $1 AND return_id = $2
            RETURNING {}
            "#,
            RETURN_COLUMNS
        ))
        .bind(tenant_id)
        .bind(input.return_id)
        .bind(input.status.as_str())
        .bind(refund_payment_id)
        .bind(method.as_str())
        .bind(notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update return: {}", e)))?;

        attach_items(&mut *tx, tenant_id, std::slice::from_mut(&mut updated)).await?;

        commit(tx).await?;

        timer.observe_duration();
        RETURNS_TOTAL
            .with_label_values(&[input.status.as_str()])
            .inc();
        if settlement_payment.is_some() {
            PAYMENTS_TOTAL
                .with_label_values(&[method.as_str(), "settlement"])
                .inc();
            CASH_AMOUNT_TOTAL
                .with_label_values(&["refunded"])
                .inc_by(settlement.to_f64().unwrap_or(0.0));
        }

        info!(
            return_number = %updated.return_number,
            from = from.as_str(),
            to = input.status.as_str(),
            credited = %updated.refund_amount,
            settlement = %settlement,
            "Return status updated"
        );

        Ok((updated, settlement_payment))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, return_id = %return_id))]
    pub async fn get_return(
        &self,
        tenant_id: Uuid,
        return_id: Uuid,
    ) -> Result<Option<InvoiceReturn>, LedgerError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;

        let found = sqlx::query_as::<_, InvoiceReturn>(&format!(
            "SELECT {} FROM invoice_returns WHERE tenant_id = $1 AND return_id = $2",
            RETURN_COLUMNS
        ))
        .bind(tenant_id)
        .bind(return_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get return: {}", e)))?;

        match found {
            Some(mut ret) => {
                attach_items(&mut *conn, tenant_id, std::slice::from_mut(&mut ret)).await?;
                Ok(Some(ret))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn list_invoice_returns(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceReturn>, LedgerError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;

        let mut returns = sqlx::query_as::<_, InvoiceReturn>(&format!(
            r#"
            SELECT {}
            FROM invoice_returns
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_utc, return_id
            "#,
            RETURN_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list returns: {}", e)))?;

        attach_items(&mut *conn, tenant_id, &mut returns).await?;
        Ok(returns)
    }

    /// A customer's returns, newest first, optionally narrowed to one status.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
    pub async fn list_customer_returns(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        status: Option<ReturnStatus>,
    ) -> Result<Vec<InvoiceReturn>, LedgerError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;

        let mut returns = sqlx::query_as::<_, InvoiceReturn>(&format!(
            r#"
            SELECT {}
            FROM invoice_returns
            WHERE tenant_id = $1 AND customer_id = $2
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_utc DESC, return_id
            "#,
            RETURN_COLUMNS
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list returns: {}", e)))?;

        attach_items(&mut *conn, tenant_id, &mut returns).await?;
        Ok(returns)
    }

    /// Per invoice line: sold, already returned and still returnable quantities.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_available_return_quantities(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<AvailableReturnQuantity>, LedgerError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM invoices WHERE tenant_id = $1 AND invoice_id = $2)",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;
        if !exists {
            return Err(LedgerError::not_found(format!(
                "Invoice {} not found",
                invoice_id
            )));
        }

        let items = load_invoice_items(&mut *conn, tenant_id, invoice_id).await?;
        let already_returned = load_returned_quantities(&mut *conn, tenant_id, invoice_id).await?;

        Ok(available_quantities(&items, &already_returned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn item(quantity: &str, price: &str, allows_decimal: bool) -> InvoiceItem {
        InvoiceItem {
            invoice_item_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            invoice_id: Uuid::nil(),
            product_id: Some(Uuid::new_v4()),
            product_name: "Rice".to_string(),
            unit: if allows_decimal { "kg" } else { "pcs" }.to_string(),
            allows_decimal,
            unit_price: dec(price),
            quantity: dec(quantity),
        }
    }

    fn request(item: &InvoiceItem, quantity: &str) -> CreateReturnItem {
        CreateReturnItem {
            invoice_item_id: item.invoice_item_id,
            quantity: dec(quantity),
            restore_inventory: true,
        }
    }

    fn create_input(items: Vec<CreateReturnItem>) -> CreateReturn {
        CreateReturn {
            tenant_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            items,
            reason: "damaged".to_string(),
            refund_amount: None,
            create_refund_payment: true,
            payment_method: PaymentMethod::Cash,
            notes: None,
            created_by: None,
        }
    }

    #[test]
    fn plan_prices_lines_and_flags_partial_return() {
        let line = item("10", "5000", false);
        let plan = plan_return(&[line.clone()], &HashMap::new(), &[request(&line, "4")]).unwrap();

        assert_eq!(plan.total, dec("20000"));
        assert_eq!(plan.lines[0].subtotal, dec("20000"));
        assert!(!plan.is_full_return);
    }

    #[test]
    fn plan_counts_prior_returns() {
        let line = item("10", "5000", false);
        let mut prior = HashMap::new();
        prior.insert(line.invoice_item_id, dec("6"));

        let plan = plan_return(&[line.clone()], &prior, &[request(&line, "4")]).unwrap();
        assert!(plan.is_full_return);

        let err = plan_return(&[line.clone()], &prior, &[request(&line, "5")]).unwrap_err();
        assert!(matches!(err, LedgerError::OverAllocation(_)));
    }

    #[test]
    fn full_return_requires_every_line() {
        let a = item("2", "10", false);
        let b = item("3", "10", false);
        let plan = plan_return(&[a.clone(), b.clone()], &HashMap::new(), &[request(&a, "2")])
            .unwrap();
        assert!(!plan.is_full_return);

        let plan = plan_return(
            &[a.clone(), b.clone()],
            &HashMap::new(),
            &[request(&a, "2"), request(&b, "3")],
        )
        .unwrap();
        assert!(plan.is_full_return);
    }

    #[test]
    fn fractional_quantity_needs_decimal_unit() {
        let pieces = item("5", "100", false);
        let err = plan_return(&[pieces.clone()], &HashMap::new(), &[request(&pieces, "1.5")])
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let rice = item("2.5", "12000", true);
        let plan =
            plan_return(&[rice.clone()], &HashMap::new(), &[request(&rice, "0.75")]).unwrap();
        assert_eq!(plan.total, dec("9000"));
    }

    #[test]
    fn subtotal_rounds_to_cents() {
        let rice = item("1", "3.33", true);
        let plan =
            plan_return(&[rice.clone()], &HashMap::new(), &[request(&rice, "0.333")]).unwrap();
        assert_eq!(plan.lines[0].subtotal, dec("1.11"));
    }

    #[test]
    fn unknown_item_is_rejected() {
        let line = item("1", "1", false);
        let stranger = item("1", "1", false);
        let err =
            plan_return(&[line], &HashMap::new(), &[request(&stranger, "1")]).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn request_validation() {
        let line = item("1", "1", false);

        let mut input = create_input(vec![]);
        assert!(validate_return_request(&input).is_err());

        input.items = vec![request(&line, "1"), request(&line, "1")];
        assert!(validate_return_request(&input).is_err());

        input.items = vec![request(&line, "0")];
        assert!(validate_return_request(&input).is_err());

        input.items = vec![request(&line, "1")];
        input.reason = "   ".to_string();
        assert!(validate_return_request(&input).is_err());

        input.reason = "wrong size".to_string();
        input.refund_amount = Some(dec("-1"));
        assert!(validate_return_request(&input).is_err());

        input.refund_amount = Some(Decimal::ZERO);
        assert!(validate_return_request(&input).is_ok());
    }

    #[test]
    fn refund_and_quantity_precision_must_fit_the_ledger() {
        let line = item("5", "1000", true);

        let mut input = create_input(vec![request(&line, "0.0005")]);
        assert!(matches!(
            validate_return_request(&input),
            Err(LedgerError::Validation(_))
        ));

        input.items = vec![request(&line, "0.125")];
        input.refund_amount = Some(dec("10.005"));
        assert!(matches!(
            validate_return_request(&input),
            Err(LedgerError::Validation(_))
        ));

        input.refund_amount = Some(dec("10.50"));
        assert!(validate_return_request(&input).is_ok());
    }

    #[test]
    fn available_never_goes_negative() {
        let line = item("3", "10", false);
        let mut prior = HashMap::new();
        prior.insert(line.invoice_item_id, dec("3"));

        let available = available_quantities(&[line], &prior);
        assert_eq!(available[0].already_returned, dec("3"));
        assert_eq!(available[0].available_for_return, Decimal::ZERO);
    }

    #[test]
    fn settlement_is_the_overpaid_part() {
        assert_eq!(settlement_amount(dec("-30000")), dec("30000"));
        assert_eq!(settlement_amount(Decimal::ZERO), Decimal::ZERO);
        assert_eq!(settlement_amount(dec("80000")), Decimal::ZERO);
    }

    #[test]
    fn status_note_is_appended() {
        let from = ReturnStatus::PendingRefund;
        let to = ReturnStatus::Refunded;

        assert_eq!(
            append_status_note(None, from, to, Some("cash handed over")),
            Some("[pending_refund -> refunded] cash handed over".to_string())
        );
        assert_eq!(
            append_status_note(Some("box opened"), from, to, Some("ok")),
            Some("box opened\n[pending_refund -> refunded] ok".to_string())
        );
        assert_eq!(
            append_status_note(Some("box opened"), from, to, None),
            Some("box opened".to_string())
        );
    }
}
