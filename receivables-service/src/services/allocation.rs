//! Allocation planning: which invoice receives how much of a payment.
//!
//! Pure functions over already-locked rows; the writer applies the plan.

use crate::error::LedgerError;
use crate::models::{Invoice, ManualAllocation, EPSILON};
use rust_decimal::Decimal;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedAllocation {
    pub invoice_id: Uuid,
    pub amount: Decimal,
}

/// Largest value a `NUMERIC(18,2)` money column holds.
fn max_amount() -> Decimal {
    Decimal::new(9_999_999_999_999_999, 2)
}

/// Money must fit the ledger columns exactly: two decimals, sixteen integer digits.
pub fn validate_money(field: &str, amount: Decimal) -> Result<(), LedgerError> {
    if amount.normalize().scale() > 2 {
        return Err(LedgerError::validation(format!(
            "{} {} has more than two decimal places",
            field, amount
        )));
    }
    if amount.abs() > max_amount() {
        return Err(LedgerError::validation(format!(
            "{} {} exceeds the largest supported amount",
            field, amount
        )));
    }
    Ok(())
}

pub fn validate_payment_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "Payment amount must be positive, got {}",
            amount
        )));
    }
    validate_money("Payment amount", amount)
}

/// Check a manual allocation map before anything is written.
pub fn validate_manual(entries: &[ManualAllocation], amount: Decimal) -> Result<(), LedgerError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if entry.amount <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "Allocation to invoice {} must be positive, got {}",
                entry.invoice_id, entry.amount
            )));
        }
        validate_money("Allocation amount", entry.amount)?;
        if !seen.insert(entry.invoice_id) {
            return Err(LedgerError::validation(format!(
                "Invoice {} appears more than once in the allocation",
                entry.invoice_id
            )));
        }
    }

    let allocated = entries
        .iter()
        .try_fold(Decimal::ZERO, |acc, e| acc.checked_add(e.amount))
        .ok_or_else(|| LedgerError::validation("Allocation amounts are too large to total"))?;
    if allocated > amount {
        return Err(LedgerError::over_allocation(format!(
            "Allocations total {} but the payment is only {}",
            allocated, amount
        )));
    }
    Ok(())
}

/// Manual allocations in caller order.
pub fn plan_manual(entries: &[ManualAllocation]) -> Vec<PlannedAllocation> {
    entries
        .iter()
        .map(|e| PlannedAllocation {
            invoice_id: e.invoice_id,
            amount: e.amount,
        })
        .collect()
}

/// Auto-FIFO needs at least one open invoice and enough debt to absorb the payment.
pub fn check_fifo_capacity(open: &[Invoice], amount: Decimal) -> Result<(), LedgerError> {
    if open.is_empty() {
        return Err(LedgerError::validation(
            "Customer has no open exported invoices to allocate the payment to",
        ));
    }

    let outstanding: Decimal = open.iter().map(|i| i.remaining_amount).sum();
    if amount > outstanding + EPSILON {
        return Err(LedgerError::over_allocation(format!(
            "Payment {} exceeds the customer's outstanding debt {}",
            amount, outstanding
        )));
    }
    Ok(())
}

/// Spread `amount` over `open` in the given order, filling each invoice before
/// moving to the next. Whatever is left after the last invoice stays unallocated.
pub fn plan_fifo(open: &[Invoice], amount: Decimal) -> Vec<PlannedAllocation> {
    let mut leftover = amount;
    let mut plan = Vec::new();

    for invoice in open {
        if leftover <= Decimal::ZERO {
            break;
        }
        if invoice.remaining_amount <= Decimal::ZERO {
            continue;
        }
        let share = invoice.remaining_amount.min(leftover);
        plan.push(PlannedAllocation {
            invoice_id: invoice.invoice_id,
            amount: share,
        });
        leftover -= share;
    }

    plan
}
