//! Invoice balances and the arithmetic of ledger movements.

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Tolerance for comparing money amounts (one cent).
pub const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
    Processing,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Processing => "processing",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            "processing" => InvoiceStatus::Processing,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Invoice row. Only the financial columns are written by this service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub refunded_amount: Decimal,
    pub returned_amount: Decimal,
    pub remaining_amount: Decimal,
    pub status: String,
    pub exported_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn balance(&self) -> InvoiceBalance {
        InvoiceBalance {
            total: self.total,
            paid: self.paid_amount,
            refunded: self.refunded_amount,
            returned: self.returned_amount,
            remaining: self.remaining_amount,
            status: self.status(),
        }
    }
}

/// Invoice line as sold.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub invoice_item_id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub unit: String,
    pub allows_decimal: bool,
    pub unit_price: Decimal,
    pub quantity: Decimal,
}

/// A signed effect on an invoice's financial fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMovement {
    /// Cash received: `paid += a`, `remaining -= a`.
    Receipt(Decimal),
    /// Undo of a receipt: `paid -= a`, `remaining += a`.
    ReceiptReversal(Decimal),
    /// Goods value credited by a settled return: `returned += v`, `remaining -= v`.
    /// May drive `remaining` below zero.
    ReturnCredit(Decimal),
    /// Cash paid out to bring a negative remainder back to zero:
    /// `refunded += s`, `remaining += s`.
    Settlement(Decimal),
}

impl LedgerMovement {
    /// Amount recorded on the payment allocation row, if the movement writes one.
    pub fn allocation_amount(&self) -> Option<Decimal> {
        match *self {
            LedgerMovement::Receipt(a) => Some(a),
            LedgerMovement::Settlement(s) => Some(-s),
            LedgerMovement::ReceiptReversal(_) | LedgerMovement::ReturnCredit(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LedgerMovement::Receipt(_) => "receipt",
            LedgerMovement::ReceiptReversal(_) => "receipt_reversal",
            LedgerMovement::ReturnCredit(_) => "return_credit",
            LedgerMovement::Settlement(_) => "settlement",
        }
    }

    fn amount(&self) -> Decimal {
        match *self {
            LedgerMovement::Receipt(a)
            | LedgerMovement::ReceiptReversal(a)
            | LedgerMovement::ReturnCredit(a)
            | LedgerMovement::Settlement(a) => a,
        }
    }
}

/// The financial fields of one invoice.
///
/// `remaining == total - paid + refunded - returned` holds within [`EPSILON`]
/// for every balance produced by [`InvoiceBalance::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceBalance {
    pub total: Decimal,
    pub paid: Decimal,
    pub refunded: Decimal,
    pub returned: Decimal,
    pub remaining: Decimal,
    pub status: InvoiceStatus,
}

impl InvoiceBalance {
    /// Balance of a freshly issued invoice.
    pub fn new(total: Decimal) -> Self {
        Self {
            total,
            paid: Decimal::ZERO,
            refunded: Decimal::ZERO,
            returned: Decimal::ZERO,
            remaining: total,
            status: InvoiceStatus::Pending,
        }
        .settle_status()
    }

    /// Applies a movement, returning the new balance or the rule it violates.
    pub fn apply(&self, movement: LedgerMovement) -> Result<Self, LedgerError> {
        let amount = movement.amount();
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "{} amount must be positive, got {}",
                movement.label(),
                amount
            )));
        }

        if self.status == InvoiceStatus::Cancelled
            && !matches!(movement, LedgerMovement::ReceiptReversal(_))
        {
            return Err(LedgerError::illegal_state(format!(
                "Cannot apply a {} to a cancelled invoice",
                movement.label().replace('_', " ")
            )));
        }

        let mut next = *self;
        match movement {
            LedgerMovement::Receipt(a) => {
                if a > self.remaining + EPSILON {
                    return Err(LedgerError::over_allocation(format!(
                        "Allocation {} exceeds remaining amount {}",
                        a, self.remaining
                    )));
                }
                next.paid += a;
                next.remaining -= a;
            }
            LedgerMovement::ReceiptReversal(a) => {
                if a > self.paid + EPSILON {
                    return Err(LedgerError::over_allocation(format!(
                        "Reversal {} exceeds paid amount {}",
                        a, self.paid
                    )));
                }
                next.paid -= a;
                next.remaining += a;
            }
            LedgerMovement::ReturnCredit(v) => {
                next.returned += v;
                next.remaining -= v;
            }
            LedgerMovement::Settlement(s) => {
                if s > -self.remaining + EPSILON {
                    return Err(LedgerError::over_allocation(format!(
                        "Settlement {} exceeds amount owed to the customer {}",
                        s,
                        (-self.remaining).max(Decimal::ZERO)
                    )));
                }
                next.refunded += s;
                next.remaining += s;
            }
        }

        Ok(next.settle_status())
    }

    /// Zeroes a near-zero remainder and recomputes the status.
    fn settle_status(mut self) -> Self {
        if self.remaining.abs() <= EPSILON {
            self.remaining = Decimal::ZERO;
        }
        if self.status != InvoiceStatus::Cancelled {
            self.status = if self.remaining <= EPSILON {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::Pending
            };
        }
        self
    }

    /// `remaining - (total - paid + refunded - returned)`; zero for a consistent balance.
    pub fn drift(&self) -> Decimal {
        self.remaining - (self.total - self.paid + self.refunded - self.returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn epsilon_is_one_cent() {
        assert_eq!(EPSILON, Decimal::new(1, 2));
    }

    #[test]
    fn full_receipt_marks_invoice_paid() {
        let balance = InvoiceBalance::new(d(100_000))
            .apply(LedgerMovement::Receipt(d(100_000)))
            .unwrap();

        assert_eq!(balance.paid, d(100_000));
        assert_eq!(balance.remaining, Decimal::ZERO);
        assert_eq!(balance.status, InvoiceStatus::Paid);
        assert_eq!(balance.drift(), Decimal::ZERO);
    }

    #[test]
    fn partial_receipt_stays_pending() {
        let balance = InvoiceBalance::new(d(70_000))
            .apply(LedgerMovement::Receipt(d(40_000)))
            .unwrap();

        assert_eq!(balance.remaining, d(30_000));
        assert_eq!(balance.status, InvoiceStatus::Pending);
    }

    #[test]
    fn receipt_within_epsilon_normalizes_remainder() {
        let balance = InvoiceBalance::new(Decimal::new(10_001, 2))
            .apply(LedgerMovement::Receipt(d(100)))
            .unwrap();

        assert_eq!(balance.remaining, Decimal::ZERO);
        assert_eq!(balance.status, InvoiceStatus::Paid);
    }

    #[test]
    fn receipt_over_remaining_is_rejected() {
        let err = InvoiceBalance::new(d(100))
            .apply(LedgerMovement::Receipt(Decimal::new(10_002, 2)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::OverAllocation(_)));
    }

    #[test]
    fn receipt_on_cancelled_invoice_is_rejected() {
        let mut balance = InvoiceBalance::new(d(100));
        balance.status = InvoiceStatus::Cancelled;

        let err = balance.apply(LedgerMovement::Receipt(d(10))).unwrap_err();
        assert!(matches!(err, LedgerError::IllegalStateTransition(_)));
    }

    #[test]
    fn cancelled_invoice_takes_no_return_credit_or_settlement() {
        let mut balance = InvoiceBalance::new(d(100));
        balance.status = InvoiceStatus::Cancelled;

        for movement in [
            LedgerMovement::ReturnCredit(d(40)),
            LedgerMovement::Settlement(d(10)),
        ] {
            assert!(matches!(
                balance.apply(movement),
                Err(LedgerError::IllegalStateTransition(_))
            ));
        }
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let balance = InvoiceBalance::new(d(100));
        for movement in [
            LedgerMovement::Receipt(Decimal::ZERO),
            LedgerMovement::ReceiptReversal(d(-5)),
            LedgerMovement::ReturnCredit(Decimal::ZERO),
            LedgerMovement::Settlement(d(-1)),
        ] {
            assert!(matches!(
                balance.apply(movement),
                Err(LedgerError::Validation(_))
            ));
        }
    }

    #[test]
    fn reversal_restores_previous_balance() {
        let original = InvoiceBalance::new(d(50_000));
        let paid = original.apply(LedgerMovement::Receipt(d(30_000))).unwrap();
        let reversed = paid
            .apply(LedgerMovement::ReceiptReversal(d(30_000)))
            .unwrap();

        assert_eq!(reversed, original);
    }

    #[test]
    fn reversal_flips_paid_back_to_pending() {
        let paid = InvoiceBalance::new(d(30_000))
            .apply(LedgerMovement::Receipt(d(30_000)))
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);

        let reversed = paid
            .apply(LedgerMovement::ReceiptReversal(d(30_000)))
            .unwrap();
        assert_eq!(reversed.remaining, d(30_000));
        assert_eq!(reversed.status, InvoiceStatus::Pending);
    }

    #[test]
    fn reversal_over_paid_is_rejected() {
        let balance = InvoiceBalance::new(d(100))
            .apply(LedgerMovement::Receipt(d(40)))
            .unwrap();
        let err = balance
            .apply(LedgerMovement::ReceiptReversal(d(41)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::OverAllocation(_)));
    }

    #[test]
    fn full_return_on_paid_invoice_settles_to_zero() {
        let paid = InvoiceBalance::new(d(20_000))
            .apply(LedgerMovement::Receipt(d(20_000)))
            .unwrap();

        let credited = paid.apply(LedgerMovement::ReturnCredit(d(20_000))).unwrap();
        assert_eq!(credited.remaining, d(-20_000));
        assert_eq!(credited.returned, d(20_000));
        assert_eq!(credited.status, InvoiceStatus::Paid);
        assert_eq!(credited.drift(), Decimal::ZERO);

        let settled = credited
            .apply(LedgerMovement::Settlement(d(20_000)))
            .unwrap();
        assert_eq!(settled.refunded, d(20_000));
        assert_eq!(settled.remaining, Decimal::ZERO);
        assert_eq!(settled.status, InvoiceStatus::Paid);
        assert_eq!(settled.drift(), Decimal::ZERO);
    }

    #[test]
    fn return_on_unpaid_invoice_only_reduces_debt() {
        let credited = InvoiceBalance::new(d(10_000))
            .apply(LedgerMovement::ReturnCredit(d(4_000)))
            .unwrap();

        assert_eq!(credited.remaining, d(6_000));
        assert_eq!(credited.status, InvoiceStatus::Pending);
        assert!(credited
            .apply(LedgerMovement::Settlement(d(1)))
            .is_err());
    }

    #[test]
    fn settlement_cannot_push_remaining_above_zero() {
        let credited = InvoiceBalance::new(d(100))
            .apply(LedgerMovement::Receipt(d(100)))
            .unwrap()
            .apply(LedgerMovement::ReturnCredit(d(30)))
            .unwrap();

        let err = credited
            .apply(LedgerMovement::Settlement(d(31)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::OverAllocation(_)));
    }

    #[test]
    fn cancelled_status_survives_other_movements() {
        let mut balance = InvoiceBalance::new(d(100));
        balance.status = InvoiceStatus::Cancelled;

        let credited = balance.apply(LedgerMovement::ReturnCredit(d(100))).unwrap();
        assert_eq!(credited.status, InvoiceStatus::Cancelled);
    }

    #[test]
    fn allocation_amount_carries_sign() {
        assert_eq!(LedgerMovement::Receipt(d(5)).allocation_amount(), Some(d(5)));
        assert_eq!(
            LedgerMovement::Settlement(d(5)).allocation_amount(),
            Some(d(-5))
        );
        assert_eq!(LedgerMovement::ReturnCredit(d(5)).allocation_amount(), None);
        assert_eq!(
            LedgerMovement::ReceiptReversal(d(5)).allocation_amount(),
            None
        );
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            InvoiceStatus::Pending,
            InvoiceStatus::Paid,
            InvoiceStatus::Cancelled,
            InvoiceStatus::Processing,
        ] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
    }
}
