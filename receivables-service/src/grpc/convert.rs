//! Conversions between domain models and protobuf messages.

use crate::grpc::proto::{
    AgingBucket as ProtoAgingBucket, AvailableReturnQuantity as ProtoAvailableReturnQuantity,
    CustomerDebtSummary as ProtoCustomerDebtSummary, InvoiceBalance as ProtoInvoiceBalance,
    InvoiceReturn as ProtoInvoiceReturn, InvoiceReturnItem as ProtoInvoiceReturnItem,
    InvoiceStatus as ProtoInvoiceStatus, Payment as ProtoPayment,
    PaymentAllocation as ProtoPaymentAllocation, PaymentKind as ProtoPaymentKind,
    PaymentMethod as ProtoPaymentMethod, ReturnStatus as ProtoReturnStatus,
};
use crate::models::{
    AgingBucket, AvailableReturnQuantity, CustomerDebtSummary, Invoice, InvoiceReturn,
    InvoiceReturnItem, InvoiceStatus, Payment, PaymentAllocation, PaymentKind, PaymentMethod,
    ReturnStatus,
};
use crate::services::metrics::{ERRORS_TOTAL, GRPC_REQUESTS_TOTAL};
use chrono::{DateTime, NaiveDate, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use std::str::FromStr;
use tonic::Status;
use uuid::Uuid;

/// Format decimal for proto output, removing trailing zeros.
pub(crate) fn format_decimal(d: &Decimal) -> String {
    d.normalize().to_string()
}

pub(crate) fn timestamp(t: &DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: t.timestamp(),
        nanos: t.timestamp_subsec_nanos() as i32,
    }
}

fn invalid_argument(method: &str, message: String) -> Status {
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, "invalid_argument"])
        .inc();
    ERRORS_TOTAL.with_label_values(&["validation_error"]).inc();
    Status::invalid_argument(message)
}

pub(crate) fn parse_uuid(method: &str, field: &str, value: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value).map_err(|_| invalid_argument(method, format!("Invalid {} format", field)))
}

/// Empty means "not given".
pub(crate) fn parse_optional_uuid(
    method: &str,
    field: &str,
    value: &str,
) -> Result<Option<Uuid>, Status> {
    if value.is_empty() {
        Ok(None)
    } else {
        parse_uuid(method, field, value).map(Some)
    }
}

pub(crate) fn parse_decimal(method: &str, field: &str, value: &str) -> Result<Decimal, Status> {
    Decimal::from_str(value.trim())
        .map_err(|_| invalid_argument(method, format!("Invalid {} format", field)))
}

pub(crate) fn parse_optional_decimal(
    method: &str,
    field: &str,
    value: &str,
) -> Result<Option<Decimal>, Status> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse_decimal(method, field, value).map(Some)
    }
}

pub(crate) fn parse_optional_date(
    method: &str,
    field: &str,
    value: &str,
) -> Result<Option<NaiveDate>, Status> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| invalid_argument(method, format!("Invalid {} format, expected YYYY-MM-DD", field)))
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

pub(crate) fn payment_method_from_proto(value: i32) -> Option<PaymentMethod> {
    match ProtoPaymentMethod::try_from(value) {
        Ok(ProtoPaymentMethod::Cash) => Some(PaymentMethod::Cash),
        Ok(ProtoPaymentMethod::Transfer) => Some(PaymentMethod::Transfer),
        Ok(ProtoPaymentMethod::Card) => Some(PaymentMethod::Card),
        _ => None,
    }
}

fn payment_method_to_proto(method: PaymentMethod) -> i32 {
    match method {
        PaymentMethod::Cash => ProtoPaymentMethod::Cash as i32,
        PaymentMethod::Transfer => ProtoPaymentMethod::Transfer as i32,
        PaymentMethod::Card => ProtoPaymentMethod::Card as i32,
    }
}

pub(crate) fn return_status_from_proto(value: i32) -> Option<ReturnStatus> {
    match ProtoReturnStatus::try_from(value) {
        Ok(ProtoReturnStatus::PendingRefund) => Some(ReturnStatus::PendingRefund),
        Ok(ProtoReturnStatus::Refunded) => Some(ReturnStatus::Refunded),
        _ => None,
    }
}

fn return_status_to_proto(status: ReturnStatus) -> i32 {
    match status {
        ReturnStatus::PendingRefund => ProtoReturnStatus::PendingRefund as i32,
        ReturnStatus::Refunded => ProtoReturnStatus::Refunded as i32,
    }
}

fn invoice_status_to_proto(status: InvoiceStatus) -> i32 {
    match status {
        InvoiceStatus::Pending => ProtoInvoiceStatus::Pending as i32,
        InvoiceStatus::Paid => ProtoInvoiceStatus::Paid as i32,
        InvoiceStatus::Cancelled => ProtoInvoiceStatus::Cancelled as i32,
        InvoiceStatus::Processing => ProtoInvoiceStatus::Processing as i32,
    }
}

pub(crate) fn invoice_to_proto(invoice: &Invoice) -> ProtoInvoiceBalance {
    ProtoInvoiceBalance {
        invoice_id: invoice.invoice_id.to_string(),
        tenant_id: invoice.tenant_id.to_string(),
        invoice_number: invoice.invoice_number.clone(),
        customer_id: invoice.customer_id.to_string(),
        total: format_decimal(&invoice.total),
        paid_amount: format_decimal(&invoice.paid_amount),
        refunded_amount: format_decimal(&invoice.refunded_amount),
        returned_amount: format_decimal(&invoice.returned_amount),
        remaining_amount: format_decimal(&invoice.remaining_amount),
        status: invoice_status_to_proto(invoice.status()),
        exported_at: invoice.exported_utc.as_ref().map(timestamp),
        created_at: Some(timestamp(&invoice.created_utc)),
    }
}

pub(crate) fn allocation_to_proto(allocation: &PaymentAllocation) -> ProtoPaymentAllocation {
    ProtoPaymentAllocation {
        allocation_id: allocation.allocation_id.to_string(),
        payment_id: allocation.payment_id.to_string(),
        invoice_id: allocation.invoice_id.to_string(),
        amount: format_decimal(&allocation.amount),
        notes: allocation.notes.clone().unwrap_or_default(),
        created_at: Some(timestamp(&allocation.created_utc)),
        payment_reversed: allocation.payment_reversed,
    }
}

pub(crate) fn payment_to_proto(payment: &Payment) -> ProtoPayment {
    ProtoPayment {
        payment_id: payment.payment_id.to_string(),
        tenant_id: payment.tenant_id.to_string(),
        payment_number: payment.payment_number.clone(),
        customer_id: payment.customer_id.to_string(),
        amount: format_decimal(&payment.amount),
        kind: match payment.kind() {
            PaymentKind::Receipt => ProtoPaymentKind::Receipt as i32,
            PaymentKind::Settlement => ProtoPaymentKind::Settlement as i32,
        },
        payment_method: payment_method_to_proto(PaymentMethod::from_string(
            &payment.payment_method,
        )),
        payment_date: payment.payment_date.format("%Y-%m-%d").to_string(),
        notes: payment.notes.clone().unwrap_or_default(),
        created_by: payment.created_by.clone().unwrap_or_default(),
        created_at: Some(timestamp(&payment.created_utc)),
        reversed: payment.is_reversed(),
        reversed_at: payment.reversed_utc.as_ref().map(timestamp),
        reversal_reason: payment.reversal_reason.clone().unwrap_or_default(),
        allocations: payment.allocations.iter().map(allocation_to_proto).collect(),
    }
}

fn return_item_to_proto(item: &InvoiceReturnItem) -> ProtoInvoiceReturnItem {
    ProtoInvoiceReturnItem {
        return_item_id: item.return_item_id.to_string(),
        invoice_item_id: item.invoice_item_id.to_string(),
        product_id: item.product_id.map(|id| id.to_string()).unwrap_or_default(),
        product_name: item.product_name.clone(),
        unit: item.unit.clone(),
        unit_price: format_decimal(&item.unit_price),
        quantity_returned: format_decimal(&item.quantity_returned),
        subtotal: format_decimal(&item.subtotal),
        restore_inventory: item.restore_inventory,
    }
}

pub(crate) fn return_to_proto(ret: &InvoiceReturn) -> ProtoInvoiceReturn {
    ProtoInvoiceReturn {
        return_id: ret.return_id.to_string(),
        tenant_id: ret.tenant_id.to_string(),
        return_number: ret.return_number.clone(),
        invoice_id: ret.invoice_id.to_string(),
        customer_id: ret.customer_id.to_string(),
        reason: ret.reason.clone(),
        refund_amount: format_decimal(&ret.refund_amount),
        is_full_return: ret.is_full_return,
        status: return_status_to_proto(ret.status()),
        refund_payment_id: ret
            .refund_payment_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        refund_method: payment_method_to_proto(ret.refund_method()),
        create_refund_payment: ret.create_refund_payment,
        notes: ret.notes.clone().unwrap_or_default(),
        created_by: ret.created_by.clone().unwrap_or_default(),
        created_at: Some(timestamp(&ret.created_utc)),
        refunded_at: ret.refunded_utc.as_ref().map(timestamp),
        items: ret.items.iter().map(return_item_to_proto).collect(),
    }
}

pub(crate) fn available_to_proto(line: &AvailableReturnQuantity) -> ProtoAvailableReturnQuantity {
    ProtoAvailableReturnQuantity {
        invoice_item_id: line.invoice_item_id.to_string(),
        product_id: line.product_id.map(|id| id.to_string()).unwrap_or_default(),
        product_name: line.product_name.clone(),
        unit: line.unit.clone(),
        unit_price: format_decimal(&line.unit_price),
        original_quantity: format_decimal(&line.original_quantity),
        already_returned: format_decimal(&line.already_returned),
        available_for_return: format_decimal(&line.available_for_return),
        allows_decimal: line.allows_decimal,
    }
}

fn bucket_to_proto(bucket: &AgingBucket) -> ProtoAgingBucket {
    ProtoAgingBucket {
        label: bucket.label.clone(),
        min_days: bucket.min_days as i32,
        max_days: bucket.max_days.unwrap_or(0) as i32,
        invoice_count: bucket.invoice_count,
        amount: format_decimal(&bucket.amount),
    }
}

pub(crate) fn summary_to_proto(summary: &CustomerDebtSummary) -> ProtoCustomerDebtSummary {
    ProtoCustomerDebtSummary {
        customer_id: summary.customer_id.to_string(),
        customer_name: summary.customer_name.clone(),
        total_debt: format_decimal(&summary.total_debt),
        total_revenue: format_decimal(&summary.total_revenue),
        total_returned: format_decimal(&summary.total_returned),
        net_revenue: format_decimal(&summary.net_revenue),
        total_invoices: summary.total_invoices,
        unpaid_invoices: summary.unpaid_invoices,
        partially_paid_invoices: summary.partially_paid_invoices,
        overdue_debt: format_decimal(&summary.overdue_debt),
        overdue_invoices: summary.overdue_invoices,
        aging_buckets: summary.aging_buckets.iter().map(bucket_to_proto).collect(),
        invoices: summary.invoices.iter().map(invoice_to_proto).collect(),
    }
}
