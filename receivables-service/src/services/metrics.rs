//! Prometheus metrics for receivables-service.

use crate::error::LedgerError;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// gRPC request counter by method and status.
pub static GRPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register grpc_requests_total")
});

/// gRPC request duration histogram by method.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receivables_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register grpc_request_duration")
});

/// Payments recorded by method and allocation mode.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_payments_total",
        "Total number of payments recorded",
        &["payment_method", "mode"] // manual, constrained_fifo, auto_fifo, settlement
    )
    .expect("Failed to register payments_total")
});

/// Payment reversals.
pub static REVERSALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_payment_reversals_total",
        "Total number of payment reversals",
        &["payment_method"]
    )
    .expect("Failed to register payment_reversals_total")
});

/// Movements applied by the allocation writer.
pub static LEDGER_MOVEMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_ledger_movements_total",
        "Total number of invoice ledger movements by kind",
        &["movement"]
    )
    .expect("Failed to register ledger_movements_total")
});

/// Returns by workflow event.
pub static RETURNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_returns_total",
        "Total number of invoice returns by status",
        &["status"] // pending_refund, refunded
    )
    .expect("Failed to register returns_total")
});

/// Cash amounts by direction.
pub static CASH_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_cash_amount_total",
        "Total cash amount by direction",
        &["direction"] // received, refunded
    )
    .expect("Failed to register cash_amount_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receivables_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&GRPC_REQUESTS_TOTAL);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&REVERSALS_TOTAL);
    Lazy::force(&LEDGER_MOVEMENTS_TOTAL);
    Lazy::force(&RETURNS_TOTAL);
    Lazy::force(&CASH_AMOUNT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Count a failed request by method and error kind.
pub fn record_error(method: &str, err: &LedgerError) {
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, err.kind()])
        .inc();
    ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_exported() {
        init_metrics();
        PAYMENTS_TOTAL
            .with_label_values(&["cash", "auto_fifo"])
            .inc();

        let output = get_metrics();
        assert!(output.contains("receivables_payments_total"));
    }

    #[test]
    fn record_error_counts_by_kind() {
        init_metrics();
        let before = ERRORS_TOTAL.with_label_values(&["over_allocation"]).get();
        record_error("RecordPayment", &LedgerError::over_allocation("too much"));
        let after = ERRORS_TOTAL.with_label_values(&["over_allocation"]).get();
        assert_eq!(after, before + 1.0);
    }
}
