//! gRPC service implementation for receivables-service.

use crate::error::LedgerError;
use crate::grpc::convert::{
    allocation_to_proto, available_to_proto, invoice_to_proto, non_empty, parse_decimal,
    parse_optional_date, parse_optional_decimal, parse_optional_uuid, parse_uuid,
    payment_method_from_proto, payment_to_proto, return_status_from_proto, return_to_proto,
    summary_to_proto,
};
use crate::grpc::proto::{
    receivables_service_server::ReceivablesService, CancelInvoiceRequest, CancelInvoiceResponse,
    CreateReturnRequest, CreateReturnResponse, GetAvailableReturnQuantitiesRequest,
    GetAvailableReturnQuantitiesResponse, GetCustomerDebtSummaryRequest,
    GetCustomerDebtSummaryResponse, GetInvoiceBalanceRequest, GetInvoiceBalanceResponse,
    GetPaymentRequest, GetPaymentResponse, GetReturnRequest, GetReturnResponse,
    ListCustomerReturnsRequest, ListCustomerReturnsResponse, ListInvoiceAllocationsRequest,
    ListInvoiceAllocationsResponse, ListInvoiceReturnsRequest, ListInvoiceReturnsResponse,
    ListPaymentsRequest, ListPaymentsResponse, RecordPaymentRequest, RecordPaymentResponse,
    ReversePaymentRequest, ReversePaymentResponse, UpdateReturnStatusRequest,
    UpdateReturnStatusResponse,
};
use crate::models::{
    CreateReturn, CreateReturnItem, ListPaymentsFilter, ManualAllocation, PaymentMethod,
    RecordPayment, UpdateReturnStatus,
};
use crate::services::metrics::{record_error, GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::Database;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn, Span};

/// Count, log and convert a rejected ledger call.
fn reject(method: &str, err: LedgerError) -> Status {
    record_error(method, &err);
    match &err {
        LedgerError::Database(_) => warn!(method, error = %err, "Ledger call failed"),
        _ => warn!(method, error = %err, "Ledger call rejected"),
    }
    Status::from(err)
}

fn not_found(method: &str, what: &str) -> Status {
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, "not_found"])
        .inc();
    Status::not_found(format!("{} not found", what))
}

fn ok(method: &str) {
    GRPC_REQUESTS_TOTAL.with_label_values(&[method, "ok"]).inc();
}

/// ReceivablesService implementation.
pub struct ReceivablesServiceImpl {
    db: Arc<Database>,
    overdue_after_days: i64,
}

impl ReceivablesServiceImpl {
    pub fn new(db: Arc<Database>, overdue_after_days: i64) -> Self {
        Self {
            db,
            overdue_after_days,
        }
    }
}

#[tonic::async_trait]
impl ReceivablesService for ReceivablesServiceImpl {
    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(
            service = "receivables-service",
            method = "RecordPayment",
            tenant_id,
            payment_id
        )
    )]
    async fn record_payment(
        &self,
        request: Request<RecordPaymentRequest>,
    ) -> Result<Response<RecordPaymentResponse>, Status> {
        const METHOD: &str = "RecordPayment";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        let customer_id = parse_uuid(METHOD, "customer_id", &req.customer_id)?;
        let amount = parse_decimal(METHOD, "amount", &req.amount)?;
        let payment_date = parse_optional_date(METHOD, "payment_date", &req.payment_date)?;

        let invoice_ids = req
            .invoice_ids
            .iter()
            .map(|id| parse_uuid(METHOD, "invoice_id", id))
            .collect::<Result<Vec<_>, _>>()?;

        let manual_allocations = req
            .manual_allocations
            .iter()
            .map(|m| {
                Ok(ManualAllocation {
                    invoice_id: parse_uuid(METHOD, "invoice_id", &m.invoice_id)?,
                    amount: parse_decimal(METHOD, "allocation amount", &m.amount)?,
                })
            })
            .collect::<Result<Vec<_>, Status>>()?;

        let input = RecordPayment {
            tenant_id,
            customer_id,
            amount,
            payment_method: payment_method_from_proto(req.payment_method)
                .unwrap_or(PaymentMethod::Cash),
            invoice_ids,
            manual_allocations,
            notes: non_empty(req.notes),
            payment_date,
            created_by: non_empty(req.created_by),
        };

        let payment = self
            .db
            .record_payment(&input)
            .await
            .map_err(|e| reject(METHOD, e))?;

        Span::current().record("payment_id", payment.payment_id.to_string());
        ok(METHOD);
        timer.observe_duration();

        info!(
            tenant_id = %tenant_id,
            payment_number = %payment.payment_number,
            amount = %payment.amount,
            "Payment recorded"
        );

        Ok(Response::new(RecordPaymentResponse {
            payment: Some(payment_to_proto(&payment)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "GetPayment", tenant_id, payment_id)
    )]
    async fn get_payment(
        &self,
        request: Request<GetPaymentRequest>,
    ) -> Result<Response<GetPaymentResponse>, Status> {
        const METHOD: &str = "GetPayment";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let payment_id = parse_uuid(METHOD, "payment_id", &req.payment_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("payment_id", payment_id.to_string());

        let payment = self
            .db
            .get_payment(tenant_id, payment_id)
            .await
            .map_err(|e| reject(METHOD, e))?
            .ok_or_else(|| not_found(METHOD, "Payment"))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(GetPaymentResponse {
            payment: Some(payment_to_proto(&payment)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "ListPayments", tenant_id)
    )]
    async fn list_payments(
        &self,
        request: Request<ListPaymentsRequest>,
    ) -> Result<Response<ListPaymentsResponse>, Status> {
        const METHOD: &str = "ListPayments";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());

        let filter = ListPaymentsFilter {
            customer_id: parse_optional_uuid(METHOD, "customer_id", &req.customer_id)?,
            invoice_id: parse_optional_uuid(METHOD, "invoice_id", &req.invoice_id)?,
            start_date: parse_optional_date(METHOD, "start_date", &req.start_date)?,
            end_date: parse_optional_date(METHOD, "end_date", &req.end_date)?,
            include_reversed: req.include_reversed,
            page_size: req.page_size,
            page_token: parse_optional_uuid(METHOD, "page_token", &req.page_token)?,
        };

        let payments = self
            .db
            .list_payments(tenant_id, &filter)
            .await
            .map_err(|e| reject(METHOD, e))?;

        let next_page_token = if payments.len() as i64 >= filter.limit() {
            payments
                .last()
                .map(|p| p.payment_id.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(ListPaymentsResponse {
            payments: payments.iter().map(payment_to_proto).collect(),
            next_page_token,
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "ReversePayment", tenant_id, payment_id)
    )]
    async fn reverse_payment(
        &self,
        request: Request<ReversePaymentRequest>,
    ) -> Result<Response<ReversePaymentResponse>, Status> {
        const METHOD: &str = "ReversePayment";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let payment_id = parse_uuid(METHOD, "payment_id", &req.payment_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("payment_id", payment_id.to_string());

        let payment = self
            .db
            .reverse_payment(tenant_id, payment_id, &req.reason)
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        info!(
            tenant_id = %tenant_id,
            payment_number = %payment.payment_number,
            "Payment reversed"
        );

        Ok(Response::new(ReversePaymentResponse {
            payment: Some(payment_to_proto(&payment)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "ListInvoiceAllocations", tenant_id, invoice_id)
    )]
    async fn list_invoice_allocations(
        &self,
        request: Request<ListInvoiceAllocationsRequest>,
    ) -> Result<Response<ListInvoiceAllocationsResponse>, Status> {
        const METHOD: &str = "ListInvoiceAllocations";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let invoice_id = parse_uuid(METHOD, "invoice_id", &req.invoice_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("invoice_id", invoice_id.to_string());

        let allocations = self
            .db
            .list_invoice_allocations(tenant_id, invoice_id)
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(ListInvoiceAllocationsResponse {
            allocations: allocations.iter().map(allocation_to_proto).collect(),
        }))
    }

    // -------------------------------------------------------------------------
    // Invoice balances
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "GetInvoiceBalance", tenant_id, invoice_id)
    )]
    async fn get_invoice_balance(
        &self,
        request: Request<GetInvoiceBalanceRequest>,
    ) -> Result<Response<GetInvoiceBalanceResponse>, Status> {
        const METHOD: &str = "GetInvoiceBalance";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let invoice_id = parse_uuid(METHOD, "invoice_id", &req.invoice_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("invoice_id", invoice_id.to_string());

        let invoice = self
            .db
            .get_invoice_balance(tenant_id, invoice_id)
            .await
            .map_err(|e| reject(METHOD, e))?
            .ok_or_else(|| not_found(METHOD, "Invoice"))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(GetInvoiceBalanceResponse {
            invoice: Some(invoice_to_proto(&invoice)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "CancelInvoice", tenant_id, invoice_id)
    )]
    async fn cancel_invoice(
        &self,
        request: Request<CancelInvoiceRequest>,
    ) -> Result<Response<CancelInvoiceResponse>, Status> {
        const METHOD: &str = "CancelInvoice";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let invoice_id = parse_uuid(METHOD, "invoice_id", &req.invoice_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("invoice_id", invoice_id.to_string());

        let invoice = self
            .db
            .cancel_invoice(tenant_id, invoice_id)
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(CancelInvoiceResponse {
            invoice: Some(invoice_to_proto(&invoice)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "GetCustomerDebtSummary", tenant_id, customer_id)
    )]
    async fn get_customer_debt_summary(
        &self,
        request: Request<GetCustomerDebtSummaryRequest>,
    ) -> Result<Response<GetCustomerDebtSummaryResponse>, Status> {
        const METHOD: &str = "GetCustomerDebtSummary";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let customer_id = parse_uuid(METHOD, "customer_id", &req.customer_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("customer_id", customer_id.to_string());

        let summary = self
            .db
            .get_customer_debt_summary(tenant_id, customer_id, self.overdue_after_days)
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(GetCustomerDebtSummaryResponse {
            summary: Some(summary_to_proto(&summary)),
        }))
    }

    // -------------------------------------------------------------------------
    // Returns
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "CreateReturn", tenant_id, invoice_id, return_id)
    )]
    async fn create_return(
        &self,
        request: Request<CreateReturnRequest>,
    ) -> Result<Response<CreateReturnResponse>, Status> {
        const METHOD: &str = "CreateReturn";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let invoice_id = parse_uuid(METHOD, "invoice_id", &req.invoice_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("invoice_id", invoice_id.to_string());

        let items = req
            .items
            .iter()
            .map(|item| {
                Ok(CreateReturnItem {
                    invoice_item_id: parse_uuid(METHOD, "invoice_item_id", &item.invoice_item_id)?,
                    quantity: parse_decimal(METHOD, "quantity", &item.quantity)?,
                    restore_inventory: item.restore_inventory,
                })
            })
            .collect::<Result<Vec<_>, Status>>()?;

        let input = CreateReturn {
            tenant_id,
            invoice_id,
            items,
            reason: req.reason,
            refund_amount: parse_optional_decimal(METHOD, "refund_amount", &req.refund_amount)?,
            create_refund_payment: req.create_refund_payment,
            payment_method: payment_method_from_proto(req.payment_method)
                .unwrap_or(PaymentMethod::Cash),
            notes: non_empty(req.notes),
            created_by: non_empty(req.created_by),
        };

        let created = self
            .db
            .create_return(&input)
            .await
            .map_err(|e| reject(METHOD, e))?;

        Span::current().record("return_id", created.return_id.to_string());
        ok(METHOD);
        timer.observe_duration();

        info!(
            tenant_id = %tenant_id,
            return_number = %created.return_number,
            refund_amount = %created.refund_amount,
            "Return created"
        );

        Ok(Response::new(CreateReturnResponse {
            invoice_return: Some(return_to_proto(&created)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "GetReturn", tenant_id, return_id)
    )]
    async fn get_return(
        &self,
        request: Request<GetReturnRequest>,
    ) -> Result<Response<GetReturnResponse>, Status> {
        const METHOD: &str = "GetReturn";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let return_id = parse_uuid(METHOD, "return_id", &req.return_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("return_id", return_id.to_string());

        let found = self
            .db
            .get_return(tenant_id, return_id)
            .await
            .map_err(|e| reject(METHOD, e))?
            .ok_or_else(|| not_found(METHOD, "Return"))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(GetReturnResponse {
            invoice_return: Some(return_to_proto(&found)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "ListInvoiceReturns", tenant_id, invoice_id)
    )]
    async fn list_invoice_returns(
        &self,
        request: Request<ListInvoiceReturnsRequest>,
    ) -> Result<Response<ListInvoiceReturnsResponse>, Status> {
        const METHOD: &str = "ListInvoiceReturns";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let invoice_id = parse_uuid(METHOD, "invoice_id", &req.invoice_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("invoice_id", invoice_id.to_string());

        let returns = self
            .db
            .list_invoice_returns(tenant_id, invoice_id)
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(ListInvoiceReturnsResponse {
            returns: returns.iter().map(return_to_proto).collect(),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "ListCustomerReturns", tenant_id, customer_id)
    )]
    async fn list_customer_returns(
        &self,
        request: Request<ListCustomerReturnsRequest>,
    ) -> Result<Response<ListCustomerReturnsResponse>, Status> {
        const METHOD: &str = "ListCustomerReturns";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let customer_id = parse_uuid(METHOD, "customer_id", &req.customer_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("customer_id", customer_id.to_string());

        let returns = self
            .db
            .list_customer_returns(tenant_id, customer_id, return_status_from_proto(req.status))
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(ListCustomerReturnsResponse {
            returns: returns.iter().map(return_to_proto).collect(),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "UpdateReturnStatus", tenant_id, return_id)
    )]
    async fn update_return_status(
        &self,
        request: Request<UpdateReturnStatusRequest>,
    ) -> Result<Response<UpdateReturnStatusResponse>, Status> {
        const METHOD: &str = "UpdateReturnStatus";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let return_id = parse_uuid(METHOD, "return_id", &req.return_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("return_id", return_id.to_string());

        let status = return_status_from_proto(req.status).ok_or_else(|| {
            reject(
                METHOD,
                LedgerError::validation("A target return status is required"),
            )
        })?;

        let input = UpdateReturnStatus {
            tenant_id,
            return_id,
            status,
            payment_method: payment_method_from_proto(req.payment_method),
            notes: non_empty(req.notes),
        };

        let (updated, settlement) = self
            .db
            .update_return_status(&input)
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        info!(
            tenant_id = %tenant_id,
            return_number = %updated.return_number,
            status = %updated.status,
            settlement_payment = ?settlement.as_ref().map(|p| p.payment_number.as_str()),
            "Return status updated"
        );

        Ok(Response::new(UpdateReturnStatusResponse {
            invoice_return: Some(return_to_proto(&updated)),
            settlement_payment: settlement.as_ref().map(payment_to_proto),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "receivables-service", method = "GetAvailableReturnQuantities", tenant_id, invoice_id)
    )]
    async fn get_available_return_quantities(
        &self,
        request: Request<GetAvailableReturnQuantitiesRequest>,
    ) -> Result<Response<GetAvailableReturnQuantitiesResponse>, Status> {
        const METHOD: &str = "GetAvailableReturnQuantities";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();
        let req = request.into_inner();

        let tenant_id = parse_uuid(METHOD, "tenant_id", &req.tenant_id)?;
        let invoice_id = parse_uuid(METHOD, "invoice_id", &req.invoice_id)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Span::current().record("invoice_id", invoice_id.to_string());

        let items = self
            .db
            .get_available_return_quantities(tenant_id, invoice_id)
            .await
            .map_err(|e| reject(METHOD, e))?;

        ok(METHOD);
        timer.observe_duration();

        Ok(Response::new(GetAvailableReturnQuantitiesResponse {
            items: items.iter().map(available_to_proto).collect(),
        }))
    }
}
