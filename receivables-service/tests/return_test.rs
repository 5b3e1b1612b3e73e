//! Return creation and settlement integration tests.
//!
//! Require TEST_DATABASE_URL; run with `cargo test -- --ignored`.

mod common;

use common::{dec, spawn_app, TestApp};
use receivables_service::grpc::proto::{
    CreateReturnRequest, GetAvailableReturnQuantitiesRequest, GetInvoiceBalanceRequest,
    GetReturnRequest, InvoiceBalance, InvoiceReturn, InvoiceStatus, ListCustomerReturnsRequest,
    ListInvoiceReturnsRequest, PaymentKind, PaymentMethod, RecordPaymentRequest,
    ReturnItemInput, ReturnStatus, ReversePaymentRequest, UpdateReturnStatusRequest,
};
use uuid::Uuid;

fn return_request(app: &TestApp, invoice_id: Uuid, items: Vec<ReturnItemInput>) -> CreateReturnRequest {
    CreateReturnRequest {
        tenant_id: app.tenant_id.to_string(),
        invoice_id: invoice_id.to_string(),
        items,
        reason: "damaged in transit".to_string(),
        refund_amount: String::new(),
        create_refund_payment: true,
        payment_method: PaymentMethod::Cash as i32,
        notes: String::new(),
        created_by: "clerk".to_string(),
    }
}

fn line(invoice_item_id: Uuid, quantity: &str, restore_inventory: bool) -> ReturnItemInput {
    ReturnItemInput {
        invoice_item_id: invoice_item_id.to_string(),
        quantity: quantity.to_string(),
        restore_inventory,
    }
}

fn refund(app: &TestApp, ret: &InvoiceReturn, notes: &str) -> UpdateReturnStatusRequest {
    UpdateReturnStatusRequest {
        tenant_id: app.tenant_id.to_string(),
        return_id: ret.return_id.clone(),
        status: ReturnStatus::Refunded as i32,
        payment_method: PaymentMethod::Unspecified as i32,
        notes: notes.to_string(),
    }
}

async fn pay(app: &mut TestApp, customer_id: Uuid, amount: &str) -> String {
    app.grpc_client
        .record_payment(RecordPaymentRequest {
            tenant_id: app.tenant_id.to_string(),
            customer_id: customer_id.to_string(),
            amount: amount.to_string(),
            payment_method: PaymentMethod::Cash as i32,
            ..Default::default()
        })
        .await
        .expect("Failed to record payment")
        .into_inner()
        .payment
        .unwrap()
        .payment_id
}

async fn balance(app: &mut TestApp, invoice_id: Uuid) -> InvoiceBalance {
    app.grpc_client
        .get_invoice_balance(GetInvoiceBalanceRequest {
            tenant_id: app.tenant_id.to_string(),
            invoice_id: invoice_id.to_string(),
        })
        .await
        .unwrap()
        .into_inner()
        .invoice
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn full_return_of_paid_invoice_pays_cash_back() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Trang").await;
    let product = app.seed_product("Kettle", "5").await;
    let invoice = app.seed_invoice(customer, "20000", 3, true).await;
    let item = app.seed_item(invoice, Some(product), "2", "10000", false).await;
    pay(&mut app, customer, "20000").await;

    let created = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "2", true)]))
        .await
        .expect("Failed to create return")
        .into_inner()
        .invoice_return
        .unwrap();

    assert!(created.return_number.starts_with("RET-"));
    assert_eq!(created.status, ReturnStatus::PendingRefund as i32);
    assert_eq!(dec(&created.refund_amount), dec("20000"));
    assert!(created.is_full_return);
    assert_eq!(app.stock_of(product).await, dec("7"));

    // Creation leaves the balance alone.
    assert_eq!(dec(&balance(&mut app, invoice).await.remaining_amount), dec("0"));

    let updated = app
        .grpc_client
        .update_return_status(refund(&app, &created, "cash handed over"))
        .await
        .expect("Failed to refund return")
        .into_inner();

    let ret = updated.invoice_return.unwrap();
    assert_eq!(ret.status, ReturnStatus::Refunded as i32);
    assert!(ret.refunded_at.is_some());
    assert_eq!(ret.notes, "[pending_refund -> refunded] cash handed over");

    let settlement = updated.settlement_payment.expect("settlement payment");
    assert_eq!(settlement.kind, PaymentKind::Settlement as i32);
    assert_eq!(dec(&settlement.amount), dec("-20000"));
    assert_eq!(settlement.payment_number, format!("REFUND-{}", ret.return_number));
    assert_eq!(settlement.payment_method, PaymentMethod::Cash as i32);
    assert_eq!(ret.refund_payment_id, settlement.payment_id);

    let inv = balance(&mut app, invoice).await;
    assert_eq!(dec(&inv.returned_amount), dec("20000"));
    assert_eq!(dec(&inv.refunded_amount), dec("20000"));
    assert_eq!(dec(&inv.remaining_amount), dec("0"));
    assert_eq!(inv.status, InvoiceStatus::Paid as i32);
    app.assert_invoice_consistent(invoice).await;
}

#[tokio::test]
#[ignore]
async fn return_on_unpaid_invoice_only_reduces_debt() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Uyen").await;
    let invoice = app.seed_invoice(customer, "100000", 3, true).await;
    let item = app.seed_item(invoice, None, "10", "10000", false).await;
    pay(&mut app, customer, "50000").await;

    let created = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "3", false)]))
        .await
        .unwrap()
        .into_inner()
        .invoice_return
        .unwrap();
    assert!(!created.is_full_return);

    let updated = app
        .grpc_client
        .update_return_status(refund(&app, &created, ""))
        .await
        .unwrap()
        .into_inner();
    assert!(updated.settlement_payment.is_none());

    let inv = balance(&mut app, invoice).await;
    assert_eq!(dec(&inv.returned_amount), dec("30000"));
    assert_eq!(dec(&inv.refunded_amount), dec("0"));
    assert_eq!(dec(&inv.remaining_amount), dec("20000"));
    assert_eq!(inv.status, InvoiceStatus::Pending as i32);
    app.assert_invoice_consistent(invoice).await;
}

#[tokio::test]
#[ignore]
async fn partial_overpayment_settles_only_the_difference() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Xuan").await;
    let invoice = app.seed_invoice(customer, "100000", 3, true).await;
    let item = app.seed_item(invoice, None, "10", "10000", false).await;
    pay(&mut app, customer, "80000").await;

    let created = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "5", false)]))
        .await
        .unwrap()
        .into_inner()
        .invoice_return
        .unwrap();

    let mut request = refund(&app, &created, "");
    request.payment_method = PaymentMethod::Transfer as i32;
    let updated = app
        .grpc_client
        .update_return_status(request)
        .await
        .unwrap()
        .into_inner();

    let settlement = updated.settlement_payment.unwrap();
    assert_eq!(dec(&settlement.amount), dec("-30000"));
    assert_eq!(settlement.payment_method, PaymentMethod::Transfer as i32);
    assert_eq!(
        updated.invoice_return.unwrap().refund_method,
        PaymentMethod::Transfer as i32
    );

    let inv = balance(&mut app, invoice).await;
    assert_eq!(dec(&inv.remaining_amount), dec("0"));
    assert_eq!(dec(&inv.refunded_amount), dec("30000"));
    app.assert_invoice_consistent(invoice).await;
}

#[tokio::test]
#[ignore]
async fn settlement_payments_cannot_be_reversed() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Yen").await;
    let invoice = app.seed_invoice(customer, "1000", 3, true).await;
    let item = app.seed_item(invoice, None, "1", "1000", false).await;
    pay(&mut app, customer, "1000").await;

    let created = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "1", false)]))
        .await
        .unwrap()
        .into_inner()
        .invoice_return
        .unwrap();
    let settlement = app
        .grpc_client
        .update_return_status(refund(&app, &created, ""))
        .await
        .unwrap()
        .into_inner()
        .settlement_payment
        .unwrap();

    let status = app
        .grpc_client
        .reverse_payment(ReversePaymentRequest {
            tenant_id: app.tenant_id.to_string(),
            payment_id: settlement.payment_id,
            reason: "oops".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);
}

#[tokio::test]
#[ignore]
async fn refunded_returns_are_terminal() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Anh").await;
    let invoice = app.seed_invoice(customer, "1000", 3, true).await;
    let item = app.seed_item(invoice, None, "2", "500", false).await;

    let created = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "1", false)]))
        .await
        .unwrap()
        .into_inner()
        .invoice_return
        .unwrap();

    app.grpc_client
        .update_return_status(refund(&app, &created, ""))
        .await
        .unwrap();

    // Same status is a no-op.
    let again = app
        .grpc_client
        .update_return_status(refund(&app, &created, "twice"))
        .await
        .unwrap()
        .into_inner();
    assert!(again.settlement_payment.is_none());
    assert_eq!(dec(&balance(&mut app, invoice).await.returned_amount), dec("500"));

    let mut back = refund(&app, &created, "");
    back.status = ReturnStatus::PendingRefund as i32;
    let status = app.grpc_client.update_return_status(back).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);
}

#[tokio::test]
#[ignore]
async fn return_quantities_are_bounded_by_what_was_sold() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Bich").await;
    let invoice = app.seed_invoice(customer, "50000", 3, true).await;
    let pieces = app.seed_item(invoice, None, "5", "10000", false).await;

    app.grpc_client
        .create_return(return_request(&app, invoice, vec![line(pieces, "3", false)]))
        .await
        .expect("Failed to create return");

    let status = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(pieces, "3", false)]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    let status = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(pieces, "1.5", false)]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let available = app
        .grpc_client
        .get_available_return_quantities(GetAvailableReturnQuantitiesRequest {
            tenant_id: app.tenant_id.to_string(),
            invoice_id: invoice.to_string(),
        })
        .await
        .unwrap()
        .into_inner()
        .items;
    assert_eq!(available.len(), 1);
    assert_eq!(dec(&available[0].original_quantity), dec("5"));
    assert_eq!(dec(&available[0].already_returned), dec("3"));
    assert_eq!(dec(&available[0].available_for_return), dec("2"));
    assert!(!available[0].allows_decimal);
}

#[tokio::test]
#[ignore]
async fn decimal_units_accept_fractional_returns() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Cuong").await;
    let rice = app.seed_product("Rice", "100").await;
    let invoice = app.seed_invoice(customer, "30000", 3, true).await;
    let item = app.seed_item(invoice, Some(rice), "2.5", "12000", true).await;

    let created = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "0.75", true)]))
        .await
        .expect("Failed to create return")
        .into_inner()
        .invoice_return
        .unwrap();

    assert_eq!(dec(&created.refund_amount), dec("9000"));
    assert_eq!(dec(&created.items[0].quantity_returned), dec("0.75"));
    assert_eq!(app.stock_of(rice).await, dec("100.75"));
}

#[tokio::test]
#[ignore]
async fn returns_require_an_eligible_invoice() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Dao").await;
    let invoice = app.seed_invoice(customer, "1000", 3, true).await;
    let item = app.seed_item(invoice, None, "1", "1000", false).await;

    app.grpc_client
        .cancel_invoice(receivables_service::grpc::proto::CancelInvoiceRequest {
            tenant_id: app.tenant_id.to_string(),
            invoice_id: invoice.to_string(),
        })
        .await
        .unwrap();

    let status = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "1", false)]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    let status = app
        .grpc_client
        .create_return(return_request(&app, Uuid::new_v4(), vec![line(item, "1", false)]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::NotFound);
}

#[tokio::test]
#[ignore]
async fn returns_are_listed_by_invoice_and_customer() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Ha").await;
    let invoice = app.seed_invoice(customer, "4000", 3, true).await;
    let item = app.seed_item(invoice, None, "4", "1000", false).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let created = app
            .grpc_client
            .create_return(return_request(&app, invoice, vec![line(item, "1", false)]))
            .await
            .unwrap()
            .into_inner()
            .invoice_return
            .unwrap();
        ids.push(created);
    }
    app.grpc_client
        .update_return_status(refund(&app, &ids[0], ""))
        .await
        .unwrap();

    let by_invoice = app
        .grpc_client
        .list_invoice_returns(ListInvoiceReturnsRequest {
            tenant_id: app.tenant_id.to_string(),
            invoice_id: invoice.to_string(),
        })
        .await
        .unwrap()
        .into_inner()
        .returns;
    assert_eq!(by_invoice.len(), 2);
    assert!(by_invoice.iter().all(|r| r.items.len() == 1));

    let pending = app
        .grpc_client
        .list_customer_returns(ListCustomerReturnsRequest {
            tenant_id: app.tenant_id.to_string(),
            customer_id: customer.to_string(),
            status: ReturnStatus::PendingRefund as i32,
        })
        .await
        .unwrap()
        .into_inner()
        .returns;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].return_id, ids[1].return_id);

    let fetched = app
        .grpc_client
        .get_return(GetReturnRequest {
            tenant_id: app.tenant_id.to_string(),
            return_id: ids[0].return_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .invoice_return
        .unwrap();
    assert_eq!(fetched.status, ReturnStatus::Refunded as i32);
}

#[tokio::test]
#[ignore]
async fn invoices_with_unsettled_returns_cannot_be_cancelled() {
    let mut app = spawn_app().await;
    let customer = app.seed_customer("Son").await;
    let invoice = app.seed_invoice(customer, "2000", 3, true).await;
    let item = app.seed_item(invoice, None, "2", "1000", false).await;

    let created = app
        .grpc_client
        .create_return(return_request(&app, invoice, vec![line(item, "1", false)]))
        .await
        .unwrap()
        .into_inner()
        .invoice_return
        .unwrap();

    let cancel = receivables_service::grpc::proto::CancelInvoiceRequest {
        tenant_id: app.tenant_id.to_string(),
        invoice_id: invoice.to_string(),
    };
    let status = app
        .grpc_client
        .cancel_invoice(cancel.clone())
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    let inv = balance(&mut app, invoice).await;
    assert_eq!(inv.status, InvoiceStatus::Pending as i32);

    // Once settled the return no longer blocks cancellation.
    app.grpc_client
        .update_return_status(refund(&app, &created, ""))
        .await
        .unwrap();
    let cancelled = app
        .grpc_client
        .cancel_invoice(cancel)
        .await
        .expect("Failed to cancel invoice")
        .into_inner()
        .invoice
        .unwrap();
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled as i32);
    assert_eq!(dec(&cancelled.returned_amount), dec("1000"));
}
