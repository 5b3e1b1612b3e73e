//! Common test utilities for receivables-service integration tests.

use chrono::{Duration, Utc};
use receivables_service::config::{DatabaseConfig, LedgerConfig, ReceivablesConfig};
use receivables_service::grpc::proto::receivables_service_client::ReceivablesServiceClient;
use receivables_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Once;
use tonic::transport::Channel;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,receivables_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn test_config() -> ReceivablesConfig {
    let database_url =
        std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");

    ReceivablesConfig {
        common: CommonConfig { port: 0 },
        service_name: "receivables-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 8,
            min_connections: 1,
        },
        ledger: LedgerConfig::default(),
    }
}

/// Test application wrapper.
#[allow(dead_code)]
pub struct TestApp {
    pub grpc_client: ReceivablesServiceClient<Channel>,
    pub tenant_id: Uuid,
    pub http_port: u16,
    pub grpc_port: u16,
    /// Direct pool access for seeding collaborator rows.
    pub pool: PgPool,
}

/// Spawn a test application and return the gRPC client with a unique tenant ID.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let app = Application::build(test_config())
        .await
        .expect("Failed to build application");

    let http_port = app.http_port();
    let grpc_port = app.grpc_port();
    let pool = app.db().pool().clone();
    let grpc_addr = format!("http://127.0.0.1:{}", grpc_port);

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let grpc_client = {
        let mut attempts = 0;
        loop {
            match ReceivablesServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        grpc_client,
        tenant_id: Uuid::new_v4(),
        http_port,
        grpc_port,
        pool,
    }
}

#[allow(dead_code)]
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal")
}

#[allow(dead_code)]
impl TestApp {
    pub async fn seed_customer(&self, name: &str) -> Uuid {
        let customer_id = Uuid::new_v4();
        sqlx::query("INSERT INTO customers (customer_id, tenant_id, name) VALUES ($1, $2, $3)")
            .bind(customer_id)
            .bind(self.tenant_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .expect("Failed to seed customer");
        customer_id
    }

    /// Seed an open invoice created `age_days` ago.
    pub async fn seed_invoice(
        &self,
        customer_id: Uuid,
        total: &str,
        age_days: i64,
        exported: bool,
    ) -> Uuid {
        let invoice_id = Uuid::new_v4();
        let created = Utc::now() - Duration::days(age_days);
        let total = dec(total);
        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, tenant_id, invoice_number, customer_id, total, remaining_amount,
                status, exported_utc, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $5, 'pending', $6, $7, $7)
            "#,
        )
        .bind(invoice_id)
        .bind(self.tenant_id)
        .bind(format!("INV-{}", &invoice_id.to_string()[..8]))
        .bind(customer_id)
        .bind(total)
        .bind(if exported { Some(created) } else { None })
        .bind(created)
        .execute(&self.pool)
        .await
        .expect("Failed to seed invoice");
        invoice_id
    }

    pub async fn seed_product(&self, name: &str, stock: &str) -> Uuid {
        let product_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO products (product_id, tenant_id, name, stock_quantity) VALUES ($1, $2, $3, $4)",
        )
        .bind(product_id)
        .bind(self.tenant_id)
        .bind(name)
        .bind(dec(stock))
        .execute(&self.pool)
        .await
        .expect("Failed to seed product");
        product_id
    }

    pub async fn seed_item(
        &self,
        invoice_id: Uuid,
        product_id: Option<Uuid>,
        quantity: &str,
        unit_price: &str,
        allows_decimal: bool,
    ) -> Uuid {
        let invoice_item_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoice_items (
                invoice_item_id, tenant_id, invoice_id, product_id, product_name, unit,
                allows_decimal, unit_price, quantity
            )
            VALUES ($1, $2, $3, $4, 'Test product', $5, $6, $7, $8)
            "#,
        )
        .bind(invoice_item_id)
        .bind(self.tenant_id)
        .bind(invoice_id)
        .bind(product_id)
        .bind(if allows_decimal { "kg" } else { "pcs" })
        .bind(allows_decimal)
        .bind(dec(unit_price))
        .bind(dec(quantity))
        .execute(&self.pool)
        .await
        .expect("Failed to seed invoice item");
        invoice_item_id
    }

    pub async fn stock_of(&self, product_id: Uuid) -> Decimal {
        sqlx::query_scalar::<_, Decimal>("SELECT stock_quantity FROM products WHERE product_id = $1")
            .bind(product_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to read stock")
    }

    /// Check `remaining == total - paid + refunded - returned` straight from the table.
    pub async fn assert_invoice_consistent(&self, invoice_id: Uuid) {
        let (total, paid, refunded, returned, remaining, status): (
            Decimal,
            Decimal,
            Decimal,
            Decimal,
            Decimal,
            String,
        ) = sqlx::query_as(
            r#"
            SELECT total, paid_amount, refunded_amount, returned_amount, remaining_amount, status
            FROM invoices WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to read invoice");

        let drift = (remaining - (total - paid + refunded - returned)).abs();
        assert!(drift <= dec("0.01"), "ledger drift {} on {}", drift, invoice_id);
        if status != "cancelled" {
            assert_eq!(remaining <= dec("0.01"), status == "paid");
        }
    }
}
