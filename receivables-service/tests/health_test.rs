//! gRPC health integration test.
//!
//! Requires TEST_DATABASE_URL; run with `cargo test -- --ignored`.

mod common;

use common::spawn_app;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

#[tokio::test]
#[ignore]
async fn receivables_service_reports_serving() {
    let app = spawn_app().await;

    let channel = tonic::transport::Endpoint::new(format!("http://127.0.0.1:{}", app.grpc_port))
        .expect("Invalid health endpoint")
        .connect()
        .await
        .expect("Failed to connect health client");
    let mut client = HealthClient::new(channel);

    let response = client
        .check(HealthCheckRequest {
            service: "micros.receivables.v1.ReceivablesService".to_string(),
        })
        .await
        .expect("Health check failed")
        .into_inner();

    assert_eq!(response.status, ServingStatus::Serving as i32);
}
