//! Wires the ledger into an HTTP probe server and a gRPC server.

use crate::config::ReceivablesConfig;
use crate::grpc::{
    proto::{receivables_service_server::ReceivablesServiceServer, FILE_DESCRIPTOR_SET},
    ReceivablesServiceImpl,
};
use crate::services::{get_metrics, init_metrics, Database};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::grpc::trace_context_interceptor;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// `/health` reports pool usage alongside the store round trip.
async fn health(State(db): State<Arc<Database>>) -> impl IntoResponse {
    let pool = db.pool();
    let body = json!({
        "service": "receivables-service",
        "version": env!("CARGO_PKG_VERSION"),
        "pool_size": pool.size(),
        "pool_idle": pool.num_idle(),
    });

    match db.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "details": body }))),
        Err(e) => {
            tracing::warn!(error = %e, "Ledger store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "details": body })),
            )
        }
    }
}

async fn ready(State(db): State<Arc<Database>>) -> StatusCode {
    match db.ping().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        get_metrics(),
    )
}

fn probe_router(db: Arc<Database>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(db)
}

async fn bind(port: u16, what: &str) -> Result<(TcpListener, u16), AppError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(error = %e, %addr, listener = what, "Bind failed");
        AppError::from(e)
    })?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// A bound, migrated service waiting for [`Application::run_until_stopped`].
pub struct Application {
    http: TcpListener,
    grpc: TcpListener,
    http_port: u16,
    grpc_port: u16,
    db: Arc<Database>,
    overdue_after_days: i64,
}

impl Application {
    /// Connect and migrate the store, then bind both listeners.
    ///
    /// gRPC takes the HTTP port + 1. With port 0 both listeners get
    /// ephemeral ports.
    pub async fn build(config: ReceivablesConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Arc::new(Database::connect(&config.database).await?);

        let (http, http_port) = bind(config.common.port, "http").await?;
        let grpc_requested = match config.common.port {
            0 => 0,
            port => port + 1,
        };
        let (grpc, grpc_port) = bind(grpc_requested, "grpc").await?;

        tracing::info!(http_port, grpc_port, "Receivables listeners bound");

        Ok(Self {
            http,
            grpc,
            http_port,
            grpc_port,
            db,
            overdue_after_days: config.ledger.overdue_after_days,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Serve until either server stops; the first failure is returned.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let (mut reporter, health_service) = tonic_health::server::health_reporter();
        reporter
            .set_serving::<ReceivablesServiceServer<ReceivablesServiceImpl>>()
            .await;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| std::io::Error::other(format!("Reflection setup failed: {}", e)))?;

        let ledger = ReceivablesServiceServer::with_interceptor(
            ReceivablesServiceImpl::new(self.db.clone(), self.overdue_after_days),
            trace_context_interceptor,
        );

        let grpc = GrpcServer::builder()
            .layer(
                TraceLayer::new_for_grpc()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
            )
            .add_service(health_service)
            .add_service(reflection)
            .add_service(ledger)
            .serve_with_incoming(TcpListenerStream::new(self.grpc));

        let http = axum::serve(self.http, probe_router(self.db.clone()));

        tracing::info!(
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Receivables service accepting requests"
        );

        tokio::select! {
            result = http => result.map_err(|e| {
                tracing::error!(error = %e, "HTTP server stopped");
                std::io::Error::other(e)
            }),
            result = grpc => result.map_err(|e| {
                tracing::error!(error = %e, "gRPC server stopped");
                std::io::Error::other(e)
            }),
        }
    }
}
