use receivables_service::config::ReceivablesConfig;
use receivables_service::services::init_metrics;
use receivables_service::startup::Application;
use service_core::observability::init_tracing;
use tokio::signal;

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = ReceivablesConfig::from_env()
        .map_err(|e| std::io::Error::other(format!("Invalid configuration: {}", e)))?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        version = %config.service_version,
        port = config.common.port,
        overdue_after_days = config.ledger.overdue_after_days,
        db_max_connections = config.database.max_connections,
        "Starting receivables-service"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Startup failed");
        std::io::Error::other(e.to_string())
    })?;

    tokio::select! {
        result = app.run_until_stopped() => result?,
        _ = shutdown_signal() => tracing::info!("Shutdown signal received"),
    }

    Ok(())
}
