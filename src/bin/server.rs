use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::time::Instant;
use trafficdb::config::AppConfig;
use trafficdb::http::app_server::AppServer;
use trafficdb::telemetry::{init_telemetry, shutdown_telemetry};
use trafficdb::TrafficEngine;

#[derive(Parser)]
#[command(name = "trafficdb-server", about = "Access log traffic metrics server")]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<String>,

    /// Import the existing access log before tailing it
    #[arg(long)]
    import: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    init_telemetry().map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let cli = Cli::parse();

    tracing::info!("Starting trafficdb server");

    let config = AppConfig::load(cli.config.as_deref())?;
    config.validate()?;

    tracing::info!(
        log_path = %config.ingest.log_path,
        db_path = %config.storage.db_path,
        "Configuration loaded"
    );

    let engine = TrafficEngine::from_config(&config).await?;

    tracing::info!("Engine initialized");

    let log_path = Path::new(&config.ingest.log_path);
    if cli.import {
        tracing::info!(path = %log_path.display(), "Importing existing access log");
        let summary = engine.import_log(log_path).await?;
        engine.aggregate_now().await?;
        tracing::info!(
            imported = summary.imported,
            rejected = summary.rejected,
            "Import complete, hourly buckets aggregated"
        );
    }

    engine.start_ingest(log_path).await?;

    let app = AppServer::new(engine, &config.auth, &config.cors)?;
    let engine = app.engine.clone();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server started in {}ms", now.elapsed().as_millis());
    tracing::info!("Server listening on {}", addr);

    let server = axum::serve(listener, app.router).with_graceful_shutdown(shutdown());

    server.await?;

    // Stops the tailer, flushes buffered events and closes the store.
    if let Err(e) = engine.shutdown().await {
        tracing::error!("Error during engine shutdown: {}", e);
    }

    tracing::info!("Server shutdown complete");
    shutdown_telemetry();

    Ok(())
}

async fn shutdown() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
