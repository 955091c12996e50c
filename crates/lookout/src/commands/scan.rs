//! `lookout scan`: run the API server and the background workers until
//! SIGINT/SIGTERM, then shut down gracefully within a bounded window.

use std::sync::Arc;
use std::time::Duration;

use lookout_api::auth::jwt::JwtVerifier;
use lookout_api::config::ServerConfig;
use lookout_api::router::build_app_router;
use lookout_api::state::AppState;
use lookout_db::DatabaseConfig;
use lookout_provider::urlscanio::{Client, ProviderConfig};
use lookout_scanner::{Scanner, ScannerConfig};
use lookout_worker::{Worker, WorkerConfig};
use tokio_util::sync::CancellationToken;

use super::CommandError;

pub async fn run() -> Result<(), CommandError> {
    let db_config = DatabaseConfig::from_env();
    let server_config = ServerConfig::from_env();
    let scanner_config = ScannerConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    let provider_config = ProviderConfig::from_env();

    let pool = lookout_db::create_pool(&db_config).await?;
    lookout_db::health_check(&pool).await?;
    tracing::info!("database connection pool created");

    let provider = Arc::new(Client::new(provider_config));
    let scanner = Scanner::new(pool.clone(), provider, scanner_config);

    let cancel = CancellationToken::new();

    // Background workers.
    let worker = Arc::new(Worker::new(pool.clone(), scanner.clone(), worker_config));
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    // HTTP server.
    let verifier = Arc::new(JwtVerifier::new(&server_config.jwt_public_key_pem)?);
    let app = build_app_router(AppState { scanner, verifier }, &server_config);

    let listener = tokio::net::TcpListener::bind(&server_config.addr).await?;
    tracing::info!(addr = %server_config.addr, "starting webserver");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_cancel.cancelled().await;
        });
        if let Err(e) = server.await {
            tracing::error!(error = %e, "webserver error");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    cancel.cancel();

    let drain = async {
        let _ = server_handle.await;
        let _ = worker_handle.await;
    };
    let grace = Duration::from_secs(server_config.shutdown_timeout_secs);
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(
            grace_secs = grace.as_secs(),
            "graceful shutdown timed out, exiting anyway",
        );
    }

    pool.close().await;
    tracing::info!("bye");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
