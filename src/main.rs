//! SchemaFlow Backup - Backup Integrity & Cascade Safety
//!
//! Backs up database objects (tables, views, functions, indexes, triggers)
//! from live PostgreSQL and MySQL connections, scores every backup for
//! completeness and freshness, and runs cascade-delete experiments that
//! delete an object, measure what went with it, and restore everything.

mod backup;
mod config;
mod connection;
mod dialect;
mod error;
mod models;
mod routes;
mod state;

use crate::backup::{BackupFramework, FileBackupStore};
use crate::config::Settings;
use crate::connection::ConnectionManager;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting SchemaFlow Backup...");

    let settings = Settings::load()?;
    info!(
        "Configuration loaded (backups in {}, max age {}h)",
        settings.backup.dir.display(),
        settings.backup.rules.max_backup_age_secs / 3600
    );

    let store = FileBackupStore::new(settings.backup.dir.clone());
    let framework = BackupFramework::new(Arc::new(store), settings.backup.rules.clone());
    let connections = ConnectionManager::new(settings.backup.pool_size);
    let state = Arc::new(AppState::new(connections, framework));

    let app = create_router(state.clone(), &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("Server listening on http://{}", addr);
    info!("API Endpoints:");
    info!("   POST   /api/connections                              - Connect to a database");
    info!("   GET    /api/connections                              - List connections");
    info!("   DELETE /api/connections/{{id}}                         - Disconnect");
    info!("   POST   /api/connections/{{id}}/backups                 - Back up an object");
    info!("   POST   /api/connections/{{id}}/backups/{{bid}}/restore   - Restore a backup");
    info!("   POST   /api/connections/{{id}}/cascade-tests           - Run a cascade-delete test");
    info!("   GET    /api/backups                                  - List backups");
    info!("   GET    /api/backups/{{bid}}/validation                 - Re-validate a backup");
    info!("   DELETE /api/backups/transient                        - Prune cascade-test backups");
    info!("   GET    /api/integrity-report                         - Integrity report");
    info!("   GET    /api/stats                                    - Backup counters");

    let listener = TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    state.connections.disconnect_all().await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schemaflow_backup=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
