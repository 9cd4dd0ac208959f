use backup_orchestrator::backup_manager::repository::BackupManagerRepository;
use backup_orchestrator::backup_manager::DEFAULT_BACKUP_MANAGER_ID;
use backup_orchestrator::config::AppConfig;
use backup_orchestrator::db::connection::create_pool;
use backup_orchestrator::db::store::SqliteStore;
use backup_orchestrator::routes;
use backup_orchestrator::state::AppState;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!("Starting backup orchestrator on port {}", config.port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    // Initialize database
    let pool = create_pool(&config.db_path)?;
    let store = Arc::new(SqliteStore::new(pool)?);

    // Load backup managers before anything can create new ones
    let backup_managers = BackupManagerRepository::new(store, config.vbrm_auto_create, config.delete_vbrm);
    {
        let backup_managers = backup_managers.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            backup_managers.initialize_backup_managers()?;
            backup_managers.finish_initialization();
            backup_managers.create_backup_manager("", DEFAULT_BACKUP_MANAGER_ID, Vec::new())?;
            Ok(())
        })
        .await??;
    }

    // Build application state
    let state = Arc::new(AppState::new(config.clone(), backup_managers));

    // Build router
    let app = routes::create_router(state.clone());

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Shutting down...");
    for agent in state.agents.agents() {
        agent.close_connection();
    }
    tracing::info!("Orchestrator stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {e}");
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
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
