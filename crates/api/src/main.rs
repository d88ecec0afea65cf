use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use panelgate_core::quota::QuotaLockManager;
use panelgate_core::scripting::{PluginSandbox, SandboxLimits};
use panelgate_panel::PanelManager;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use panelgate_api::config::{ServerConfig, SubmissionConfig};
use panelgate_api::router::build_app_router;
use panelgate_api::state::AppState;
use panelgate_api::submission::orchestrator::start_lock_pruner;
use panelgate_api::submission::{
    PgSubmissionStore, StoreTokenRefresher, SubmissionService, SubmissionStore,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panelgate_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let submission_config = SubmissionConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::debug!(?submission_config, "Loaded submission configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = panelgate_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    panelgate_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    panelgate_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store: Arc<dyn SubmissionStore> = Arc::new(PgSubmissionStore::new(pool));

    // --- Panels ---
    let http = PanelManager::build_http_client(submission_config.panel_http_timeout)
        .expect("Failed to build panel HTTP client");
    let refresher = Arc::new(StoreTokenRefresher::new(Arc::clone(&store), http.clone()));
    let panels = Arc::new(PanelManager::new(http, refresher));

    // --- Submission service ---
    let quota_locks = Arc::new(QuotaLockManager::new());
    let submissions = Arc::new(SubmissionService::new(
        store,
        panels,
        PluginSandbox::new(submission_config.plugin_timeout).with_limits(SandboxLimits {
            max_operations: submission_config.plugin_max_operations,
            ..SandboxLimits::default()
        }),
        Arc::clone(&quota_locks),
        submission_config.panel_retry,
    ));

    // Idle quota lock pruning.
    let prune_cancel = CancellationToken::new();
    let prune_handle = start_lock_pruner(
        quota_locks,
        submission_config.quota_lock_prune_interval,
        submission_config.quota_lock_idle,
        prune_cancel.clone(),
    );

    // --- App state ---
    let state = AppState { submissions };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    prune_cancel.cancel();
    let _ = tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        prune_handle,
    )
    .await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
