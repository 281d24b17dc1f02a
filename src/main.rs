use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tokenscan_api::upstream::Upstream;
use tokenscan_api::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration errors are logged after the subscriber is up
    let config = Config::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting Tokenscan API v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: tokenscan_api::AppResult<Config>) -> Result<(), exitcode::ExitCode> {
    let config = config.map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        env = %config.app_env,
        "Configuration loaded"
    );
    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    // Build application state and router
    let state = AppState::new(config.clone()).map_err(|e| {
        error!("Failed to initialize application state: {e}");
        exitcode::SOFTWARE
    })?;
    for upstream in [Upstream::Bags, Upstream::Helius, Upstream::Jupiter] {
        if !state.upstream.is_configured(upstream) {
            warn!("{} is not set; {upstream} routes answer 501", upstream.key_var());
        }
    }
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health            - Health check");
    info!("  POST /api/scan          - Token asset lookup");
    info!("  POST /api/simulate      - Launch cost preview");
    info!("  POST /api/apply         - Create token info (idempotent)");
    info!("  GET  /api/bags/{{*path}}  - Bags read proxy");
    info!("  POST /api/bags/{{*path}}  - Bags write proxy");
    info!("  POST /api/helius/rpc    - Helius JSON-RPC proxy");
    info!("  POST /api/swap          - Jupiter quote and swap");

    // Peer addresses feed client IP resolution
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
