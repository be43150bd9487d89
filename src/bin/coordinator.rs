use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use pollerfleet::logging::init_logging;
use pollerfleet::server::config::ServerConfig;
use pollerfleet::server::poller_service::maintenance_loop;
use pollerfleet::server::poller_store::{InMemoryPollerStore, PollerStore, load_monitors_file};
use pollerfleet::version::VERSION;
use pollerfleet::web::{AppState, create_axum_router};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("Coordinator version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    let server_config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load coordinator configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&server_config.log_dir, "coordinator.log");
    info!(version = VERSION, "Starting coordinator...");

    let monitors = match server_config.monitors_file.as_deref() {
        Some(path) => {
            let monitors = load_monitors_file(path)?;
            info!(path = path, count = monitors.len(), "Loaded monitors.");
            monitors
        }
        None => {
            warn!("No monitors_file configured. Starting with an empty monitor list.");
            Vec::new()
        }
    };
    let store: Arc<dyn PollerStore> = Arc::new(InMemoryPollerStore::with_monitors(monitors));
    let app_state = Arc::new(AppState::new(server_config.clone(), store));

    // Offline sweep and limiter pruning
    let maintenance_handle = tokio::spawn(maintenance_loop(
        app_state.poller_service.clone(),
        app_state.token_service.clone(),
        Duration::from_secs(server_config.poller_offline_after_seconds),
        MAINTENANCE_INTERVAL,
    ));

    let router = create_axum_router(app_state);
    let addr: SocketAddr = server_config.listen_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Coordinator listening.");

    let serve_result = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal.");
            }
            info!("Shutdown signal received.");
        })
        .await;

    maintenance_handle.abort();
    if let Err(e) = serve_result {
        error!(error = %e, "HTTP server error.");
        return Err(e.into());
    }
    info!("Coordinator stopped.");
    Ok(())
}
