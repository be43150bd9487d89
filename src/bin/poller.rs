use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pollerfleet::api_models::RegisterRequest;
use pollerfleet::logging::init_logging;
use pollerfleet::models::Assignment;
use pollerfleet::poller_modules::communication::{
    ApiClientError, PollerApiClient, assignment_sync_loop, heartbeat_loop,
};
use pollerfleet::poller_modules::config::{DEFAULT_CONFIG_PATH, PollerCliConfig, load_cli_config, save_credentials};
use pollerfleet::poller_modules::dns_cache::DnsCacheResolver;
use pollerfleet::poller_modules::executor::CheckExecutor;
use pollerfleet::poller_modules::scheduler::{ResultQueue, Scheduler};
use pollerfleet::version::VERSION;

const MAX_RECONNECT_DELAY_SECONDS: u64 = 60 * 5;
const DEFAULT_RECONNECT_DELAY_SECONDS: u64 = 5;
const DNS_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Why a core task stopped.
enum TaskExit {
    Scheduler,
    Rejected(ApiClientError),
    SyncStopped,
}

fn config_path_from_args(args: &[String]) -> String {
    args.iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Registers when no credentials are stored and persists what the coordinator issues.
async fn ensure_registered(config: &mut PollerCliConfig, config_path: &str) -> Result<(), Box<dyn Error>> {
    if config.is_registered() {
        return Ok(());
    }
    let registration_token = config
        .registration_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or("Poller is not registered and no registration_token is configured")?;

    let client = PollerApiClient::new(&config.coordinator_url)?;
    let request = RegisterRequest {
        name: config.name.clone().unwrap_or_default(),
        region: config.region.clone(),
        datacenter: config.datacenter.clone(),
        capabilities: config.capabilities.clone(),
        version: Some(VERSION.to_string()),
    };
    let registered = client.register(&registration_token, &request).await?;
    info!(poller_id = registered.poller_id, "Registered with coordinator.");

    if let Err(e) = save_credentials(config_path, registered.poller_id, &registered.access_token) {
        warn!(error = %e, "Could not persist credentials. They will be lost on restart.");
    }
    config.poller_id = Some(registered.poller_id);
    config.access_token = Some(registered.access_token);
    config.registration_token = None;
    Ok(())
}

async fn dns_purge_loop(executor: Arc<CheckExecutor>) -> TaskExit {
    let mut ticker = tokio::time::interval(DNS_PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        let purged = executor.dns().purge_expired();
        if purged > 0 {
            debug!(purged = purged, "Purged expired DNS cache entries.");
        }
    }
}

fn spawn_core_tasks(
    config: &PollerCliConfig,
    client: Arc<PollerApiClient>,
    executor: Arc<CheckExecutor>,
    queue: Arc<ResultQueue>,
) -> Vec<JoinHandle<TaskExit>> {
    let mut tasks = Vec::new();
    let (assignments_tx, assignments_rx) = watch::channel::<Vec<Assignment>>(Vec::new());

    let scheduler = Scheduler::new(executor.clone(), queue.clone());
    let tick_every = Duration::from_millis(config.tick_interval_ms);
    tasks.push(tokio::spawn(async move {
        scheduler.run(tick_every, assignments_rx, std::future::pending()).await;
        info!("Scheduler loop ended.");
        TaskExit::Scheduler
    }));

    let heartbeat_client = client.clone();
    let capacity = config.result_queue_capacity;
    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_seconds.max(1));
    tasks.push(tokio::spawn(async move {
        let err = heartbeat_loop(heartbeat_client, queue, capacity, heartbeat_interval).await;
        info!("Heartbeat loop ended.");
        TaskExit::Rejected(err)
    }));

    let refresh = Duration::from_secs(config.assignment_refresh_seconds.max(1));
    tasks.push(tokio::spawn(async move {
        let exit = assignment_sync_loop(client, refresh, assignments_tx).await;
        info!("Assignment sync loop ended.");
        exit.map_or(TaskExit::SyncStopped, TaskExit::Rejected)
    }));

    tasks.push(tokio::spawn(dns_purge_loop(executor)));

    tasks
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("Poller version: {VERSION}");
        return Ok(());
    }
    if args.contains(&"--health-check".to_string()) {
        println!("Health check successful.");
        std::process::exit(0);
    }

    init_logging("logs", "poller.log");
    info!(version = VERSION, "Starting poller...");

    let config_path = config_path_from_args(&args);
    let mut config = match load_cli_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Critical error loading configuration. Exiting.");
            return Err(e.into());
        }
    };

    let resolver = Arc::new(DnsCacheResolver::from_settings(&config.dns)?);
    let executor = Arc::new(CheckExecutor::new(resolver));
    // Survives reconnects so undelivered results are not lost.
    let queue = Arc::new(ResultQueue::new(config.result_queue_capacity));

    let mut reconnect_delay_seconds = DEFAULT_RECONNECT_DELAY_SECONDS;
    loop {
        info!(
            coordinator_url = %config.coordinator_url,
            delay_seconds = reconnect_delay_seconds,
            "Main poller loop: connecting to coordinator."
        );

        match ensure_registered(&mut config, &config_path).await {
            Ok(()) => {
                reconnect_delay_seconds = DEFAULT_RECONNECT_DELAY_SECONDS;
                let client = Arc::new(
                    PollerApiClient::new(&config.coordinator_url)?
                        .with_credentials(config.poller_id, config.access_token.clone()),
                );
                let task_handles = spawn_core_tasks(&config, client, executor.clone(), queue.clone());

                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!(pending_results = queue.len(), "Shutdown signal received. Exiting.");
                        return Ok(());
                    }
                    (first_task_result, _index, remaining_handles) = futures::future::select_all(task_handles) => {
                        match first_task_result {
                            Ok(TaskExit::Rejected(e)) => {
                                warn!(error = %e, "Coordinator rejected our credentials. Re-registering.");
                                config.poller_id = None;
                                config.access_token = None;
                            }
                            Ok(_) => warn!("A core task finished unexpectedly."),
                            Err(join_error) => error!(error = ?join_error, "A core task panicked."),
                        }
                        info!("Aborting remaining tasks before reconnecting...");
                        for handle in remaining_handles {
                            handle.abort();
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to register with coordinator. Will retry.");
                if config.registration_token.is_none() && !config.is_registered() {
                    // Nothing to retry with; a fresh registration token must be configured.
                    config = load_cli_config(&config_path)?;
                }
            }
        }

        info!(delay_seconds = reconnect_delay_seconds, "Sleeping before next connection attempt.");
        tokio::time::sleep(Duration::from_secs(reconnect_delay_seconds)).await;
        reconnect_delay_seconds = (reconnect_delay_seconds * 2).min(MAX_RECONNECT_DELAY_SECONDS);
    }
}
