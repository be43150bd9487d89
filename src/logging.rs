//! Tracing setup shared by the poller and the coordinator: a readable stdout
//! layer plus a JSON file that rolls over daily.
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "info,sqlx::query=warn,rumqttc=warn";

/// `RUST_LOG` when it parses, otherwise `fallback`.
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the global subscriber writing `<log_dir>/<file_name>.<date>`.
pub fn init_logging(log_dir: &str, file_name: &str) {
    let file_layer = fmt::layer()
        .with_writer(rolling::daily(log_dir, file_name))
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
        .init();
}
