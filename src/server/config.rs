use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_address: String,
    pub jwt_secret: String,
    pub poller_registration_rate_limit_per_minute: u32,
    pub poller_registration_token_ttl_minutes: i64,
    pub poller_offline_after_seconds: u64,
    /// Take the client address from `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Optional TOML file of monitors loaded at startup.
    pub monitors_file: Option<String>,
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    listen_address: Option<String>,
    jwt_secret: Option<String>,
    poller_registration_rate_limit_per_minute: Option<u32>,
    poller_registration_token_ttl_minutes: Option<i64>,
    poller_offline_after_seconds: Option<u64>,
    trust_proxy: Option<bool>,
    monitors_file: Option<String>,
    log_dir: Option<String>,
}

fn default_listen_address() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

pub const DEFAULT_REGISTRATION_RATE_LIMIT_PER_MINUTE: u32 = 10;
pub const DEFAULT_REGISTRATION_TOKEN_TTL_MINUTES: i64 = 1440;
pub const DEFAULT_OFFLINE_AFTER_SECONDS: u64 = 90;

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let path = Path::new(path_str);
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        Self::merge(env_config, file_config)
    }

    fn merge(env_config: PartialServerConfig, file_config: PartialServerConfig) -> Result<Self, String> {
        let rate_limit = env_config
            .poller_registration_rate_limit_per_minute
            .or(file_config.poller_registration_rate_limit_per_minute)
            .unwrap_or(DEFAULT_REGISTRATION_RATE_LIMIT_PER_MINUTE);
        if rate_limit == 0 {
            return Err("POLLER_REGISTRATION_RATE_LIMIT_PER_MINUTE must be positive".to_string());
        }

        Ok(ServerConfig {
            listen_address: env_config
                .listen_address
                .or(file_config.listen_address)
                .unwrap_or_else(default_listen_address),
            jwt_secret: env_config
                .jwt_secret
                .or(file_config.jwt_secret)
                .ok_or("JWT_SECRET is required")?,
            poller_registration_rate_limit_per_minute: rate_limit,
            poller_registration_token_ttl_minutes: env_config
                .poller_registration_token_ttl_minutes
                .or(file_config.poller_registration_token_ttl_minutes)
                .filter(|minutes| *minutes > 0)
                .unwrap_or(DEFAULT_REGISTRATION_TOKEN_TTL_MINUTES),
            poller_offline_after_seconds: env_config
                .poller_offline_after_seconds
                .or(file_config.poller_offline_after_seconds)
                .unwrap_or(DEFAULT_OFFLINE_AFTER_SECONDS),
            trust_proxy: env_config.trust_proxy.or(file_config.trust_proxy).unwrap_or(false),
            monitors_file: env_config.monitors_file.or(file_config.monitors_file),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
        })
    }
}
