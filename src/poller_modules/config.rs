use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::Capabilities;

pub const DEFAULT_CONFIG_PATH: &str = "poller_config.toml";
pub const DEFAULT_REDIS_PREFIX: &str = "poller:dns-cache:";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read poller config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse poller config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to write poller config file '{path}': {reason}")]
    Write { path: String, reason: String },
    #[error("Invalid poller configuration: {0}")]
    Invalid(String),
}

/// Resolver settings shared by every check on this poller.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DnsCacheSettings {
    /// Upstream resolvers (`ip` or `ip:port`). Empty means the system resolver.
    pub servers: Vec<String>,
    pub redis_url: Option<String>,
    pub redis_prefix: String,
}

impl Default for DnsCacheSettings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            redis_url: None,
            redis_prefix: DEFAULT_REDIS_PREFIX.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PollerCliConfig {
    pub coordinator_url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// One-time secret used only when no access token is stored yet.
    #[serde(default)]
    pub registration_token: Option<String>,
    #[serde(default)]
    pub poller_id: Option<i64>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_assignment_refresh_seconds")]
    pub assignment_refresh_seconds: u64,
    #[serde(default = "default_result_queue_capacity")]
    pub result_queue_capacity: usize,
    #[serde(default)]
    pub dns: DnsCacheSettings,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_assignment_refresh_seconds() -> u64 {
    30
}

fn default_result_queue_capacity() -> usize {
    1000
}

impl PollerCliConfig {
    pub fn is_registered(&self) -> bool {
        self.poller_id.is_some() && self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Environment overrides win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("POLLER_COORDINATOR_URL") {
            self.coordinator_url = url;
        }
        if let Some(token) = lookup("POLLER_REGISTRATION_TOKEN") {
            self.registration_token = Some(token);
        }
        if let Some(token) = lookup("POLLER_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(servers) = lookup("POLLER_DNS_SERVERS") {
            self.dns.servers = parse_dns_servers(&servers);
        }
        if let Some(url) = lookup("POLLER_DNS_CACHE_REDIS_URL") {
            self.dns.redis_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(prefix) = lookup("POLLER_DNS_CACHE_REDIS_PREFIX") {
            if !prefix.is_empty() {
                self.dns.redis_prefix = prefix;
            }
        }
    }
}

/// Splits a comma-delimited server list, dropping blanks.
pub fn parse_dns_servers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

pub fn load_cli_config(config_path_str: &str) -> Result<PollerCliConfig, ConfigError> {
    let config_path = Path::new(config_path_str);
    let absolute_path_display = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    info!(path = ?absolute_path_display, "Loading poller config.");

    let config_str = fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
        path: config_path_str.to_string(),
        source: e,
    })?;

    let mut config: PollerCliConfig = toml::from_str(&config_str).map_err(|e| ConfigError::Parse {
        path: config_path_str.to_string(),
        source: e,
    })?;
    config.apply_env_overrides(|key| std::env::var(key).ok());

    if config.coordinator_url.trim().is_empty() {
        return Err(ConfigError::Invalid("coordinator_url must be set".to_string()));
    }

    info!(
        coordinator_url = %config.coordinator_url,
        registered = config.is_registered(),
        dns_servers = config.dns.servers.len(),
        shared_dns_cache = config.dns.redis_url.is_some(),
        "Loaded poller config."
    );
    Ok(config)
}

/// Writes the credentials issued at registration back into the config file,
/// leaving every other key as the operator wrote it.
pub fn save_credentials(config_path_str: &str, poller_id: i64, access_token: &str) -> Result<(), ConfigError> {
    let write_err = |reason: String| ConfigError::Write {
        path: config_path_str.to_string(),
        reason,
    };

    let existing = fs::read_to_string(config_path_str).unwrap_or_default();
    let mut document: toml::Table = if existing.trim().is_empty() {
        toml::Table::new()
    } else {
        toml::from_str(&existing).map_err(|e| write_err(e.to_string()))?
    };

    document.insert("poller_id".to_string(), toml::Value::Integer(poller_id));
    document.insert(
        "access_token".to_string(),
        toml::Value::String(access_token.to_string()),
    );
    // The one-time registration secret is spent.
    if document.remove("registration_token").is_some() {
        warn!("Removed spent registration_token from poller config.");
    }

    let rendered = toml::to_string_pretty(&document).map_err(|e| write_err(e.to_string()))?;
    fs::write(config_path_str, rendered).map_err(|e| write_err(e.to_string()))?;
    info!(poller_id = poller_id, "Saved poller credentials.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_dns_servers() {
        assert_eq!(
            parse_dns_servers(" 1.1.1.1, ,8.8.8.8:53,"),
            vec!["1.1.1.1".to_string(), "8.8.8.8:53".to_string()]
        );
        assert!(parse_dns_servers("").is_empty());
    }

    #[test]
    fn test_load_applies_defaults() {
        let file = write_config("coordinator_url = \"http://coordinator:3001\"\n");
        let config = load_cli_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.dns.redis_prefix, DEFAULT_REDIS_PREFIX);
        assert!(!config.is_registered());
    }

    #[test]
    fn test_env_overrides() {
        let file = write_config(
            "coordinator_url = \"http://a\"\n[dns]\nservers = [\"9.9.9.9\"]\n",
        );
        let mut config: PollerCliConfig =
            toml::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        let env = HashMap::from([
            ("POLLER_DNS_SERVERS", "1.1.1.1,8.8.8.8"),
            ("POLLER_DNS_CACHE_REDIS_URL", "redis://cache:6379"),
            ("POLLER_DNS_CACHE_REDIS_PREFIX", "custom:"),
        ]);
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.dns.servers, vec!["1.1.1.1", "8.8.8.8"]);
        assert_eq!(config.dns.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.dns.redis_prefix, "custom:");
        assert_eq!(config.coordinator_url, "http://a");
    }

    #[test]
    fn test_save_credentials_preserves_other_keys() {
        let file = write_config(
            "coordinator_url = \"http://a\"\nregistration_token = \"once\"\nregion = \"eu\"\n",
        );
        let path = file.path().to_str().unwrap();
        save_credentials(path, 42, "secret").unwrap();

        let config: PollerCliConfig = toml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(config.poller_id, Some(42));
        assert_eq!(config.access_token.as_deref(), Some("secret"));
        assert_eq!(config.region.as_deref(), Some("eu"));
        assert!(config.registration_token.is_none());
        assert!(config.is_registered());
    }
}
