//! Storage seam for the coordinator: pollers, monitors, tokens, settings and
//! the result log. Durable storage plugs in behind [`PollerStore`]; the
//! in-memory implementation backs tests and single-node deployments.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{Capabilities, Monitor, Poller, PollerStatus, PollerToken, ResultRecord};

pub const SETTING_REGISTRATION_TOKEN: &str = "pollerRegistrationToken";
pub const SETTING_REGISTRATION_TOKEN_EXPIRES_AT: &str = "pollerRegistrationTokenExpiresAt";
pub const SETTING_DNS_CACHE_MAX_TTL: &str = "pollerDnsCacheMaxTtlSeconds";

/// Results kept per coordinator before the oldest are discarded.
const RESULT_LOG_CAPACITY: usize = 10_000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read monitors file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse monitors file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fields supplied by a registering poller.
#[derive(Debug, Clone, Default)]
pub struct NewPoller {
    pub name: String,
    pub region: Option<String>,
    pub datacenter: Option<String>,
    pub capabilities: Capabilities,
    pub version: Option<String>,
}

/// State reported in a heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatUpdate {
    pub status: PollerStatus,
    pub queue_depth: u32,
    pub version: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait PollerStore: Send + Sync + 'static {
    async fn list_pollers(&self) -> StoreResult<Vec<Poller>>;
    async fn get_poller(&self, id: i64) -> StoreResult<Option<Poller>>;
    async fn create_poller(&self, poller: NewPoller) -> StoreResult<Poller>;
    async fn record_heartbeat(&self, id: i64, update: HeartbeatUpdate) -> StoreResult<Option<Poller>>;
    /// Applies whichever of weight/capabilities is given.
    async fn update_poller_settings(
        &self,
        id: i64,
        weight: Option<i64>,
        capabilities: Option<Capabilities>,
    ) -> StoreResult<Option<Poller>>;
    /// Marks non-offline pollers whose last heartbeat predates `cutoff` as
    /// offline and returns their ids.
    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<i64>>;

    async fn list_monitors(&self) -> StoreResult<Vec<Monitor>>;
    async fn upsert_monitor(&self, monitor: Monitor) -> StoreResult<()>;

    async fn find_token_by_hash(&self, token_hash: &str) -> StoreResult<Option<PollerToken>>;
    /// Deactivates every token of the poller and stores the new one, as one write.
    async fn replace_active_token(
        &self,
        poller_id: i64,
        token_hash: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<PollerToken>;
    async fn deactivate_tokens(&self, poller_id: i64) -> StoreResult<usize>;

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set_setting(&self, key: &str, value: String) -> StoreResult<()>;

    async fn append_results(&self, results: Vec<ResultRecord>) -> StoreResult<usize>;
    async fn recent_results(&self, limit: usize) -> StoreResult<Vec<ResultRecord>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    pollers: BTreeMap<i64, Poller>,
    monitors: BTreeMap<i64, Monitor>,
    tokens: Vec<PollerToken>,
    settings: HashMap<String, String>,
    results: VecDeque<ResultRecord>,
    next_poller_id: i64,
    next_token_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryPollerStore {
    state: RwLock<MemoryState>,
}

impl InMemoryPollerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_monitors(monitors: Vec<Monitor>) -> Self {
        let state = MemoryState {
            monitors: monitors.into_iter().map(|m| (m.id, m)).collect(),
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }
}

#[async_trait]
impl PollerStore for InMemoryPollerStore {
    async fn list_pollers(&self) -> StoreResult<Vec<Poller>> {
        Ok(self.state.read().await.pollers.values().cloned().collect())
    }

    async fn get_poller(&self, id: i64) -> StoreResult<Option<Poller>> {
        Ok(self.state.read().await.pollers.get(&id).cloned())
    }

    async fn create_poller(&self, poller: NewPoller) -> StoreResult<Poller> {
        let mut state = self.state.write().await;
        state.next_poller_id += 1;
        let now = Utc::now();
        let created = Poller {
            id: state.next_poller_id,
            name: poller.name,
            status: PollerStatus::Online,
            region: poller.region,
            datacenter: poller.datacenter,
            capabilities: poller.capabilities,
            weight: 100,
            queue_depth: 0,
            version: poller.version,
            last_heartbeat_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        state.pollers.insert(created.id, created.clone());
        Ok(created)
    }

    async fn record_heartbeat(&self, id: i64, update: HeartbeatUpdate) -> StoreResult<Option<Poller>> {
        let mut state = self.state.write().await;
        let Some(poller) = state.pollers.get_mut(&id) else {
            return Ok(None);
        };
        poller.status = update.status;
        poller.queue_depth = update.queue_depth;
        if update.version.is_some() {
            poller.version = update.version;
        }
        poller.last_heartbeat_at = Some(update.at);
        poller.updated_at = update.at;
        Ok(Some(poller.clone()))
    }

    async fn update_poller_settings(
        &self,
        id: i64,
        weight: Option<i64>,
        capabilities: Option<Capabilities>,
    ) -> StoreResult<Option<Poller>> {
        let mut state = self.state.write().await;
        let Some(poller) = state.pollers.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(weight) = weight {
            poller.weight = weight;
        }
        if let Some(capabilities) = capabilities {
            poller.capabilities = capabilities;
        }
        poller.updated_at = Utc::now();
        Ok(Some(poller.clone()))
    }

    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<i64>> {
        let mut state = self.state.write().await;
        let mut marked = Vec::new();
        for poller in state.pollers.values_mut() {
            let stale = poller.last_heartbeat_at.is_none_or(|at| at < cutoff);
            if poller.status != PollerStatus::Offline && stale {
                poller.status = PollerStatus::Offline;
                poller.updated_at = Utc::now();
                marked.push(poller.id);
            }
        }
        Ok(marked)
    }

    async fn list_monitors(&self) -> StoreResult<Vec<Monitor>> {
        Ok(self.state.read().await.monitors.values().cloned().collect())
    }

    async fn upsert_monitor(&self, monitor: Monitor) -> StoreResult<()> {
        self.state.write().await.monitors.insert(monitor.id, monitor);
        Ok(())
    }

    async fn find_token_by_hash(&self, token_hash: &str) -> StoreResult<Option<PollerToken>> {
        Ok(self
            .state
            .read()
            .await
            .tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn replace_active_token(
        &self,
        poller_id: i64,
        token_hash: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<PollerToken> {
        let mut state = self.state.write().await;
        for token in state.tokens.iter_mut().filter(|t| t.poller_id == poller_id) {
            token.active = false;
        }
        state.next_token_id += 1;
        let token = PollerToken {
            id: state.next_token_id,
            poller_id,
            token_hash,
            active: true,
            expires_at,
            created_at: Utc::now(),
        };
        state.tokens.push(token.clone());
        Ok(token)
    }

    async fn deactivate_tokens(&self, poller_id: i64) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for token in state.tokens.iter_mut().filter(|t| t.poller_id == poller_id && t.active) {
            token.active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.read().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: String) -> StoreResult<()> {
        self.state.write().await.settings.insert(key.to_string(), value);
        Ok(())
    }

    async fn append_results(&self, results: Vec<ResultRecord>) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let count = results.len();
        state.results.extend(results);
        let overflow = state.results.len().saturating_sub(RESULT_LOG_CAPACITY);
        state.results.drain(..overflow);
        Ok(count)
    }

    async fn recent_results(&self, limit: usize) -> StoreResult<Vec<ResultRecord>> {
        let state = self.state.read().await;
        let skip = state.results.len().saturating_sub(limit);
        Ok(state.results.iter().skip(skip).cloned().collect())
    }
}

#[derive(Deserialize)]
struct MonitorsFile {
    #[serde(default)]
    monitors: Vec<Monitor>,
}

/// Reads `[[monitors]]` tables from a TOML file.
pub fn load_monitors_file(path: &str) -> StoreResult<Vec<Monitor>> {
    let contents = std::fs::read_to_string(Path::new(path)).map_err(|source| StoreError::Read {
        path: path.to_string(),
        source,
    })?;
    let parsed: MonitorsFile = toml::from_str(&contents).map_err(|source| StoreError::Parse {
        path: path.to_string(),
        source,
    })?;
    Ok(parsed.monitors)
}
