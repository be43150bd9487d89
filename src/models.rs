//! Domain types shared by the coordinator and the poller.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Capability name -> enabled flag. Ordered so serialized forms are stable.
pub type Capabilities = BTreeMap<String, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollerStatus {
    #[default]
    Online,
    Degraded,
    Offline,
}

impl fmt::Display for PollerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PollerStatus::Online => "online",
            PollerStatus::Degraded => "degraded",
            PollerStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    #[default]
    Auto,
    Grouped,
    Pinned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Poller {
    pub id: i64,
    pub name: String,
    pub status: PollerStatus,
    pub region: Option<String>,
    pub datacenter: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Relative capacity. 100 is the baseline.
    pub weight: i64,
    #[serde(default)]
    pub queue_depth: u32,
    pub version: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: String,
    pub interval: u64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub poller_mode: PlacementMode,
    pub poller_id: Option<i64>,
    pub poller_region: Option<String>,
    pub poller_datacenter: Option<String>,
    pub poller_capability: Option<String>,
    #[serde(default)]
    pub poller_dns_cache_disabled: bool,
    /// Check-specific settings passed verbatim to the poller.
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("monitor {0} is pinned but has no poller id")]
    PinnedWithoutPoller(i64),
    #[error("monitor {0} is grouped but has neither region nor datacenter")]
    GroupedWithoutLocation(i64),
}

impl Monitor {
    pub fn validate_placement(&self) -> Result<(), PlacementError> {
        match self.poller_mode {
            PlacementMode::Auto => Ok(()),
            PlacementMode::Pinned if self.poller_id.is_none() => {
                Err(PlacementError::PinnedWithoutPoller(self.id))
            }
            PlacementMode::Pinned => Ok(()),
            PlacementMode::Grouped
                if non_empty(self.poller_region.as_deref()).is_none()
                    && non_empty(self.poller_datacenter.as_deref()).is_none() =>
            {
                Err(PlacementError::GroupedWithoutLocation(self.id))
            }
            PlacementMode::Grouped => Ok(()),
        }
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// A bearer credential. Only the SHA-256 hex digest of the raw token is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerToken {
    pub id: i64,
    pub poller_id: i64,
    pub token_hash: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PollerToken {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// One monitor as delivered to a poller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub monitor_id: i64,
    #[serde(rename = "type")]
    pub check_type: String,
    pub interval: u64,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AssignmentSet {
    pub version: String,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Up,
    Down,
}

/// Outcome of a completed probe. Execution failures are reported separately.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub message: String,
    pub latency_ms: Option<f64>,
    /// Response body for checks that read one (HTTP family).
    pub raw_body: Option<String>,
}

impl CheckResult {
    pub fn up(message: impl Into<String>, latency_ms: Option<f64>) -> Self {
        Self {
            status: CheckStatus::Up,
            message: message.into(),
            latency_ms,
            raw_body: None,
        }
    }

    pub fn down(message: impl Into<String>, latency_ms: Option<f64>) -> Self {
        Self {
            status: CheckStatus::Down,
            message: message.into(),
            latency_ms,
            raw_body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: String) -> Self {
        self.raw_body = Some(body);
        self
    }
}

/// A result as recorded and shipped to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub monitor_id: i64,
    pub status: CheckStatus,
    pub message: String,
    pub latency_ms: Option<f64>,
    /// True when the probe could not be executed at all.
    #[serde(default)]
    pub execution_error: bool,
    pub checked_at: DateTime<Utc>,
}

/// Accepts a JSON object or a JSON-encoded string of one. Anything else is empty.
pub fn parse_capabilities(value: &Value) -> Capabilities {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(name, flag)| (name.clone(), is_truthy(flag)))
            .collect(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => parse_capabilities(&parsed),
            _ => Capabilities::new(),
        },
        _ => Capabilities::new(),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}
