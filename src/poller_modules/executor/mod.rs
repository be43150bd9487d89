//! Executes one assignment against its target and reports UP/DOWN.
//!
//! A check either completes with a [`CheckResult`] (including a DOWN verdict
//! such as an unexpected status code) or fails with an [`ExecutionError`] when
//! it could not run to a verdict: bad config, DNS failure, timeout, transport
//! error, unmet conditions.

pub mod database;
pub mod dns;
pub mod http;
pub mod mqtt;
pub mod ping;
pub mod snmp;
pub mod tcp;

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::dns_cache::{AddressFamily, DnsCacheOptions, DnsCacheResolver, DnsError};
use crate::evaluation::EvaluationError;
use crate::models::{Assignment, CheckResult, is_truthy};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
/// Slack on top of a check's own timeout so its specific error wins the race.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Dns(#[from] DnsError),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    ConditionsNotMet(String),
    #[error("{0}")]
    Mismatch(String),
    #[error("{0}")]
    Database(String),
    #[error("{0}")]
    Snmp(String),
    #[error("{0}")]
    Ping(String),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl ExecutionError {
    /// The check ran but its result failed a comparison: unmet MQTT or
    /// database conditions (`ConditionsNotMet`) and SNMP or MQTT value
    /// mismatches (`Mismatch`). `execute` reports these as DOWN results
    /// instead of execution errors.
    pub fn is_evaluation_failure(&self) -> bool {
        matches!(self, ExecutionError::ConditionsNotMet(_) | ExecutionError::Mismatch(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    Http,
    Keyword,
    JsonQuery,
    Ping,
    Port,
    Dns,
    Mqtt,
    Snmp,
    Mysql,
    Postgres,
    SqlServer,
}

impl CheckKind {
    pub fn tag(&self) -> &'static str {
        match self {
            CheckKind::Http => "http",
            CheckKind::Keyword => "keyword",
            CheckKind::JsonQuery => "json-query",
            CheckKind::Ping => "ping",
            CheckKind::Port => "port",
            CheckKind::Dns => "dns",
            CheckKind::Mqtt => "mqtt",
            CheckKind::Snmp => "snmp",
            CheckKind::Mysql => "mysql",
            CheckKind::Postgres => "postgres",
            CheckKind::SqlServer => "sqlserver",
        }
    }

    /// Hard cap on one execution, derived from the check's own timeouts.
    pub fn deadline(&self, config: &CheckConfig<'_>, interval_seconds: u64) -> Duration {
        let timeout = config.timeout();
        let own = match self {
            CheckKind::Ping => ping::PingSettings::from_config(config).deadline(),
            CheckKind::Mqtt => mqtt::message_deadline(interval_seconds),
            CheckKind::Snmp => {
                let attempts = config.u64("maxretries").unwrap_or(0) + 1;
                timeout * u32::try_from(attempts).unwrap_or(u32::MAX)
            }
            _ => timeout,
        };
        own + DEADLINE_GRACE
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "http" => CheckKind::Http,
            "keyword" => CheckKind::Keyword,
            "json-query" => CheckKind::JsonQuery,
            "ping" => CheckKind::Ping,
            "port" => CheckKind::Port,
            "dns" => CheckKind::Dns,
            "mqtt" => CheckKind::Mqtt,
            "snmp" => CheckKind::Snmp,
            "mysql" => CheckKind::Mysql,
            "postgres" => CheckKind::Postgres,
            "sqlserver" => CheckKind::SqlServer,
            other => return Err(other.to_string()),
        })
    }
}

/// Typed accessors over a monitor's loosely typed config map.
#[derive(Debug, Clone, Copy)]
pub struct CheckConfig<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> CheckConfig<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    /// Non-empty string value.
    pub fn str(&self, key: &str) -> Option<&'a str> {
        match self.map.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// String form of scalars (numbers included).
    pub fn text(&self, key: &str) -> Option<String> {
        match self.map.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.map.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.map.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        self.map.get(key).is_some_and(is_truthy)
    }

    /// `timeout` seconds, default 10. Fractions are honoured.
    pub fn timeout(&self) -> Duration {
        self.f64("timeout")
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn port(&self) -> Option<u16> {
        self.u64("port").and_then(|p| u16::try_from(p).ok())
    }

    pub fn dns_options(&self) -> DnsCacheOptions {
        DnsCacheOptions::from_config(self.map)
    }
}

/// Shared state every check needs.
pub struct CheckExecutor {
    dns: Arc<DnsCacheResolver>,
}

impl CheckExecutor {
    pub fn new(dns: Arc<DnsCacheResolver>) -> Self {
        Self { dns }
    }

    pub fn dns(&self) -> &Arc<DnsCacheResolver> {
        &self.dns
    }

    /// Resolves `hostname` through the poller cache using the assignment's cache options.
    pub async fn resolve_host(
        &self,
        hostname: &str,
        config: &CheckConfig<'_>,
    ) -> Result<std::net::IpAddr, ExecutionError> {
        let addresses = self
            .dns
            .resolve(hostname, AddressFamily::Any, config.dns_options())
            .await?;
        addresses
            .first()
            .map(|a| a.address)
            .ok_or_else(|| DnsError::NoAddresses(hostname.to_string()).into())
    }

    pub async fn execute(&self, assignment: &Assignment) -> Result<CheckResult, ExecutionError> {
        let kind = match assignment.check_type.parse::<CheckKind>() {
            Ok(kind) => kind,
            Err(tag) => {
                return Ok(CheckResult::down(format!("Unsupported monitor type: {tag}"), None));
            }
        };
        let config = CheckConfig::new(&assignment.config);
        let deadline = kind.deadline(&config, assignment.interval);
        debug!(monitor_id = assignment.monitor_id, kind = %kind, ?deadline, "Executing check.");

        let run = async {
            match kind {
                CheckKind::Http => http::check_http(self, &config).await,
                CheckKind::Keyword => http::check_keyword(self, &config).await,
                CheckKind::JsonQuery => http::check_json_query(self, &config).await,
                CheckKind::Ping => ping::check_ping(self, &config).await,
                CheckKind::Port => tcp::check_port(self, &config).await,
                CheckKind::Dns => dns::check_dns(&config).await,
                CheckKind::Mqtt => mqtt::check_mqtt(self, &config, assignment.interval).await,
                CheckKind::Snmp => snmp::check_snmp(self, &config).await,
                CheckKind::Mysql | CheckKind::Postgres | CheckKind::SqlServer => {
                    database::check_database(kind, &config).await
                }
            }
        };

        // Dropping the future on expiry closes whatever sockets it holds.
        match tokio::time::timeout(deadline, run).await {
            // Unmet conditions are a verdict on a completed probe, not a failure to probe.
            Ok(Err(e)) if e.is_evaluation_failure() => Ok(CheckResult::down(e.to_string(), None)),
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutionError::Timeout(format!(
                "{kind} check timed out after {:.1}s",
                deadline.as_secs_f64()
            ))),
        }
    }
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::poller_modules::dns_cache::SystemLookup;

    pub fn executor() -> CheckExecutor {
        CheckExecutor::new(Arc::new(DnsCacheResolver::new(&[], Arc::new(SystemLookup), None)))
    }

    pub fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::executor;
    use super::*;
    use crate::models::CheckStatus;
    use serde_json::json;

    fn assignment(check_type: &str, config: Value) -> Assignment {
        Assignment {
            monitor_id: 1,
            check_type: check_type.to_string(),
            interval: 60,
            config: config.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_check_kind_round_trips_tags() {
        for tag in [
            "http", "keyword", "json-query", "ping", "port", "dns", "mqtt", "snmp", "mysql", "postgres",
            "sqlserver",
        ] {
            assert_eq!(tag.parse::<CheckKind>().unwrap().tag(), tag);
        }
        assert!("smtp".parse::<CheckKind>().is_err());
    }

    #[test]
    fn test_config_accessors() {
        let raw = json!({"timeout": "2.5", "port": 8080, "ignoreTls": 1, "keyword": "", "count": "3"});
        let config = CheckConfig::new(raw.as_object().unwrap());
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.port(), Some(8080));
        assert!(config.flag("ignoreTls"));
        assert_eq!(config.str("keyword"), None);
        assert_eq!(config.u64("count"), Some(3));
        assert_eq!(config.text("port").as_deref(), Some("8080"));
    }

    #[test]
    fn test_default_timeout() {
        let raw = Map::new();
        assert_eq!(CheckConfig::new(&raw).timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unsupported_type_is_down_not_error() {
        let result = executor()
            .execute(&assignment("gopher", json!({})))
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.message, "Unsupported monitor type: gopher");
    }

    #[test]
    fn test_evaluation_failures() {
        assert!(ExecutionError::Mismatch("x".into()).is_evaluation_failure());
        assert!(ExecutionError::ConditionsNotMet("x".into()).is_evaluation_failure());
        assert!(!ExecutionError::Timeout("x".into()).is_evaluation_failure());
        assert!(!ExecutionError::Config("x".into()).is_evaluation_failure());
        assert!(!ExecutionError::Database("x".into()).is_evaluation_failure());
    }
}
