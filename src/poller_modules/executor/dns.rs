//! DNS record check. Queries the monitored name directly rather than through
//! the poller's address cache, since the records themselves are the subject.
use hickory_resolver::proto::rr::RecordType;
use std::str::FromStr;
use std::time::Instant;

use super::{CheckConfig, ExecutionError, elapsed_ms};
use crate::models::CheckResult;
use crate::poller_modules::config::parse_dns_servers;
use crate::poller_modules::dns_cache::build_resolver;

const SUPPORTED_RECORD_TYPES: &[&str] = &["A", "AAAA", "CAA", "CNAME", "MX", "NS", "PTR", "SOA", "SRV", "TXT"];

pub fn parse_record_type(raw: Option<&str>) -> Result<RecordType, ExecutionError> {
    let name = raw.unwrap_or("A").trim().to_ascii_uppercase();
    if !SUPPORTED_RECORD_TYPES.contains(&name.as_str()) {
        return Err(ExecutionError::Config(format!("Unsupported DNS record type: {name}")));
    }
    RecordType::from_str(&name).map_err(|_| ExecutionError::Config(format!("Unsupported DNS record type: {name}")))
}

pub async fn check_dns(config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let hostname = config
        .str("hostname")
        .ok_or_else(|| ExecutionError::Config("Hostname is required".to_string()))?;
    let record_type = parse_record_type(config.str("dns_resolve_type"))?;
    let servers = config
        .str("dns_resolve_server")
        .map(parse_dns_servers)
        .unwrap_or_default();

    let resolver = build_resolver(&servers, Some(config.timeout()))?;
    let start = Instant::now();
    let lookup = resolver
        .lookup(hostname, record_type)
        .await
        .map_err(|e| ExecutionError::Transport(format!("DNS query for {hostname} ({record_type}) failed: {e}")))?;
    let latency_ms = elapsed_ms(start);

    let records: Vec<String> = lookup
        .record_iter()
        .filter(|record| record.record_type() == record_type)
        .filter_map(|record| record.data().map(ToString::to_string))
        .collect();
    Ok(CheckResult::up(format!("Records: {}", records.join(" | ")), Some(latency_ms)))
}
