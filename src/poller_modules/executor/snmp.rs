//! SNMP GET of a single OID followed by a JSON query over the returned value.
use serde_json::Value as JsonValue;
use snmp2::{AsyncSession, Oid, Value};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::debug;

use super::{CheckConfig, CheckExecutor, ExecutionError, elapsed_ms};
use crate::evaluation::json_query;
use crate::models::CheckResult;

const DEFAULT_PORT: u16 = 161;
const DEFAULT_COMMUNITY: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

impl SnmpVersion {
    pub fn parse(raw: Option<&str>) -> Result<Self, ExecutionError> {
        match raw.unwrap_or("2c").trim() {
            "1" | "v1" => Ok(SnmpVersion::V1),
            "2c" | "v2c" => Ok(SnmpVersion::V2c),
            "3" | "v3" => Ok(SnmpVersion::V3),
            other => Err(ExecutionError::Config(format!("Unsupported SNMP version: {other}"))),
        }
    }
}

/// Dotted OID text into its arcs. A leading dot is accepted.
pub fn parse_oid_arcs(raw: &str) -> Result<Vec<u64>, ExecutionError> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(ExecutionError::Config("SNMP OID is required".to_string()));
    }
    trimmed
        .split('.')
        .map(|arc| {
            arc.parse::<u64>()
                .map_err(|_| ExecutionError::Config(format!("Invalid SNMP OID: {raw}")))
        })
        .collect()
}

/// Text form of a varbind value. Absent instances are errors.
fn render_varbind(value: &Value<'_>, oid: &str) -> Result<String, ExecutionError> {
    Ok(match value {
        Value::NoSuchInstance | Value::NoSuchObject | Value::EndOfMibView => {
            return Err(ExecutionError::Snmp(format!(
                "The SNMP query returned that no instance exists for OID {oid}"
            )));
        }
        Value::Integer(n) => n.to_string(),
        Value::Counter32(n) | Value::Unsigned32(n) | Value::Timeticks(n) => n.to_string(),
        Value::Counter64(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::OctetString(bytes) | Value::Opaque(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::IpAddress(octets) => std::net::Ipv4Addr::from(*octets).to_string(),
        Value::ObjectIdentifier(id) => id.to_string(),
        other => format!("{other:?}"),
    })
}

pub async fn check_snmp(executor: &CheckExecutor, config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let hostname = config
        .str("hostname")
        .ok_or_else(|| ExecutionError::Config("Hostname is required".to_string()))?;
    let oid_text = config.str("snmpOid").unwrap_or_default();
    let arcs = parse_oid_arcs(oid_text)?;
    let oid = Oid::from(&arcs).map_err(|_| ExecutionError::Config(format!("Invalid SNMP OID: {oid_text}")))?;
    let version = SnmpVersion::parse(config.str("snmpVersion"))?;
    let v3_username = match version {
        SnmpVersion::V3 => Some(
            config
                .str("snmp_v3_username")
                .filter(|u| !u.is_empty())
                .ok_or_else(|| ExecutionError::Config("SNMPv3 username is required".to_string()))?,
        ),
        _ => None,
    };
    let retries = config.u64("maxretries").unwrap_or(0);
    let timeout = config.timeout();
    let port = config.port().unwrap_or(DEFAULT_PORT);

    let ip = executor.resolve_host(hostname, config).await?;
    let target = SocketAddr::new(ip, port);
    let community = config.str("radiusPassword").unwrap_or(DEFAULT_COMMUNITY);

    let start = Instant::now();
    let mut session = match version {
        SnmpVersion::V1 => AsyncSession::new_v1(target, community.as_bytes(), 0).await,
        SnmpVersion::V2c => AsyncSession::new_v2c(target, community.as_bytes(), 0).await,
        SnmpVersion::V3 => {
            let username = v3_username.unwrap_or_default();
            // noAuthNoPriv: the username alone identifies the principal.
            let security = snmp2::v3::Security::new(username.as_bytes(), b"");
            AsyncSession::new_v3(target, 0, security).await
        }
    }
    .map_err(|e| ExecutionError::Snmp(format!("Failed to open SNMP session to {target}: {e}")))?;

    if version == SnmpVersion::V3 {
        match tokio::time::timeout(timeout, session.init()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ExecutionError::Snmp(format!("SNMPv3 engine discovery failed: {e:?}"))),
            Err(_) => return Err(ExecutionError::Timeout("SNMP request timed out".to_string())),
        }
    }

    let mut last_error = ExecutionError::Timeout("SNMP request timed out".to_string());
    let mut value = None;
    for attempt in 0..=retries {
        match tokio::time::timeout(timeout, session.get(&oid)).await {
            Ok(Ok(mut pdu)) => {
                let rendered = match pdu.varbinds.next() {
                    Some((_, varbind)) => render_varbind(&varbind, oid_text),
                    None => Err(ExecutionError::Snmp(format!(
                        "No varbinds returned from SNMP session (OID: {oid_text})"
                    ))),
                };
                value = Some(rendered);
                break;
            }
            Ok(Err(e)) => {
                debug!(target = %target, attempt = attempt, error = ?e, "SNMP request failed.");
                last_error = ExecutionError::Snmp(format!("SNMP request failed: {e:?}"));
            }
            Err(_) => {
                debug!(target = %target, attempt = attempt, "SNMP request timed out.");
                last_error = ExecutionError::Timeout("SNMP request timed out".to_string());
            }
        }
    }
    drop(session);
    let value = match value {
        Some(rendered) => rendered?,
        None => return Err(last_error),
    };
    let latency_ms = elapsed_ms(start);

    evaluate_snmp_value(config, &value, latency_ms)
}

fn evaluate_snmp_value(config: &CheckConfig<'_>, value: &str, latency_ms: f64) -> Result<CheckResult, ExecutionError> {
    let expression = config.text("jsonPath").unwrap_or_default();
    let operator = config.str("jsonPathOperator").unwrap_or("==");
    let expected = config.text("expectedValue").unwrap_or_default();

    let outcome = json_query::evaluate(&JsonValue::String(value.to_string()), &expression, operator, &expected)?;
    let comparison = format!("(comparing {} {operator} {expected})", outcome.response);
    if outcome.passed {
        Ok(CheckResult::up(format!("JSON query passes {comparison}"), Some(latency_ms)))
    } else {
        Err(ExecutionError::Mismatch(format!("JSON query does not pass {comparison}")))
    }
}
