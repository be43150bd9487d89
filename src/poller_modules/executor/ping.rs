use rand::random;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};
use tracing::debug;

use super::{CheckConfig, CheckExecutor, ExecutionError};
use crate::models::CheckResult;

const DEFAULT_COUNT: u64 = 1;
const DEFAULT_PACKET_SIZE: usize = 56;
const DEFAULT_PER_REQUEST_TIMEOUT_SECS: f64 = 2.0;
const MAX_PACKET_SIZE: usize = 65_500;

#[derive(Debug, Clone, PartialEq)]
pub struct PingSettings {
    pub count: u16,
    pub packet_size: usize,
    pub per_request_timeout: Duration,
}

impl PingSettings {
    pub fn from_config(config: &CheckConfig<'_>) -> Self {
        let count = config.u64("ping_count").unwrap_or(DEFAULT_COUNT).clamp(1, 100);
        let packet_size = config
            .u64("packetSize")
            .map_or(DEFAULT_PACKET_SIZE, |s| usize::try_from(s).unwrap_or(MAX_PACKET_SIZE))
            .min(MAX_PACKET_SIZE);
        let per_request = config
            .f64("ping_per_request_timeout")
            .filter(|s| *s > 0.0)
            .unwrap_or(DEFAULT_PER_REQUEST_TIMEOUT_SECS);
        Self {
            count: count as u16,
            packet_size,
            per_request_timeout: Duration::from_secs_f64(per_request),
        }
    }

    /// Every echo timing out, plus a second for socket setup.
    pub fn deadline(&self) -> Duration {
        self.per_request_timeout * u32::from(self.count) + Duration::from_secs(1)
    }
}

pub async fn check_ping(executor: &CheckExecutor, config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let hostname = config
        .str("hostname")
        .ok_or_else(|| ExecutionError::Config("Hostname is required".to_string()))?;
    let settings = PingSettings::from_config(config);
    let target = executor.resolve_host(hostname, config).await?;

    let (round_trips, failures) = send_echoes(target, &settings).await?;
    if round_trips.is_empty() {
        let output = if failures.is_empty() {
            "Ping failed".to_string()
        } else {
            failures.join("; ")
        };
        return Err(ExecutionError::Ping(output));
    }

    let average_ms = round_trips.iter().sum::<f64>() / round_trips.len() as f64;
    let message = format!(
        "{} packets transmitted, {} received, avg {:.3} ms",
        settings.count,
        round_trips.len(),
        average_ms
    );
    Ok(CheckResult::up(message, Some(average_ms)))
}

/// Returns reply round-trip times in ms and per-echo failure descriptions.
async fn send_echoes(target: IpAddr, settings: &PingSettings) -> Result<(Vec<f64>, Vec<String>), ExecutionError> {
    let icmp_config = match target {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };
    let client = Client::new(&icmp_config)
        .map_err(|e| ExecutionError::Ping(format!("Failed to open ICMP socket: {e}")))?;

    let payload = vec![0u8; settings.packet_size];
    let mut pinger = client.pinger(target, PingIdentifier(random())).await;
    pinger.timeout(settings.per_request_timeout);

    let mut round_trips = Vec::new();
    let mut failures = Vec::new();
    for seq in 0..settings.count {
        match pinger.ping(PingSequence(seq), &payload).await {
            Ok((_reply, rtt)) => round_trips.push(rtt.as_secs_f64() * 1000.0),
            Err(e) => {
                debug!(target = %target, seq = seq, error = %e, "Echo request failed.");
                failures.push(format!("icmp_seq={seq} {e}"));
            }
        }
    }
    Ok((round_trips, failures))
}
