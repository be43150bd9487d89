//! Assignment distribution: which monitors each poller runs, and the version
//! fingerprint pollers use to skip unchanged lists.
//!
//! Everything here is pure. Callers load the rosters from the store.
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::models::{
    Assignment, AssignmentSet, Capabilities, Monitor, PlacementMode, Poller, PollerStatus, non_empty,
};

pub const DEFAULT_DNS_CACHE_MAX_TTL_SECONDS: i64 = 60;

/// Nominal weight that maps to a factor of 1.0.
const BASELINE_WEIGHT: f64 = 100.0;
const DEGRADED_FACTOR: f64 = 0.5;
/// Queue depth at which the weight is halved.
const QUEUE_DEPTH_HALVING: f64 = 10.0;

/// A monitor without a required capability runs anywhere.
pub fn poller_has_capability(capabilities: &Capabilities, required: Option<&str>) -> bool {
    match non_empty(required) {
        None => true,
        Some(name) => capabilities.get(name).copied().unwrap_or(false),
    }
}

/// `weight / 100`, halved when degraded, divided by `1 + queue_depth / 10`,
/// zero when offline.
pub fn effective_weight(poller: &Poller) -> f64 {
    let status_factor = match poller.status {
        PollerStatus::Online => 1.0,
        PollerStatus::Degraded => DEGRADED_FACTOR,
        PollerStatus::Offline => return 0.0,
    };
    let nominal = poller.weight.max(0) as f64 / BASELINE_WEIGHT;
    let backlog = 1.0 + f64::from(poller.queue_depth) / QUEUE_DEPTH_HALVING;
    nominal * status_factor / backlog
}

pub fn is_available(poller: &Poller) -> bool {
    poller.status != PollerStatus::Offline
}

/// Capability gate plus the monitor's placement mode. Availability is separate.
pub fn is_placement_eligible(poller: &Poller, monitor: &Monitor) -> bool {
    if !poller_has_capability(&poller.capabilities, monitor.poller_capability.as_deref()) {
        return false;
    }
    match monitor.poller_mode {
        PlacementMode::Auto => true,
        PlacementMode::Pinned => monitor.poller_id == Some(poller.id),
        PlacementMode::Grouped => {
            let matches = |wanted: Option<&String>, actual: Option<&String>| match non_empty(wanted.map(String::as_str)) {
                None => true,
                Some(wanted) => non_empty(actual.map(String::as_str)) == Some(wanted),
            };
            matches(monitor.poller_region.as_ref(), poller.region.as_ref())
                && matches(monitor.poller_datacenter.as_ref(), poller.datacenter.as_ref())
        }
    }
}

/// Highest-random-weight score of one monitor/poller pair.
fn rendezvous_score(monitor_id: i64, poller_id: i64, weight: f64) -> f64 {
    let digest = Sha256::digest(format!("{monitor_id}:{poller_id}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    // Map into the open interval (0, 1) so ln() stays finite and negative.
    let unit = (u64::from_be_bytes(bytes) as f64 + 1.0) / (u64::MAX as f64 + 2.0);
    -weight / unit.ln()
}

/// The single poller an `auto` monitor lands on: weighted rendezvous hashing
/// over available, eligible pollers with a positive effective weight.
pub fn select_auto_poller<'a>(monitor: &Monitor, pollers: &'a [Poller]) -> Option<&'a Poller> {
    pollers
        .iter()
        .filter(|p| is_available(p) && is_placement_eligible(p, monitor))
        .map(|p| (p, effective_weight(p)))
        .filter(|(_, weight)| *weight > 0.0)
        .map(|(p, weight)| (p, rendezvous_score(monitor.id, p.id, weight)))
        .max_by(|(a, a_score), (b, b_score)| a_score.total_cmp(b_score).then_with(|| b.id.cmp(&a.id)))
        .map(|(p, _)| p)
}

fn should_assign(poller: &Poller, monitor: &Monitor, pollers: &[Poller]) -> bool {
    if !monitor.active || !is_available(poller) || !is_placement_eligible(poller, monitor) {
        return false;
    }
    match monitor.poller_mode {
        PlacementMode::Auto => select_auto_poller(monitor, pollers).is_some_and(|chosen| chosen.id == poller.id),
        PlacementMode::Grouped | PlacementMode::Pinned => true,
    }
}

pub fn to_assignment(monitor: &Monitor, dns_max_ttl_seconds: i64) -> Assignment {
    let mut config = monitor.config.clone();
    config.insert(
        "pollerDnsCacheDisabled".to_string(),
        Value::Bool(monitor.poller_dns_cache_disabled),
    );
    config.insert(
        "pollerDnsCacheMaxTtlSeconds".to_string(),
        Value::from(dns_max_ttl_seconds),
    );
    Assignment {
        monitor_id: monitor.id,
        check_type: monitor.check_type.clone(),
        interval: monitor.interval,
        config,
    }
}

/// Ordered by monitor id.
pub fn assignments_for_poller(
    poller: &Poller,
    pollers: &[Poller],
    monitors: &[Monitor],
    dns_max_ttl_seconds: i64,
) -> Vec<Assignment> {
    let mut assigned: Vec<Assignment> = monitors
        .iter()
        .filter(|monitor| match monitor.validate_placement() {
            Ok(()) => true,
            Err(e) => {
                warn!(monitor_id = monitor.id, error = %e, "Skipping monitor with invalid placement.");
                false
            }
        })
        .filter(|monitor| should_assign(poller, monitor, pollers))
        .map(|monitor| to_assignment(monitor, dns_max_ttl_seconds))
        .collect();
    assigned.sort_by_key(|a| a.monitor_id);
    assigned
}

/// SHA-256 hex over the serialized, ordered list.
pub fn compute_assignment_version(assignments: &[Assignment]) -> String {
    // Serializing plain data structs into a Vec cannot fail.
    let serialized = serde_json::to_vec(assignments).unwrap_or_default();
    hex::encode(Sha256::digest(&serialized))
}

pub fn assignment_set_for_poller(
    poller: &Poller,
    pollers: &[Poller],
    monitors: &[Monitor],
    dns_max_ttl_seconds: i64,
) -> AssignmentSet {
    let assignments = assignments_for_poller(poller, pollers, monitors, dns_max_ttl_seconds);
    AssignmentSet {
        version: compute_assignment_version(&assignments),
        assignments,
    }
}
