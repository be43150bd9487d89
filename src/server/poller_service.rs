//! Heartbeats, assignment pulls and the offline sweeper.
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::assignments::{DEFAULT_DNS_CACHE_MAX_TTL_SECONDS, assignment_set_for_poller};
use super::poller_store::{HeartbeatUpdate, PollerStore, SETTING_DNS_CACHE_MAX_TTL, StoreError};
use super::token_service::TokenService;
use crate::api_models::{AssignmentsResponse, HeartbeatRequest, HeartbeatResponse};
use crate::models::{AssignmentSet, Poller};

#[derive(Error, Debug)]
pub enum PollerServiceError {
    #[error("Poller not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Global DNS cache max TTL. Missing or unparsable falls back to the default.
pub async fn dns_cache_max_ttl(store: &dyn PollerStore) -> Result<i64, StoreError> {
    Ok(store
        .get_setting(SETTING_DNS_CACHE_MAX_TTL)
        .await?
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|ttl| *ttl >= 0)
        .unwrap_or(DEFAULT_DNS_CACHE_MAX_TTL_SECONDS))
}

/// The set `poller` would receive right now.
pub async fn assignment_set_for(store: &dyn PollerStore, poller: &Poller) -> Result<AssignmentSet, StoreError> {
    let pollers = store.list_pollers().await?;
    let monitors = store.list_monitors().await?;
    let max_ttl = dns_cache_max_ttl(store).await?;
    Ok(assignment_set_for_poller(poller, &pollers, &monitors, max_ttl))
}

pub struct PollerService {
    store: Arc<dyn PollerStore>,
}

impl PollerService {
    pub fn new(store: Arc<dyn PollerStore>) -> Self {
        Self { store }
    }

    pub async fn heartbeat(
        &self,
        poller_id: i64,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, PollerServiceError> {
        let update = HeartbeatUpdate {
            status: request.status,
            queue_depth: request.queue_depth,
            version: request.version,
            at: Utc::now(),
        };
        let poller = self
            .store
            .record_heartbeat(poller_id, update)
            .await?
            .ok_or(PollerServiceError::NotFound)?;
        let accepted_results = self.store.append_results(request.results).await?;
        debug!(
            poller_id = poller.id,
            status = %poller.status,
            queue_depth = poller.queue_depth,
            accepted_results = accepted_results,
            "Heartbeat received."
        );
        Ok(HeartbeatResponse {
            poller_id,
            accepted_results,
        })
    }

    /// Unchanged (no list) when `since_version` matches the current fingerprint.
    pub async fn assignments(
        &self,
        poller_id: i64,
        since_version: Option<&str>,
    ) -> Result<AssignmentsResponse, PollerServiceError> {
        let poller = self
            .store
            .get_poller(poller_id)
            .await?
            .ok_or(PollerServiceError::NotFound)?;
        let set = assignment_set_for(self.store.as_ref(), &poller).await?;
        if since_version == Some(set.version.as_str()) {
            return Ok(AssignmentsResponse {
                changed: false,
                version: set.version,
                assignments: None,
            });
        }
        debug!(poller_id = poller_id, version = %set.version, count = set.assignments.len(), "Serving new assignment list.");
        Ok(AssignmentsResponse {
            changed: true,
            version: set.version,
            assignments: Some(set.assignments),
        })
    }

    pub async fn sweep_offline(&self, offline_after: Duration) -> Result<Vec<i64>, StoreError> {
        let window = chrono::Duration::from_std(offline_after).unwrap_or(chrono::Duration::seconds(90));
        let marked = self.store.mark_stale_offline(Utc::now() - window).await?;
        for poller_id in &marked {
            warn!(poller_id = poller_id, "Poller missed heartbeats, marked offline.");
        }
        Ok(marked)
    }
}

/// Periodic upkeep: offline sweep and registration limiter pruning.
pub async fn maintenance_loop(
    poller_service: Arc<PollerService>,
    token_service: Arc<TokenService>,
    offline_after: Duration,
    every: Duration,
) {
    info!(offline_after_seconds = offline_after.as_secs(), "Poller maintenance task started.");
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = poller_service.sweep_offline(offline_after).await {
            error!(error = %e, "Offline sweep failed.");
        }
        token_service.prune_rate_limiter();
    }
}
