//! HTTP client for the coordinator's poller API and the loops built on it.
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::scheduler::ResultQueue;
use crate::api_models::{
    AssignmentsResponse, HeartbeatRequest, HeartbeatResponse, REGISTRATION_TOKEN_HEADER, RegisterRequest,
    RegisterResponse, RpcResponse,
};
use crate::models::{Assignment, PollerStatus};
use crate::version::{VERSION, user_agent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ApiClientError {
    #[error("Poller API request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Poller API request failed: {status} {body}")]
    Status { status: u16, body: String },
    #[error("Poller API returned an invalid payload: {0}")]
    Decode(String),
    #[error("Poller API rejected the request: {0}")]
    Rejected(String),
}

impl ApiClientError {
    /// The coordinator no longer accepts these credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiClientError::Status { status: 401 | 403, .. })
    }
}

#[derive(Debug, Clone)]
pub struct PollerApiClient {
    http: reqwest::Client,
    base_url: String,
    poller_id: Option<i64>,
    access_token: Option<String>,
}

impl PollerApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiClientError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            poller_id: None,
            access_token: None,
        })
    }

    #[must_use]
    pub fn with_credentials(mut self, poller_id: Option<i64>, access_token: Option<String>) -> Self {
        self.poller_id = poller_id;
        self.access_token = access_token.filter(|t| !t.is_empty());
        self
    }

    pub fn poller_id(&self) -> Option<i64> {
        self.poller_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiClientError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: RpcResponse<T> =
            serde_json::from_str(&body).map_err(|e| ApiClientError::Decode(e.to_string()))?;
        match envelope {
            RpcResponse {
                ok: true,
                data: Some(data),
                ..
            } => Ok(data),
            RpcResponse { ok: true, .. } => Err(ApiClientError::Decode("missing response data".to_string())),
            RpcResponse { msg, .. } => Err(ApiClientError::Rejected(msg.unwrap_or_else(|| "unknown error".to_string()))),
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiClientError> {
        let response = self.authorized(self.http.post(self.url(path))).json(body).send().await?;
        Self::decode(response).await
    }

    pub async fn register(
        &self,
        registration_token: &str,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, ApiClientError> {
        let response = self
            .http
            .post(self.url("/api/poller/register"))
            .header(REGISTRATION_TOKEN_HEADER, registration_token)
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse, ApiClientError> {
        self.post("/api/poller/heartbeat", request).await
    }

    pub async fn fetch_assignments(&self, since_version: Option<&str>) -> Result<AssignmentsResponse, ApiClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(id) = self.poller_id {
            query.push(("poller_id", id.to_string()));
        }
        if let Some(version) = since_version {
            query.push(("since_version", version.to_string()));
        }
        let response = self
            .authorized(self.http.get(self.url("/api/poller/assignments")))
            .query(&query)
            .send()
            .await?;
        Self::decode(response).await
    }
}

/// Degraded once the undelivered backlog reaches half the queue.
pub fn reported_status(queue_depth: usize, capacity: usize) -> PollerStatus {
    if capacity > 0 && queue_depth * 2 >= capacity {
        PollerStatus::Degraded
    } else {
        PollerStatus::Online
    }
}

/// Ships queued results every `interval`. Undelivered results go back on the
/// queue. Returns only when the coordinator rejects our credentials.
pub async fn heartbeat_loop(
    client: Arc<PollerApiClient>,
    queue: Arc<ResultQueue>,
    queue_capacity: usize,
    interval: Duration,
) -> ApiClientError {
    loop {
        debug!(interval_seconds = interval.as_secs(), "Heartbeat task tick.");
        tokio::time::sleep(interval).await;

        let results = queue.drain();
        let queue_depth = results.len();
        let request = HeartbeatRequest {
            status: reported_status(queue_depth, queue_capacity),
            queue_depth: u32::try_from(queue_depth).unwrap_or(u32::MAX),
            version: Some(VERSION.to_string()),
            results,
        };
        match client.heartbeat(&request).await {
            Ok(response) => {
                debug!(accepted = response.accepted_results, "Heartbeat delivered.");
            }
            Err(e) => {
                queue.requeue(request.results);
                if e.is_unauthorized() {
                    error!(error = %e, "Heartbeat rejected. Exiting heartbeat task.");
                    return e;
                }
                warn!(error = %e, pending = queue.len(), "Heartbeat failed, results re-queued.");
            }
        }
    }
}

/// Polls for assignment changes and publishes new lists to the scheduler.
/// Returns when credentials are rejected or the scheduler is gone.
pub async fn assignment_sync_loop(
    client: Arc<PollerApiClient>,
    interval: Duration,
    updates: watch::Sender<Vec<Assignment>>,
) -> Option<ApiClientError> {
    let mut version: Option<String> = None;
    loop {
        match client.fetch_assignments(version.as_deref()).await {
            Ok(AssignmentsResponse {
                changed: true,
                version: new_version,
                assignments: Some(assignments),
            }) => {
                info!(version = %new_version, count = assignments.len(), "Received new assignment list.");
                version = Some(new_version);
                if updates.send(assignments).is_err() {
                    warn!("Scheduler is gone. Exiting assignment sync task.");
                    return None;
                }
            }
            Ok(response) => {
                debug!(version = %response.version, "Assignments unchanged.");
            }
            Err(e) if e.is_unauthorized() => {
                error!(error = %e, "Assignment fetch rejected. Exiting assignment sync task.");
                return Some(e);
            }
            Err(e) => warn!(error = %e, "Failed to fetch assignments."),
        }
        tokio::time::sleep(interval).await;
    }
}
