//! Request and response bodies exchanged between pollers, admins and the coordinator.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Assignment, Capabilities, Poller, PollerStatus, ResultRecord};

pub const REGISTRATION_TOKEN_HEADER: &str = "X-Poller-Registration-Token";

/// Uniform envelope: `{ "ok": true, ...data }` or `{ "ok": false, "msg": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct RpcResponse<T> {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> RpcResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            msg: None,
            data: Some(data),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            msg: Some(msg.into()),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterResponse {
    pub poller_id: i64,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatRequest {
    pub status: PollerStatus,
    #[serde(default)]
    pub queue_depth: u32,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub results: Vec<ResultRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatResponse {
    pub poller_id: i64,
    pub accepted_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AssignmentsQuery {
    pub poller_id: i64,
    #[serde(default)]
    pub since_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentsResponse {
    pub changed: bool,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignments: Option<Vec<Assignment>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerListResponse {
    pub pollers: Vec<Poller>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationTokenResponse {
    pub token: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsCacheSettingsPayload {
    #[serde(rename = "maxTtlSeconds")]
    pub max_ttl_seconds: i64,
}

/// Loosely typed so invalid values get a validation message instead of a decode error.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SetDnsCacheSettingsRequest {
    #[serde(rename = "maxTtlSeconds", default)]
    pub max_ttl_seconds: Value,
}

/// Admin edit. Values are validated server-side so they stay loosely typed here.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UpdatePollerRequest {
    #[serde(default)]
    pub weight: Option<Value>,
    /// `null` is kept as `Some(Value::Null)` and clears the capabilities.
    #[serde(default, deserialize_with = "present_value")]
    pub capabilities: Option<Value>,
}

fn present_value<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerResponse {
    pub poller: Poller,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevokeTokensResponse {
    pub revoked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentPreviewResponse {
    pub version: String,
    pub assignments: Vec<Assignment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rpc_response_envelope() {
        let ok = RpcResponse::success(RegisterResponse {
            poller_id: 7,
            access_token: "abc".into(),
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"ok": true, "poller_id": 7, "access_token": "abc"})
        );

        let failed: RpcResponse<RegisterResponse> = RpcResponse::failure("Poller not found");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"ok": false, "msg": "Poller not found"})
        );
    }
}
