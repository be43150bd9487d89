//! Operator-facing poller administration.
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::poller_service::{assignment_set_for, dns_cache_max_ttl};
use super::poller_store::{PollerStore, SETTING_DNS_CACHE_MAX_TTL, StoreError};
use super::token_service::{RegistrationToken, TokenService};
use crate::api_models::UpdatePollerRequest;
use crate::models::{AssignmentSet, Capabilities, Poller, parse_capabilities};

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Max TTL must be 0 or a positive integer (seconds).")]
    InvalidMaxTtl,
    #[error("Invalid poller weight")]
    InvalidWeight,
    #[error("Invalid poller capabilities")]
    InvalidCapabilities,
    #[error("No updates provided")]
    NoUpdates,
    #[error("Poller not found")]
    PollerNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Integers only; numeric strings are accepted since form inputs send them.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn parse_max_ttl(value: &Value) -> Result<i64, AdminError> {
    as_integer(value).filter(|ttl| *ttl >= 0).ok_or(AdminError::InvalidMaxTtl)
}

pub fn parse_weight(value: &Value) -> Result<i64, AdminError> {
    as_integer(value).filter(|w| *w > 0).ok_or(AdminError::InvalidWeight)
}

/// An object, or a string holding a JSON object. `null` clears.
pub fn parse_capabilities_update(value: &Value) -> Result<Capabilities, AdminError> {
    let is_object = match value {
        Value::Null => return Ok(Capabilities::new()),
        Value::Object(_) => true,
        Value::String(raw) => matches!(serde_json::from_str::<Value>(raw), Ok(Value::Object(_))),
        _ => false,
    };
    if !is_object {
        return Err(AdminError::InvalidCapabilities);
    }
    Ok(parse_capabilities(value))
}

pub struct AdminService {
    store: Arc<dyn PollerStore>,
    tokens: Arc<TokenService>,
}

impl AdminService {
    pub fn new(store: Arc<dyn PollerStore>, tokens: Arc<TokenService>) -> Self {
        Self { store, tokens }
    }

    pub async fn list_pollers(&self) -> Result<Vec<Poller>, AdminError> {
        Ok(self.store.list_pollers().await?)
    }

    pub async fn registration_token(&self) -> Result<RegistrationToken, AdminError> {
        Ok(self.tokens.current_registration_token().await?)
    }

    pub async fn generate_registration_token(&self) -> Result<RegistrationToken, AdminError> {
        Ok(self.tokens.generate_registration_token().await?)
    }

    pub async fn dns_cache_max_ttl(&self) -> Result<i64, AdminError> {
        Ok(dns_cache_max_ttl(self.store.as_ref()).await?)
    }

    pub async fn set_dns_cache_max_ttl(&self, value: &Value) -> Result<i64, AdminError> {
        let ttl = parse_max_ttl(value)?;
        self.store
            .set_setting(SETTING_DNS_CACHE_MAX_TTL, ttl.to_string())
            .await?;
        info!(max_ttl_seconds = ttl, "Updated poller DNS cache max TTL.");
        Ok(ttl)
    }

    async fn require_poller(&self, poller_id: i64) -> Result<Poller, AdminError> {
        self.store
            .get_poller(poller_id)
            .await?
            .ok_or(AdminError::PollerNotFound)
    }

    pub async fn rotate_token(&self, poller_id: i64) -> Result<String, AdminError> {
        self.require_poller(poller_id).await?;
        Ok(self.tokens.rotate_token(poller_id).await?)
    }

    pub async fn revoke_tokens(&self, poller_id: i64) -> Result<usize, AdminError> {
        self.require_poller(poller_id).await?;
        Ok(self.tokens.revoke_tokens(poller_id).await?)
    }

    /// Validates everything before writing anything.
    pub async fn update_poller(&self, poller_id: i64, request: UpdatePollerRequest) -> Result<Poller, AdminError> {
        let weight = request.weight.as_ref().map(parse_weight).transpose()?;
        let capabilities = request
            .capabilities
            .as_ref()
            .map(parse_capabilities_update)
            .transpose()?;
        if weight.is_none() && capabilities.is_none() {
            return Err(AdminError::NoUpdates);
        }
        let poller = self
            .store
            .update_poller_settings(poller_id, weight, capabilities)
            .await?
            .ok_or(AdminError::PollerNotFound)?;
        info!(poller_id = poller_id, weight = poller.weight, "Poller settings updated.");
        Ok(poller)
    }

    pub async fn preview_assignments(&self, poller_id: i64) -> Result<AssignmentSet, AdminError> {
        let poller = self.require_poller(poller_id).await?;
        Ok(assignment_set_for(self.store.as_ref(), &poller).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Monitor, PlacementMode};
    use crate::server::poller_store::{InMemoryPollerStore, NewPoller};
    use serde_json::{Map, json};

    async fn setup() -> (AdminService, i64) {
        let monitor = Monitor {
            id: 5,
            name: "api".into(),
            check_type: "http".into(),
            interval: 30,
            active: true,
            poller_mode: PlacementMode::Auto,
            poller_id: None,
            poller_region: None,
            poller_datacenter: None,
            poller_capability: None,
            poller_dns_cache_disabled: false,
            config: Map::new(),
        };
        let store: Arc<dyn PollerStore> = Arc::new(InMemoryPollerStore::with_monitors(vec![monitor]));
        let poller = store
            .create_poller(NewPoller {
                name: "edge".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let tokens = Arc::new(TokenService::new(store.clone(), 10, 1440));
        (AdminService::new(store, tokens), poller.id)
    }

    #[test]
    fn test_max_ttl_validation() {
        assert_eq!(parse_max_ttl(&json!(0)).unwrap(), 0);
        assert_eq!(parse_max_ttl(&json!("300")).unwrap(), 300);
        for bad in [json!(-1), json!(1.5), json!("abc"), Value::Null] {
            assert_eq!(
                parse_max_ttl(&bad).unwrap_err().to_string(),
                "Max TTL must be 0 or a positive integer (seconds)."
            );
        }
    }

    #[test]
    fn test_weight_and_capability_validation() {
        assert_eq!(parse_weight(&json!(150)).unwrap(), 150);
        assert!(matches!(parse_weight(&json!(0)), Err(AdminError::InvalidWeight)));
        assert!(matches!(parse_weight(&json!("x")), Err(AdminError::InvalidWeight)));

        let caps = parse_capabilities_update(&json!("{\"icmp\":true}")).unwrap();
        assert_eq!(caps.get("icmp"), Some(&true));
        assert!(matches!(
            parse_capabilities_update(&json!("[1]")),
            Err(AdminError::InvalidCapabilities)
        ));
        assert!(matches!(
            parse_capabilities_update(&json!(3)),
            Err(AdminError::InvalidCapabilities)
        ));
        assert!(parse_capabilities_update(&json!(null)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_capabilities_clear() {
        let (admin, poller_id) = setup().await;
        let set: UpdatePollerRequest = serde_json::from_value(json!({"capabilities": {"icmp": true}})).unwrap();
        let poller = admin.update_poller(poller_id, set).await.unwrap();
        assert_eq!(poller.capabilities.get("icmp"), Some(&true));

        let clear: UpdatePollerRequest = serde_json::from_value(json!({"capabilities": null})).unwrap();
        assert_eq!(clear.capabilities, Some(json!(null)));
        let poller = admin.update_poller(poller_id, clear).await.unwrap();
        assert!(poller.capabilities.is_empty());

        let absent: UpdatePollerRequest = serde_json::from_value(json!({})).unwrap();
        assert!(absent.capabilities.is_none());
    }

    #[tokio::test]
    async fn test_update_poller() {
        let (admin, poller_id) = setup().await;
        let err = admin
            .update_poller(poller_id, UpdatePollerRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No updates provided");

        let updated = admin
            .update_poller(
                poller_id,
                UpdatePollerRequest {
                    weight: Some(json!(250)),
                    capabilities: Some(json!({"snmp": true})),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.weight, 250);
        assert_eq!(updated.capabilities.get("snmp"), Some(&true));

        let missing = admin
            .update_poller(
                404,
                UpdatePollerRequest {
                    weight: Some(json!(1)),
                    capabilities: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(missing.to_string(), "Poller not found");
    }

    #[tokio::test]
    async fn test_dns_ttl_roundtrip_and_preview() {
        let (admin, poller_id) = setup().await;
        assert_eq!(admin.dns_cache_max_ttl().await.unwrap(), 60);
        assert_eq!(admin.set_dns_cache_max_ttl(&json!(15)).await.unwrap(), 15);
        assert_eq!(admin.dns_cache_max_ttl().await.unwrap(), 15);

        let preview = admin.preview_assignments(poller_id).await.unwrap();
        assert_eq!(preview.assignments.len(), 1);
        assert_eq!(
            preview.assignments[0].config.get("pollerDnsCacheMaxTtlSeconds"),
            Some(&json!(15))
        );
        assert!(matches!(
            admin.preview_assignments(999).await,
            Err(AdminError::PollerNotFound)
        ));
    }

    #[tokio::test]
    async fn test_rotate_requires_known_poller() {
        let (admin, poller_id) = setup().await;
        assert_eq!(admin.rotate_token(poller_id).await.unwrap().len(), 64);
        assert_eq!(admin.revoke_tokens(poller_id).await.unwrap(), 1);
        assert!(matches!(admin.rotate_token(999).await, Err(AdminError::PollerNotFound)));
    }
}
