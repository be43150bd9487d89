//! Registration tokens, per-poller bearer tokens and the registration rate limit.
use chrono::{DateTime, Duration, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

use super::poller_store::{
    NewPoller, PollerStore, SETTING_REGISTRATION_TOKEN, SETTING_REGISTRATION_TOKEN_EXPIRES_AT, StoreError,
};
use crate::api_models::{RegisterRequest, RegisterResponse};
use crate::models::PollerToken;

const REGISTRATION_TOKEN_LENGTH: usize = 48;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Too many registration attempts")]
    RateLimited,
    #[error("Poller registration is not configured")]
    NotConfigured,
    #[error("Invalid registration token")]
    InvalidToken,
    #[error("Registration token expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The current registration token and when it stops being accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// 32 random bytes, hex encoded.
pub fn generate_access_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

pub fn generate_registration_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(REGISTRATION_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub struct TokenService {
    store: Arc<dyn PollerStore>,
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    registration_token_ttl: Duration,
}

impl TokenService {
    pub fn new(store: Arc<dyn PollerStore>, rate_limit_per_minute: u32, registration_token_ttl_minutes: i64) -> Self {
        let burst = NonZeroU32::new(rate_limit_per_minute).unwrap_or(nonzero!(10u32));
        Self {
            store,
            limiter: RateLimiter::keyed(Quota::per_minute(burst)),
            registration_token_ttl: Duration::minutes(registration_token_ttl_minutes.max(1)),
        }
    }

    pub fn check_rate_limit(&self, client_ip: IpAddr) -> Result<(), RegistrationError> {
        self.limiter.check_key(&client_ip).map_err(|_| {
            warn!(client_ip = %client_ip, "Poller registration rate limit exceeded.");
            RegistrationError::RateLimited
        })
    }

    /// Drops limiter state for addresses that have fully replenished.
    pub fn prune_rate_limiter(&self) {
        self.limiter.retain_recent();
    }

    async fn expiry(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw = self.store.get_setting(SETTING_REGISTRATION_TOKEN_EXPIRES_AT).await?;
        Ok(raw
            .and_then(|value| DateTime::parse_from_rfc3339(value.trim()).ok())
            .map(|parsed| parsed.with_timezone(&Utc)))
    }

    async fn set_expiry(&self, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store
            .set_setting(SETTING_REGISTRATION_TOKEN_EXPIRES_AT, expires_at.to_rfc3339())
            .await
    }

    /// A stored token without an expiry starts its TTL on first use.
    pub async fn validate_registration_token(&self, provided: Option<&str>) -> Result<(), RegistrationError> {
        let stored = self
            .store
            .get_setting(SETTING_REGISTRATION_TOKEN)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or(RegistrationError::NotConfigured)?;
        let provided = provided.unwrap_or_default();
        if provided.is_empty() || !bool::from(provided.as_bytes().ct_eq(stored.as_bytes())) {
            return Err(RegistrationError::InvalidToken);
        }

        let now = Utc::now();
        match self.expiry().await? {
            Some(expires_at) if now >= expires_at => Err(RegistrationError::Expired),
            Some(_) => Ok(()),
            None => {
                self.set_expiry(now + self.registration_token_ttl).await?;
                Ok(())
            }
        }
    }

    /// Rate limit first, then the token, then a new poller with its first bearer token.
    pub async fn register(
        &self,
        client_ip: IpAddr,
        provided_token: Option<&str>,
        request: RegisterRequest,
    ) -> Result<RegisterResponse, RegistrationError> {
        self.check_rate_limit(client_ip)?;
        self.validate_registration_token(provided_token).await?;

        let name = match request.name.trim() {
            "" => format!("poller-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            trimmed => trimmed.to_string(),
        };
        let poller = self
            .store
            .create_poller(NewPoller {
                name,
                region: request.region,
                datacenter: request.datacenter,
                capabilities: request.capabilities,
                version: request.version,
            })
            .await?;
        let access_token = self.issue_token(poller.id).await?;
        info!(poller_id = poller.id, name = %poller.name, client_ip = %client_ip, "Poller registered.");
        Ok(RegisterResponse {
            poller_id: poller.id,
            access_token,
        })
    }

    /// Mints a bearer token, deactivating any previous one. Returns the raw token.
    pub async fn issue_token(&self, poller_id: i64) -> Result<String, StoreError> {
        let raw = generate_access_token();
        self.store
            .replace_active_token(poller_id, hash_token(&raw), None)
            .await?;
        Ok(raw)
    }

    pub async fn rotate_token(&self, poller_id: i64) -> Result<String, StoreError> {
        let raw = self.issue_token(poller_id).await?;
        info!(poller_id = poller_id, "Poller token rotated.");
        Ok(raw)
    }

    pub async fn revoke_tokens(&self, poller_id: i64) -> Result<usize, StoreError> {
        let count = self.store.deactivate_tokens(poller_id).await?;
        info!(poller_id = poller_id, revoked = count, "Poller tokens revoked.");
        Ok(count)
    }

    /// The active, unexpired token matching `raw`, if any.
    pub async fn authenticate(&self, raw: &str) -> Result<Option<PollerToken>, StoreError> {
        if raw.is_empty() {
            return Ok(None);
        }
        let token = self.store.find_token_by_hash(&hash_token(raw)).await?;
        Ok(token.filter(|t| t.is_usable_at(Utc::now())))
    }

    /// The current registration token, generating one when none exists.
    pub async fn current_registration_token(&self) -> Result<RegistrationToken, StoreError> {
        let stored = self
            .store
            .get_setting(SETTING_REGISTRATION_TOKEN)
            .await?
            .filter(|t| !t.is_empty());
        let Some(token) = stored else {
            return self.generate_registration_token().await;
        };
        let expires_at = match self.expiry().await? {
            Some(expires_at) => expires_at,
            None => {
                let expires_at = Utc::now() + self.registration_token_ttl;
                self.set_expiry(expires_at).await?;
                expires_at
            }
        };
        Ok(RegistrationToken { token, expires_at })
    }

    /// Replaces the registration token and restarts its TTL.
    pub async fn generate_registration_token(&self) -> Result<RegistrationToken, StoreError> {
        let token = generate_registration_token();
        let expires_at = Utc::now() + self.registration_token_ttl;
        self.store.set_setting(SETTING_REGISTRATION_TOKEN, token.clone()).await?;
        self.set_expiry(expires_at).await?;
        info!(expires_at = %expires_at, "Generated new poller registration token.");
        Ok(RegistrationToken { token, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::poller_store::InMemoryPollerStore;

    fn service(rate_limit: u32) -> (Arc<InMemoryPollerStore>, TokenService) {
        let store = Arc::new(InMemoryPollerStore::new());
        let service = TokenService::new(store.clone(), rate_limit, 1440);
        (store, service)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, last])
    }

    #[test]
    fn test_generated_tokens() {
        let token = generate_access_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_access_token());

        let registration = generate_registration_token();
        assert_eq!(registration.len(), 48);
        assert!(registration.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(hash_token("abc").len(), 64);
    }

    #[tokio::test]
    async fn test_unconfigured_and_wrong_token() {
        let (store, service) = service(10);
        assert!(matches!(
            service.validate_registration_token(Some("x")).await,
            Err(RegistrationError::NotConfigured)
        ));
        store.set_setting(SETTING_REGISTRATION_TOKEN, "token".into()).await.unwrap();
        assert!(matches!(
            service.validate_registration_token(Some("nope")).await,
            Err(RegistrationError::InvalidToken)
        ));
        assert!(matches!(
            service.validate_registration_token(None).await,
            Err(RegistrationError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let (store, service) = service(10);
        store.set_setting(SETTING_REGISTRATION_TOKEN, "token".into()).await.unwrap();
        let past = Utc::now() - Duration::minutes(1);
        store
            .set_setting(SETTING_REGISTRATION_TOKEN_EXPIRES_AT, past.to_rfc3339())
            .await
            .unwrap();
        let err = service.validate_registration_token(Some("token")).await.unwrap_err();
        assert_eq!(err.to_string(), "Registration token expired");
    }

    #[tokio::test]
    async fn test_missing_expiry_is_set_on_first_use() {
        let (store, service) = service(10);
        store.set_setting(SETTING_REGISTRATION_TOKEN, "token".into()).await.unwrap();
        service.validate_registration_token(Some("token")).await.unwrap();
        let expiry = store.get_setting(SETTING_REGISTRATION_TOKEN_EXPIRES_AT).await.unwrap();
        assert!(expiry.is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_address() {
        let (_, service) = service(2);
        assert!(service.check_rate_limit(ip(30)).is_ok());
        assert!(service.check_rate_limit(ip(30)).is_ok());
        assert!(matches!(service.check_rate_limit(ip(30)), Err(RegistrationError::RateLimited)));
        assert!(service.check_rate_limit(ip(31)).is_ok());
    }

    #[tokio::test]
    async fn test_register_then_rotate_and_revoke() {
        let (store, service) = service(10);
        store.set_setting(SETTING_REGISTRATION_TOKEN, "token".into()).await.unwrap();
        let registered = service
            .register(ip(20), Some("token"), RegisterRequest::default())
            .await
            .unwrap();
        let poller = store.get_poller(registered.poller_id).await.unwrap().unwrap();
        assert!(poller.name.starts_with("poller-"));
        assert!(service.authenticate(&registered.access_token).await.unwrap().is_some());

        let rotated = service.rotate_token(registered.poller_id).await.unwrap();
        assert!(service.authenticate(&registered.access_token).await.unwrap().is_none());
        assert_eq!(
            service.authenticate(&rotated).await.unwrap().unwrap().poller_id,
            registered.poller_id
        );

        assert_eq!(service.revoke_tokens(registered.poller_id).await.unwrap(), 1);
        assert!(service.authenticate(&rotated).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_current_registration_token_generates_once() {
        let (_, service) = service(10);
        let first = service.current_registration_token().await.unwrap();
        let again = service.current_registration_token().await.unwrap();
        assert_eq!(first, again);
        let fresh = service.generate_registration_token().await.unwrap();
        assert_ne!(fresh.token, first.token);
    }
}
