//! Cross-poller DNS cache tier.
//!
//! Entries are stored as a JSON array of `{address, family}` under
//! `<prefix><cache key>` with a native expiry. Callers treat every failure here
//! as a miss; the tier is an optimisation and never a dependency.
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tokio::sync::Mutex;

use super::dns_cache::ResolvedAddress;

#[derive(Error, Debug)]
pub enum SharedCacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SharedEntry {
    pub addresses: Vec<ResolvedAddress>,
    /// Remaining lifetime as reported by the store.
    pub ttl_seconds: u32,
}

#[async_trait]
pub trait SharedDnsCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SharedEntry>, SharedCacheError>;

    async fn put(
        &self,
        key: &str,
        addresses: &[ResolvedAddress],
        ttl_seconds: u32,
    ) -> Result<(), SharedCacheError>;
}

pub struct RedisDnsCache {
    client: redis::Client,
    prefix: String,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisDnsCache {
    /// Parses the URL only. The connection is opened on first use.
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, SharedCacheError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            prefix: prefix.into(),
            connection: Mutex::new(None),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, SharedCacheError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection so the next call reconnects.
    async fn invalidate(&self) {
        self.connection.lock().await.take();
    }

    async fn try_get(&self, key: &str) -> Result<Option<SharedEntry>, SharedCacheError> {
        let mut conn = self.connection().await?;
        let full_key = self.full_key(key);

        let raw: Option<String> = conn.get(&full_key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let Ok(addresses) = serde_json::from_str::<Vec<ResolvedAddress>>(&raw) else {
            return Ok(None);
        };
        if addresses.is_empty() {
            return Ok(None);
        }

        let ttl: i64 = conn.ttl(&full_key).await?;
        if ttl <= 0 {
            return Ok(None);
        }
        Ok(Some(SharedEntry {
            addresses,
            ttl_seconds: u32::try_from(ttl).unwrap_or(u32::MAX),
        }))
    }

    async fn try_put(
        &self,
        key: &str,
        addresses: &[ResolvedAddress],
        ttl_seconds: u32,
    ) -> Result<(), SharedCacheError> {
        let payload = serde_json::to_string(addresses)?;
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(self.full_key(key), payload, u64::from(ttl_seconds.max(1)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SharedDnsCache for RedisDnsCache {
    async fn get(&self, key: &str) -> Result<Option<SharedEntry>, SharedCacheError> {
        let result = self.try_get(key).await;
        if result.is_err() {
            self.invalidate().await;
        }
        result
    }

    async fn put(
        &self,
        key: &str,
        addresses: &[ResolvedAddress],
        ttl_seconds: u32,
    ) -> Result<(), SharedCacheError> {
        let result = self.try_put(key, addresses, ttl_seconds).await;
        if result.is_err() {
            self.invalidate().await;
        }
        result
    }
}
