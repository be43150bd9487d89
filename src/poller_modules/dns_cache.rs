//! Hostname resolution for outbound checks, with a two-tier TTL cache.
//!
//! Lookup order for a cacheable name:
//! 1. the in-process map while its entry is unexpired;
//! 2. a lookup already in flight for the same key (single-flight);
//! 3. the shared tier, whose hit populates the in-process map;
//! 4. live resolution, which populates both tiers.
//!
//! Custom upstream servers report record TTLs, so entries live for
//! `effective_ttl(record_ttl, max_ttl)`. The system resolver reports none and
//! entries use the monitor's max TTL verbatim.
use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::{RData, RecordType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::DnsCacheSettings;
use super::shared_cache::{RedisDnsCache, SharedDnsCache};
use crate::models::is_truthy;

pub const DEFAULT_MAX_TTL_SECONDS: i64 = 60;
const SYSTEM_SIGNATURE: &str = "system";
const DEFAULT_DNS_PORT: u16 = 53;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DnsError {
    #[error("Hostname is required")]
    MissingHostname,
    #[error("DNS lookup failed for {host}: {reason}")]
    Lookup { host: String, reason: String },
    #[error("DNS lookup failed for {0}")]
    NoAddresses(String),
    #[error("Invalid DNS server '{0}'")]
    InvalidServer(String),
    #[error("Shared DNS cache unavailable: {0}")]
    SharedCache(String),
    #[error("DNS lookup for {0} was abandoned")]
    Abandoned(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl AddressFamily {
    pub fn code(&self) -> u8 {
        match self {
            AddressFamily::Any => 0,
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 6,
        }
    }

    fn admits(&self, ip: &IpAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => ip.is_ipv4(),
            AddressFamily::V6 => ip.is_ipv6(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub address: IpAddr,
    pub family: u8,
}

impl From<IpAddr> for ResolvedAddress {
    fn from(address: IpAddr) -> Self {
        let family = if address.is_ipv4() { 4 } else { 6 };
        Self { address, family }
    }
}

/// `"<servers signature>|<family>|<lowercase hostname>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsCacheKey(String);

impl DnsCacheKey {
    pub fn new(servers_signature: &str, family: AddressFamily, hostname: &str) -> Self {
        Self(format!(
            "{}|{}|{}",
            servers_signature,
            family.code(),
            hostname.to_ascii_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DnsCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-check cache behaviour, read from the assignment config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsCacheOptions {
    pub max_ttl_seconds: i64,
    pub disabled: bool,
}

impl Default for DnsCacheOptions {
    fn default() -> Self {
        Self {
            max_ttl_seconds: DEFAULT_MAX_TTL_SECONDS,
            disabled: false,
        }
    }
}

impl DnsCacheOptions {
    /// Reads `pollerDnsCacheMaxTtlSeconds` (default 60) and `pollerDnsCacheDisabled`.
    pub fn from_config(config: &Map<String, Value>) -> Self {
        let max_ttl_seconds = match config.get("pollerDnsCacheMaxTtlSeconds") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .unwrap_or(DEFAULT_MAX_TTL_SECONDS);
        let disabled = config.get("pollerDnsCacheDisabled").is_some_and(is_truthy);
        Self {
            max_ttl_seconds,
            disabled,
        }
    }

    pub fn caching_enabled(&self) -> bool {
        !self.disabled && self.max_ttl_seconds > 0
    }
}

/// `max(1, min(max_ttl, candidate.unwrap_or(max_ttl)))`
pub fn effective_ttl(candidate_seconds: Option<u32>, max_ttl_seconds: u32) -> u32 {
    candidate_seconds
        .unwrap_or(max_ttl_seconds)
        .min(max_ttl_seconds)
        .max(1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub addresses: Vec<ResolvedAddress>,
    /// Smallest record TTL when the resolver reports one.
    pub ttl_seconds: Option<u32>,
}

#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn lookup(&self, hostname: &str, family: AddressFamily) -> Result<Resolution, DnsError>;
}

/// The operating system resolver. Reports no TTL.
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup(&self, hostname: &str, family: AddressFamily) -> Result<Resolution, DnsError> {
        let resolved = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| DnsError::Lookup {
                host: hostname.to_string(),
                reason: e.to_string(),
            })?;

        let mut addresses: Vec<ResolvedAddress> = Vec::new();
        for socket_addr in resolved {
            let ip = socket_addr.ip();
            if family.admits(&ip) && !addresses.iter().any(|a| a.address == ip) {
                addresses.push(ip.into());
            }
        }
        if addresses.is_empty() {
            return Err(DnsError::NoAddresses(hostname.to_string()));
        }
        Ok(Resolution {
            addresses,
            ttl_seconds: None,
        })
    }
}

/// Parses `ip` or `ip:port` (IPv6 with port as `[ip]:port`).
pub fn parse_server_addr(entry: &str) -> Result<SocketAddr, DnsError> {
    let entry = entry.trim();
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(addr);
    }
    entry
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| DnsError::InvalidServer(entry.to_string()))
}

/// Builds a resolver for an explicit server list, or the system configuration
/// when the list is empty.
pub fn build_resolver(servers: &[String], timeout: Option<Duration>) -> Result<TokioAsyncResolver, DnsError> {
    let mut options = ResolverOpts::default();
    if let Some(timeout) = timeout {
        options.timeout = timeout;
    }

    if servers.is_empty() {
        let (config, mut system_options) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| DnsError::Lookup {
                host: SYSTEM_SIGNATURE.to_string(),
                reason: e.to_string(),
            })?;
        if let Some(timeout) = timeout {
            system_options.timeout = timeout;
        }
        return Ok(TokioAsyncResolver::tokio(config, system_options));
    }

    let mut name_servers = Vec::with_capacity(servers.len() * 2);
    for server in servers {
        let addr = parse_server_addr(server)?;
        name_servers.push(NameServerConfig::new(addr, Protocol::Udp));
        name_servers.push(NameServerConfig::new(addr, Protocol::Tcp));
    }
    let config = ResolverConfig::from_parts(None, vec![], NameServerConfigGroup::from(name_servers));
    Ok(TokioAsyncResolver::tokio(config, options))
}

/// Queries configured upstream servers directly so record TTLs are visible.
pub struct CustomServerLookup {
    resolver: TokioAsyncResolver,
}

impl CustomServerLookup {
    pub fn new(servers: &[String]) -> Result<Self, DnsError> {
        Ok(Self {
            resolver: build_resolver(servers, None)?,
        })
    }

    async fn query(&self, hostname: &str, record_type: RecordType) -> Result<Vec<(IpAddr, u32)>, String> {
        let lookup = self
            .resolver
            .lookup(hostname, record_type)
            .await
            .map_err(|e| e.to_string())?;
        Ok(lookup
            .record_iter()
            .filter_map(|record| match record.data()? {
                RData::A(a) => Some((IpAddr::V4(a.0), record.ttl())),
                RData::AAAA(aaaa) => Some((IpAddr::V6(aaaa.0), record.ttl())),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl HostLookup for CustomServerLookup {
    async fn lookup(&self, hostname: &str, family: AddressFamily) -> Result<Resolution, DnsError> {
        // Both families are queried in parallel for Any; one failing is fine
        // as long as the other produced addresses.
        let outcomes = match family {
            AddressFamily::V4 => vec![self.query(hostname, RecordType::A).await],
            AddressFamily::V6 => vec![self.query(hostname, RecordType::AAAA).await],
            AddressFamily::Any => {
                let (v4, v6) = tokio::join!(
                    self.query(hostname, RecordType::A),
                    self.query(hostname, RecordType::AAAA)
                );
                vec![v4, v6]
            }
        };

        let mut addresses = Vec::new();
        let mut min_ttl: Option<u32> = None;
        let mut last_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(records) => {
                    for (ip, ttl) in records {
                        addresses.push(ResolvedAddress::from(ip));
                        min_ttl = Some(min_ttl.map_or(ttl, |current| current.min(ttl)));
                    }
                }
                Err(reason) => last_error = Some(reason),
            }
        }

        if addresses.is_empty() {
            return Err(match last_error {
                Some(reason) => DnsError::Lookup {
                    host: hostname.to_string(),
                    reason,
                },
                None => DnsError::NoAddresses(hostname.to_string()),
            });
        }
        Ok(Resolution {
            addresses,
            ttl_seconds: min_ttl,
        })
    }
}

struct CacheEntry {
    addresses: Vec<ResolvedAddress>,
    expires_at: Instant,
}

pub struct DnsCacheResolver {
    servers_signature: String,
    system: Arc<dyn HostLookup>,
    custom: Option<Arc<dyn HostLookup>>,
    shared: Option<Arc<dyn SharedDnsCache>>,
    entries: DashMap<DnsCacheKey, CacheEntry>,
    in_flight: async_singleflight::Group<String, Vec<ResolvedAddress>, DnsError>,
}

impl DnsCacheResolver {
    /// `custom` is consulted only when `servers` is non-empty.
    pub fn new(servers: &[String], system: Arc<dyn HostLookup>, custom: Option<Arc<dyn HostLookup>>) -> Self {
        let servers_signature = if servers.is_empty() {
            SYSTEM_SIGNATURE.to_string()
        } else {
            servers.join(",")
        };
        Self {
            servers_signature,
            system,
            custom: custom.filter(|_| !servers.is_empty()),
            shared: None,
            entries: DashMap::new(),
            in_flight: async_singleflight::Group::new(),
        }
    }

    #[must_use]
    pub fn with_shared_cache(mut self, shared: Arc<dyn SharedDnsCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Builds the production resolver from poller settings. A shared tier that
    /// cannot even be configured is logged and skipped.
    pub fn from_settings(settings: &DnsCacheSettings) -> Result<Self, DnsError> {
        let custom: Option<Arc<dyn HostLookup>> = if settings.servers.is_empty() {
            None
        } else {
            Some(Arc::new(CustomServerLookup::new(&settings.servers)?))
        };
        let mut resolver = Self::new(&settings.servers, Arc::new(SystemLookup), custom);

        if let Some(url) = settings.redis_url.as_deref().filter(|u| !u.is_empty()) {
            match RedisDnsCache::new(url, settings.redis_prefix.clone()) {
                Ok(cache) => resolver = resolver.with_shared_cache(Arc::new(cache)),
                Err(e) => warn!(error = %e, "Shared DNS cache disabled: invalid Redis URL."),
            }
        }
        Ok(resolver)
    }

    pub fn servers_signature(&self) -> &str {
        &self.servers_signature
    }

    fn lookup_for(&self, hostname: &str) -> &dyn HostLookup {
        match &self.custom {
            Some(custom) if !is_local_name(hostname) => custom.as_ref(),
            _ => self.system.as_ref(),
        }
    }

    pub async fn resolve(
        &self,
        hostname: &str,
        family: AddressFamily,
        options: DnsCacheOptions,
    ) -> Result<Vec<ResolvedAddress>, DnsError> {
        let trimmed = hostname.trim().trim_start_matches('[').trim_end_matches(']');
        if trimmed.is_empty() {
            return Err(DnsError::MissingHostname);
        }
        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(vec![ip.into()]);
        }
        let host = trimmed.to_ascii_lowercase();
        let lookup = self.lookup_for(&host);

        if !options.caching_enabled() {
            return Ok(lookup.lookup(&host, family).await?.addresses);
        }
        let max_ttl = u32::try_from(options.max_ttl_seconds).unwrap_or(u32::MAX);

        let key = DnsCacheKey::new(&self.servers_signature, family, &host);
        if let Some(addresses) = self.fresh_entry(&key) {
            return Ok(addresses);
        }

        let flight_key = key.as_str().to_string();
        self.in_flight
            .work(&flight_key, self.fill(&key, &host, family, max_ttl, lookup))
            .await
            .map_err(|e| e.unwrap_or_else(|| DnsError::Abandoned(host.clone())))
    }

    async fn fill(
        &self,
        key: &DnsCacheKey,
        host: &str,
        family: AddressFamily,
        max_ttl: u32,
        lookup: &dyn HostLookup,
    ) -> Result<Vec<ResolvedAddress>, DnsError> {
        if let Some(addresses) = self.fresh_entry(key) {
            return Ok(addresses);
        }

        if let Some(shared) = &self.shared {
            match shared.get(key.as_str()).await {
                Ok(Some(entry)) => {
                    debug!(key = %key, ttl_seconds = entry.ttl_seconds, "DNS shared cache hit.");
                    self.store_local(key, entry.addresses.clone(), entry.ttl_seconds);
                    return Ok(entry.addresses);
                }
                Ok(None) => {}
                Err(e) => debug!(key = %key, error = %e, "DNS shared cache read failed; treating as miss."),
            }
        }

        let resolution = lookup.lookup(host, family).await?;
        let ttl = effective_ttl(resolution.ttl_seconds, max_ttl);
        self.store_local(key, resolution.addresses.clone(), ttl);

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.put(key.as_str(), &resolution.addresses, ttl).await {
                debug!(key = %key, error = %e, "DNS shared cache write failed; ignoring.");
            }
        }
        Ok(resolution.addresses)
    }

    fn fresh_entry(&self, key: &DnsCacheKey) -> Option<Vec<ResolvedAddress>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.addresses.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    fn store_local(&self, key: &DnsCacheKey, addresses: Vec<ResolvedAddress>, ttl_seconds: u32) {
        self.entries.insert(
            key.clone(),
            CacheEntry {
                addresses,
                expires_at: Instant::now() + Duration::from_secs(u64::from(ttl_seconds)),
            },
        );
    }

    /// Drops expired in-process entries.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

fn is_local_name(hostname: &str) -> bool {
    hostname == "localhost" || hostname.ends_with(".local")
}

/// Routes `reqwest` connections through the cache.
pub struct CachedDnsResolve {
    resolver: Arc<DnsCacheResolver>,
    options: DnsCacheOptions,
}

impl CachedDnsResolve {
    pub fn new(resolver: Arc<DnsCacheResolver>, options: DnsCacheOptions) -> Self {
        Self { resolver, options }
    }
}

impl reqwest::dns::Resolve for CachedDnsResolve {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let resolver = Arc::clone(&self.resolver);
        let options = self.options;
        Box::pin(async move {
            let addresses = resolver
                .resolve(name.as_str(), AddressFamily::Any, options)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            let socket_addrs: Vec<SocketAddr> = addresses
                .into_iter()
                .map(|a| SocketAddr::new(a.address, 0))
                .collect();
            let addrs: reqwest::dns::Addrs = Box::new(socket_addrs.into_iter());
            Ok(addrs)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::CountingLookup;
    use super::*;
    use crate::poller_modules::shared_cache::SharedEntry;
    use crate::poller_modules::shared_cache::testing::{MemorySharedCache, UnreachableSharedCache};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn custom_resolver(lookup: Arc<CountingLookup>) -> DnsCacheResolver {
        DnsCacheResolver::new(
            &["10.0.0.53".to_string()],
            Arc::new(CountingLookup::new(vec![ip("127.0.0.1")], None)),
            Some(lookup),
        )
    }

    #[test]
    fn test_effective_ttl() {
        assert_eq!(effective_ttl(Some(30), 60), 30);
        assert_eq!(effective_ttl(Some(300), 60), 60);
        assert_eq!(effective_ttl(None, 60), 60);
        assert_eq!(effective_ttl(Some(0), 60), 1);
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(
            DnsCacheKey::new("system", AddressFamily::Any, "Example.COM").as_str(),
            "system|0|example.com"
        );
        assert_eq!(
            DnsCacheKey::new("1.1.1.1,8.8.8.8", AddressFamily::V6, "a.b").as_str(),
            "1.1.1.1,8.8.8.8|6|a.b"
        );
    }

    #[test]
    fn test_options_from_config() {
        let defaults = DnsCacheOptions::from_config(&Map::new());
        assert_eq!(defaults.max_ttl_seconds, 60);
        assert!(defaults.caching_enabled());

        let config = json!({"pollerDnsCacheMaxTtlSeconds": "0"});
        assert!(!DnsCacheOptions::from_config(config.as_object().unwrap()).caching_enabled());

        let config = json!({"pollerDnsCacheDisabled": true, "pollerDnsCacheMaxTtlSeconds": 30});
        let options = DnsCacheOptions::from_config(config.as_object().unwrap());
        assert!(options.disabled);
        assert_eq!(options.max_ttl_seconds, 30);
    }

    #[test]
    fn test_parse_server_addr() {
        assert_eq!(parse_server_addr("1.1.1.1").unwrap(), "1.1.1.1:53".parse().unwrap());
        assert_eq!(parse_server_addr("9.9.9.9:5353").unwrap(), "9.9.9.9:5353".parse().unwrap());
        assert_eq!(parse_server_addr("[::1]").unwrap(), "[::1]:53".parse().unwrap());
        assert!(parse_server_addr("dns.google").is_err());
    }

    #[tokio::test]
    async fn test_literal_ip_skips_lookup() {
        let lookup = Arc::new(CountingLookup::new(vec![ip("192.0.2.1")], Some(30)));
        let resolver = custom_resolver(lookup.clone());
        let addresses = resolver
            .resolve("203.0.113.9", AddressFamily::Any, DnsCacheOptions::default())
            .await
            .unwrap();
        assert_eq!(addresses, vec![ResolvedAddress::from(ip("203.0.113.9"))]);
        assert_eq!(addresses[0].family, 4);
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_hostname_rejected() {
        let resolver = custom_resolver(Arc::new(CountingLookup::new(vec![], None)));
        assert_eq!(
            resolver
                .resolve("  ", AddressFamily::Any, DnsCacheOptions::default())
                .await,
            Err(DnsError::MissingHostname)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_lookup() {
        let mut inner = CountingLookup::new(vec![ip("192.0.2.10")], Some(30));
        inner.delay = Duration::from_millis(200);
        let lookup = Arc::new(inner);
        let resolver = Arc::new(custom_resolver(lookup.clone()));

        let calls = (0..8).map(|_| {
            let resolver = resolver.clone();
            async move {
                resolver
                    .resolve("api.example.com", AddressFamily::Any, DnsCacheOptions::default())
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(lookup.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), vec![ResolvedAddress::from(ip("192.0.2.10"))]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_reused_until_expiry() {
        let lookup = Arc::new(CountingLookup::new(vec![ip("192.0.2.20")], Some(5)));
        let resolver = custom_resolver(lookup.clone());
        let options = DnsCacheOptions::default();

        resolver.resolve("svc.example.com", AddressFamily::Any, options).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        resolver.resolve("svc.example.com", AddressFamily::Any, options).await.unwrap();
        assert_eq!(lookup.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        resolver.resolve("SVC.example.com", AddressFamily::Any, options).await.unwrap();
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_ttl_capped_by_max_ttl() {
        let lookup = Arc::new(CountingLookup::new(vec![ip("192.0.2.21")], Some(3600)));
        let resolver = custom_resolver(lookup.clone());
        let options = DnsCacheOptions {
            max_ttl_seconds: 10,
            disabled: false,
        };

        resolver.resolve("long.example.com", AddressFamily::Any, options).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        resolver.resolve("long.example.com", AddressFamily::Any, options).await.unwrap();
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_resolves_live() {
        let lookup = Arc::new(CountingLookup::new(vec![ip("192.0.2.30")], Some(300)));
        let shared = Arc::new(MemorySharedCache::default());
        let resolver = custom_resolver(lookup.clone()).with_shared_cache(shared.clone());
        let options = DnsCacheOptions {
            max_ttl_seconds: 60,
            disabled: true,
        };

        for _ in 0..3 {
            resolver.resolve("nocache.example.com", AddressFamily::Any, options).await.unwrap();
        }
        assert_eq!(lookup.calls(), 3);
        assert_eq!(shared.gets.load(Ordering::SeqCst), 0);
        assert_eq!(shared.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shared_tier_hit_avoids_live_lookup() {
        let lookup = Arc::new(CountingLookup::new(vec![ip("192.0.2.40")], Some(30)));
        let shared = Arc::new(MemorySharedCache::default());
        shared.entries.lock().unwrap().insert(
            "10.0.0.53|0|shared.example.com".to_string(),
            SharedEntry {
                addresses: vec![ResolvedAddress::from(ip("198.51.100.7"))],
                ttl_seconds: 20,
            },
        );
        let resolver = custom_resolver(lookup.clone()).with_shared_cache(shared.clone());

        let first = resolver
            .resolve("shared.example.com", AddressFamily::Any, DnsCacheOptions::default())
            .await
            .unwrap();
        let second = resolver
            .resolve("shared.example.com", AddressFamily::Any, DnsCacheOptions::default())
            .await
            .unwrap();

        assert_eq!(first, vec![ResolvedAddress::from(ip("198.51.100.7"))]);
        assert_eq!(first, second);
        assert_eq!(lookup.calls(), 0);
        // Second call served from the in-process tier.
        assert_eq!(shared.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_live_lookup_populates_shared_tier() {
        let lookup = Arc::new(CountingLookup::new(vec![ip("192.0.2.50")], Some(30)));
        let shared = Arc::new(MemorySharedCache::default());
        let resolver = custom_resolver(lookup.clone()).with_shared_cache(shared.clone());

        resolver
            .resolve("fresh.example.com", AddressFamily::V4, DnsCacheOptions::default())
            .await
            .unwrap();

        let entries = shared.entries.lock().unwrap();
        let entry = entries.get("10.0.0.53|4|fresh.example.com").unwrap();
        assert_eq!(entry.ttl_seconds, 30);
        assert_eq!(entry.addresses, vec![ResolvedAddress::from(ip("192.0.2.50"))]);
    }

    #[tokio::test]
    async fn test_unreachable_shared_tier_is_a_miss() {
        let lookup = Arc::new(CountingLookup::new(vec![ip("192.0.2.60")], Some(30)));
        let resolver = custom_resolver(lookup.clone()).with_shared_cache(Arc::new(UnreachableSharedCache));

        let addresses = resolver
            .resolve("down.example.com", AddressFamily::Any, DnsCacheOptions::default())
            .await
            .unwrap();
        assert_eq!(addresses, vec![ResolvedAddress::from(ip("192.0.2.60"))]);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_local_names_use_system_lookup() {
        let system = Arc::new(CountingLookup::new(vec![ip("127.0.0.1")], None));
        let custom = Arc::new(CountingLookup::new(vec![ip("192.0.2.70")], Some(30)));
        let resolver = DnsCacheResolver::new(&["10.0.0.53".to_string()], system.clone(), Some(custom.clone()));

        resolver
            .resolve("printer.local", AddressFamily::Any, DnsCacheOptions::default())
            .await
            .unwrap();
        resolver
            .resolve("localhost", AddressFamily::Any, DnsCacheOptions::default())
            .await
            .unwrap();
        assert_eq!(system.calls(), 2);
        assert_eq!(custom.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_servers_uses_system_signature() {
        let system = Arc::new(CountingLookup::new(vec![ip("192.0.2.80")], None));
        let custom = Arc::new(CountingLookup::new(vec![ip("192.0.2.81")], Some(30)));
        let resolver = DnsCacheResolver::new(&[], system.clone(), Some(custom.clone()));
        assert_eq!(resolver.servers_signature(), "system");

        resolver
            .resolve("example.org", AddressFamily::Any, DnsCacheOptions::default())
            .await
            .unwrap();
        assert_eq!(system.calls(), 1);
        assert_eq!(custom.calls(), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_cached() {
        let mut inner = CountingLookup::new(vec![], None);
        inner.fail = true;
        let lookup = Arc::new(inner);
        let resolver = custom_resolver(lookup.clone());

        for _ in 0..2 {
            let err = resolver
                .resolve("broken.example.com", AddressFamily::Any, DnsCacheOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, DnsError::Lookup { .. }));
        }
        assert_eq!(lookup.calls(), 2);
    }
}
