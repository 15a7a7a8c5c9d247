//! # Resolver
//!
//! Name resolution for peer discovery.
//!
//! Targets are `host:port`, `[v6]:port` or a bare host, which gets the
//! configured default port. IP literals are returned as-is; names go through
//! the system resolver with a timeout and the results are cached for
//! `cache_ttl`.
//!
//! ## Usage
//! ```no_run
//! use endpoint_protocol::config::ResolverConfig;
//! use endpoint_protocol::resolver::Resolver;
//!
//! # async fn run() -> endpoint_protocol::Result<()> {
//! let resolver = Resolver::new(ResolverConfig::default());
//! let addrs = resolver.resolve("localhost:8768").await?;
//! let seeds = resolver.resolve_peers(&["10.0.0.1", "peer.example.com:9000"]).await;
//! # Ok(())
//! # }
//! ```

use crate::config::ResolverConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

#[derive(Clone, Debug)]
struct CacheEntry {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
}

#[derive(Clone)]
pub struct Resolver {
    config: ResolverConfig,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

/// Split a target into host and port.
///
/// Brackets around IPv6 hosts are removed.
pub fn split_target(target: &str, default_port: u16) -> Result<(String, u16)> {
    let target = target.trim();
    let invalid = || ProtocolError::ResolveError(target.to_string());

    if target.is_empty() {
        return Err(invalid());
    }

    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail {
            "" => default_port,
            _ => tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .ok_or_else(invalid)?,
        };
        return Ok((host.to_string(), port));
    }

    // Bare IPv6 literals contain colons of their own
    if target.parse::<IpAddr>().is_ok() {
        return Ok((target.to_string(), default_port));
    }

    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| invalid())?;
            if host.is_empty() {
                return Err(invalid());
            }
            Ok((host.to_string(), port))
        }
        None => Ok((target.to_string(), default_port)),
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, target: &str) -> Result<Vec<SocketAddr>> {
        let (host, port) = split_target(target, self.config.default_port)?;

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let key = format!("{host}:{port}");
        if let Some(addrs) = self.lookup_cache(&key).await {
            global_metrics().resolver_cache_hit();
            trace!(target_name = %key, "Resolver cache hit");
            return Ok(addrs);
        }
        global_metrics().resolver_cache_miss();

        let mut addrs: Vec<SocketAddr> = with_timeout_error(
            async {
                let found = tokio::net::lookup_host((host.as_str(), port))
                    .await
                    .map_err(|e| ProtocolError::ResolveError(format!("{key}: {e}")))?;
                Ok(found.collect())
            },
            self.config.lookup_timeout,
        )
        .await?;

        if addrs.is_empty() {
            return Err(ProtocolError::ResolveError(key));
        }

        // Stable sort keeps the system order within each family
        let prefer_ipv4 = self.config.prefer_ipv4;
        addrs.sort_by_key(|addr| addr.is_ipv4() != prefer_ipv4);

        debug!(target_name = %key, count = addrs.len(), "Resolved");
        self.store(key, addrs.clone()).await;
        Ok(addrs)
    }

    /// Resolve every seed concurrently; failures are logged and skipped
    pub async fn resolve_peers<S: AsRef<str>>(&self, targets: &[S]) -> Vec<SocketAddr> {
        let lookups = targets.iter().map(|target| async move {
            let target = target.as_ref();
            match self.resolve(target).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    warn!(seed = %target, error = %e, "Failed to resolve peer");
                    Vec::new()
                }
            }
        });

        let mut seen = HashSet::new();
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .filter(|addr| seen.insert(*addr))
            .collect()
    }

    /// Number of live cache entries
    pub async fn cached(&self) -> usize {
        let cache = self.cache.lock().await;
        cache.values().filter(|e| !self.is_expired(e)).count()
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.lock().await;
        let count = cache.len();
        cache.clear();
        debug!(cleared_count = count, "Resolver cache cleared");
    }

    async fn lookup_cache(&self, key: &str) -> Option<Vec<SocketAddr>> {
        if self.config.cache_ttl.is_zero() {
            return None;
        }

        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if !self.is_expired(entry) => Some(entry.addrs.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    async fn store(&self, key: String, addrs: Vec<SocketAddr>) {
        if self.config.cache_ttl.is_zero() || self.config.max_cache_entries == 0 {
            return;
        }

        let mut cache = self.cache.lock().await;
        cache.retain(|_, entry| !self.is_expired(entry));

        cache.insert(
            key,
            CacheEntry {
                addrs,
                resolved_at: Instant::now(),
            },
        );

        // Evict oldest if we exceed capacity
        while cache.len() > self.config.max_cache_entries {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.resolved_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    cache.remove(&key);
                }
                None => break,
            }
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.resolved_at.elapsed() > self.config.cache_ttl
    }
}
