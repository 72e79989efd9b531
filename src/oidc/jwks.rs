//! JWKS resolution and caching
//!
//! Keys are fetched through the `KeySetFetcher` port (an external
//! collaborator; see `adapters::http_jwks` for the reference implementation)
//! and cached per issuer with the provider-declared TTL. Expired entries are
//! refreshed under per-issuer single-flight: concurrent requests for the
//! same issuer produce one fetch, and the cache lock is never held across
//! the fetch itself.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::verifier::OidcError;
use crate::types::Deadline;

/// A fetched key set plus the TTL the provider declared for it, if any.
#[derive(Debug, Clone)]
pub struct FetchedKeys {
    /// The issuer's current signing keys.
    pub keys: JwkSet,
    /// Provider-declared freshness (e.g. `Cache-Control: max-age`).
    pub ttl: Option<Duration>,
}

/// Port for resolving an issuer's JWKS. Implementations perform OIDC
/// discovery and the JWKS fetch; the core only consumes the result.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Fetch the current key set for `issuer_url`.
    async fn fetch(&self, issuer_url: &str) -> Result<FetchedKeys, OidcError>;
}

/// Static key sets for tests and air-gapped deployments.
#[derive(Debug, Default)]
pub struct StaticKeys {
    sets: HashMap<String, JwkSet>,
}

impl StaticKeys {
    /// Empty set; resolves nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key set for an issuer.
    pub fn insert(mut self, issuer_url: impl Into<String>, keys: JwkSet) -> Self {
        self.sets.insert(issuer_url.into(), keys);
        self
    }
}

#[async_trait]
impl KeySetFetcher for StaticKeys {
    async fn fetch(&self, issuer_url: &str) -> Result<FetchedKeys, OidcError> {
        self.sets
            .get(issuer_url)
            .map(|keys| FetchedKeys {
                keys: keys.clone(),
                ttl: None,
            })
            .ok_or_else(|| OidcError::KeyResolutionFailed("no keys for issuer".into()))
    }
}

struct CacheEntry {
    keys: Arc<JwkSet>,
    expires_at: Instant,
}

/// Per-issuer JWKS cache.
pub struct JwksCache {
    fetcher: Arc<dyn KeySetFetcher>,
    default_ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JwksCache {
    /// Default TTL applied when the provider declares none.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    /// Cache over the given fetcher.
    pub fn new(fetcher: Arc<dyn KeySetFetcher>) -> Self {
        Self::with_default_ttl(fetcher, Self::DEFAULT_TTL)
    }

    /// Cache with a custom fallback TTL.
    pub fn with_default_ttl(fetcher: Arc<dyn KeySetFetcher>, default_ttl: Duration) -> Self {
        Self {
            fetcher,
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Current keys for `issuer_url`, fetched if absent or expired.
    pub async fn key_set(
        &self,
        issuer_url: &str,
        deadline: &Deadline,
    ) -> Result<Arc<JwkSet>, OidcError> {
        if let Some(keys) = self.fresh(issuer_url).await {
            return Ok(keys);
        }

        // Single-flight sentinel per issuer: whoever holds it does the
        // fetch; everyone else waits and re-reads the cache. Only the
        // sentinel is held across the fetch, never the cache lock.
        let sentinel = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(issuer_url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _refreshing = sentinel.lock().await;

        if let Some(keys) = self.fresh(issuer_url).await {
            return Ok(keys);
        }

        let fetched = deadline
            .bound(self.fetcher.fetch(issuer_url))
            .await
            .map_err(|_| OidcError::KeyResolutionFailed("JWKS fetch timed out".into()))??;

        let keys = Arc::new(fetched.keys);
        let ttl = fetched.ttl.unwrap_or(self.default_ttl);
        let mut entries = self.entries.write().await;
        entries.insert(
            issuer_url.to_string(),
            CacheEntry {
                keys: keys.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(keys)
    }

    async fn fresh(&self, issuer_url: &str) -> Option<Arc<JwkSet>> {
        let entries = self.entries.read().await;
        entries
            .get(issuer_url)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.keys.clone())
    }
}
