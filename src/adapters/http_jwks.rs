//! OIDC discovery and JWKS fetching over HTTP
//!
//! Resolves `{issuer}/.well-known/openid-configuration`, follows
//! `jwks_uri`, and reports the `Cache-Control: max-age` of the JWKS
//! response as the cache TTL.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use std::time::Duration;

use crate::oidc::{FetchedKeys, KeySetFetcher, OidcError};

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// `reqwest`-backed JWKS fetcher.
#[derive(Debug, Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
}

impl HttpKeySetFetcher {
    /// Fetcher over a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetcher over an existing client (shared pools, proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpKeySetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self, issuer_url: &str) -> Result<FetchedKeys, OidcError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );
        let discovery: DiscoveryDocument = self
            .client
            .get(&discovery_url)
            .send()
            .await
            .map_err(fetch_error)?
            .error_for_status()
            .map_err(fetch_error)?
            .json()
            .await
            .map_err(fetch_error)?;

        let response = self
            .client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(fetch_error)?
            .error_for_status()
            .map_err(fetch_error)?;
        let ttl = cache_max_age(response.headers());
        let keys: JwkSet = response.json().await.map_err(fetch_error)?;

        tracing::debug!(issuer = %issuer_url, keys = keys.keys.len(), "JWKS fetched");
        Ok(FetchedKeys { keys, ttl })
    }
}

fn fetch_error(err: reqwest::Error) -> OidcError {
    // reqwest errors can embed URLs but never response bodies; safe to
    // surface.
    OidcError::KeyResolutionFailed(err.to_string())
}

/// Parse `Cache-Control: max-age=N` into a TTL.
fn cache_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?;
    value
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|age| age.parse::<u64>().ok())
        .map(Duration::from_secs)
}
