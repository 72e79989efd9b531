//! Issuer registry
//!
//! Maps a token's `iss` to the configured issuer descriptor. Exact matches
//! win over wildcard (meta) issuers; among wildcard patterns the longest
//! non-wildcard prefix wins, with ties broken by registration order.
//!
//! Pattern semantics: `*` matches one or more characters excluding `/`, so
//! `https://oidc.eks.*.amazonaws.com/id/*` matches every regional EKS
//! cluster issuer but never crosses a path segment. All other characters
//! match literally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{CaConfig, IssuerConfig};

/// The identity flavor an issuer's tokens resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssuerType {
    /// Human identity carried in a verified `email` claim.
    Email,
    /// Workload identity: `sub` is a SPIFFE ID in a configured trust domain.
    Spiffe,
    /// GitHub Actions workflow identity.
    GithubWorkflow,
    /// Kubernetes service account identity.
    Kubernetes,
    /// `sub` is a URI under a configured subject domain.
    Uri,
    /// `sub` is a bare username scoped to a configured subject domain.
    Username,
    /// Buildkite job identity.
    BuildkiteJob,
    /// GitLab CI pipeline identity.
    GitlabPipeline,
    /// Codefresh workflow identity.
    CodefreshWorkflow,
    /// Chainguard workload identity.
    Chainguard,
}

/// A configured issuer, resolved from config into matching-ready form.
#[derive(Debug, Clone)]
pub struct IssuerDescriptor {
    /// The exact issuer URL, or the pattern this descriptor was registered
    /// under for meta issuers.
    pub issuer_url: String,
    /// True when `issuer_url` is a wildcard pattern.
    pub is_pattern: bool,
    /// Accepted `aud` values; the token must carry at least one.
    pub client_ids: Vec<String>,
    /// Identity flavor.
    pub issuer_type: IssuerType,
    /// Required trust domain for `spiffe` issuers.
    pub spiffe_trust_domain: Option<String>,
    /// Required subject domain for `uri` and `username` issuers.
    pub subject_domain: Option<String>,
    /// Optional dotted-path claim selector re-deriving the effective issuer
    /// after signature verification.
    pub issuer_claim: Option<String>,
}

impl IssuerDescriptor {
    fn from_config(issuer_url: String, is_pattern: bool, cfg: &IssuerConfig) -> Self {
        Self {
            issuer_url,
            is_pattern,
            client_ids: cfg.client_id.values(),
            issuer_type: cfg.issuer_type,
            spiffe_trust_domain: cfg.spiffe_trust_domain.clone(),
            subject_domain: cfg.subject_domain.clone(),
            issuer_claim: cfg.issuer_claim.clone(),
        }
    }
}

/// Immutable issuer lookup table. Build once per config load; cheap to clone
/// via `Arc` into in-flight requests.
#[derive(Debug, Default)]
pub struct IssuerRegistry {
    exact: HashMap<String, Arc<IssuerDescriptor>>,
    meta: Vec<Arc<IssuerDescriptor>>,
}

impl IssuerRegistry {
    /// Build a registry from a config snapshot. Meta issuers keep their
    /// registration order, which breaks specificity ties.
    pub fn from_config(config: &CaConfig) -> Self {
        let exact = config
            .oidc_issuers
            .iter()
            .map(|(url, cfg)| {
                let descriptor = IssuerDescriptor::from_config(url.clone(), false, cfg);
                (url.clone(), Arc::new(descriptor))
            })
            .collect();
        let meta = config
            .meta_issuers
            .iter()
            .map(|meta| {
                Arc::new(IssuerDescriptor::from_config(
                    meta.pattern.clone(),
                    true,
                    &meta.issuer,
                ))
            })
            .collect();
        Self { exact, meta }
    }

    /// Look up the descriptor for an issuer URL.
    pub fn lookup(&self, issuer_url: &str) -> Option<Arc<IssuerDescriptor>> {
        if let Some(descriptor) = self.exact.get(issuer_url) {
            return Some(descriptor.clone());
        }
        self.meta
            .iter()
            .enumerate()
            .filter(|(_, d)| glob_match(&d.issuer_url, issuer_url))
            // Earlier registration wins ties on literal prefix length.
            .max_by_key(|(i, d)| (literal_prefix_len(&d.issuer_url), std::cmp::Reverse(*i)))
            .map(|(_, d)| d.clone())
    }

    /// Number of configured issuers, exact plus meta.
    pub fn len(&self) -> usize {
        self.exact.len() + self.meta.len()
    }

    /// True when no issuers are configured.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.meta.is_empty()
    }
}

/// Shared, atomically swappable registry snapshot. In-flight requests keep
/// whatever snapshot they captured at entry; a reload replaces the snapshot
/// for subsequent requests only.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    inner: Arc<RwLock<Arc<IssuerRegistry>>>,
}

impl RegistryHandle {
    /// Wrap a registry for shared use.
    pub fn new(registry: IssuerRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Capture the current snapshot.
    pub fn snapshot(&self) -> Arc<IssuerRegistry> {
        self.inner.read().expect("registry lock poisoned").clone()
    }

    /// Atomically replace the registry with a freshly built one.
    pub fn swap(&self, registry: IssuerRegistry) {
        *self.inner.write().expect("registry lock poisoned") = Arc::new(registry);
    }
}

/// Length of the literal prefix before the first `*`; the whole pattern if
/// it has no wildcard.
fn literal_prefix_len(pattern: &str) -> usize {
    pattern.find('*').unwrap_or(pattern.len())
}

/// Match `input` against `pattern`, where each `*` consumes one or more
/// characters other than `/`.
fn glob_match(pattern: &str, input: &str) -> bool {
    match pattern.find('*') {
        None => pattern == input,
        Some(star) => {
            let literal = &pattern[..star];
            let rest = &pattern[star + 1..];
            let Some(remainder) = input.strip_prefix(literal) else {
                return false;
            };
            // The wildcard must consume at least one character and may not
            // cross a path separator.
            let mut consumed = 0;
            for ch in remainder.chars() {
                if ch == '/' {
                    break;
                }
                consumed += ch.len_utf8();
                if glob_match(rest, &remainder[consumed..]) {
                    return true;
                }
            }
            false
        }
    }
}
