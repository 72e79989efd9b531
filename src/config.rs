//! Configuration
//!
//! Configuration is loaded by an external collaborator and handed to the
//! core as an immutable snapshot; the core never watches files or reloads
//! itself. A reload builds a fresh `IssuerRegistry` from a new snapshot and
//! swaps it atomically (`oidc::RegistryHandle`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::oidc::registry::IssuerType;

/// Top-level authority configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CaConfig {
    /// Exact-match issuers, keyed by issuer URL.
    #[serde(default)]
    pub oidc_issuers: HashMap<String, IssuerConfig>,

    /// Wildcard issuers, in registration order. Order breaks specificity
    /// ties, so this is a list rather than a map.
    #[serde(default)]
    pub meta_issuers: Vec<MetaIssuerConfig>,

    /// Certificate Transparency log. Absent means no CT submission.
    #[serde(default)]
    pub ct: Option<CtConfig>,

    /// Signing backend.
    #[serde(default)]
    pub ca: CaBackendConfig,

    /// Leaf validity policy.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// A single configured OIDC issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IssuerConfig {
    /// Required `aud` value(s); the token must carry at least one.
    pub client_id: ClientId,

    /// Identity flavor tokens from this issuer resolve to.
    #[serde(rename = "type")]
    pub issuer_type: IssuerType,

    /// Trust domain for `spiffe` issuers.
    #[serde(default)]
    pub spiffe_trust_domain: Option<String>,

    /// Subject domain for `uri` and `username` issuers.
    #[serde(default)]
    pub subject_domain: Option<String>,

    /// Dotted-path claim selector re-deriving the effective issuer after
    /// signature verification (e.g. `federated_claims.issuer`). A leading
    /// `$.` is accepted and stripped.
    #[serde(default)]
    pub issuer_claim: Option<String>,
}

/// One accepted audience, or several.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientId {
    /// A single accepted audience.
    One(String),
    /// Any of several accepted audiences.
    Many(Vec<String>),
}

impl ClientId {
    /// The accepted audiences as a list.
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v.clone()],
            Self::Many(vs) => vs.clone(),
        }
    }
}

/// A wildcard issuer entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetaIssuerConfig {
    /// Issuer pattern; `*` matches one or more non-`/` characters.
    pub pattern: String,

    /// Issuer settings shared with exact-match entries.
    #[serde(flatten)]
    pub issuer: IssuerConfig,
}

/// Certificate Transparency log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CtConfig {
    /// Base URL of the log (the `ct/v1/` prefix is appended per call).
    pub url: String,

    /// PEM-encoded public key of the log, used to derive the log id.
    pub public_key: String,

    /// Embed the SCT in the final certificate (default) or return it
    /// detached.
    #[serde(default = "default_embed_sct")]
    pub embed_sct: bool,
}

fn default_embed_sct() -> bool {
    true
}

/// Which signing backend to run, with its parameters.
///
/// Vendor connection details (KMS resource names, PKCS#11 module paths,
/// upstream CA endpoints) belong to the collaborator that constructs the
/// oracle client; the core only needs what it consumes directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case", deny_unknown_fields)]
pub enum CaBackendConfig {
    /// Fresh in-memory root + intermediate per process. Development only.
    #[default]
    Ephemeral,

    /// Persistent chain and signing key on disk.
    File {
        /// PEM chain, signer first, root last.
        chain: PathBuf,
        /// PKCS#8 signing key, optionally encrypted.
        key: PathBuf,
    },

    /// Signing key held by a cloud KMS; the oracle client is injected.
    Kms {
        /// PEM chain certified for the KMS key.
        chain: PathBuf,
    },

    /// Signing key held by a PKCS#11 HSM; the session is injected.
    Pkcs11 {
        /// PEM chain certified for the HSM key.
        chain: PathBuf,
    },

    /// Tink keyset on disk, AEAD-encrypted under a KMS key.
    Tink {
        /// JSON encrypted-keyset file.
        keyset: PathBuf,
        /// PEM chain certified for the keyset's primary key.
        chain: PathBuf,
    },

    /// Issuance delegated to an upstream hosted CA.
    Hosted,
}

/// Leaf validity policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PolicyConfig {
    /// Leaf lifetime in seconds, measured from `now`.
    #[serde(default = "default_lifetime")]
    pub lifetime_seconds: u64,

    /// Backdate applied to `not_before` to absorb clock skew.
    #[serde(default = "default_backdate")]
    pub backdate_seconds: u64,
}

fn default_lifetime() -> u64 {
    600
}

fn default_backdate() -> u64 {
    300
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            lifetime_seconds: default_lifetime(),
            backdate_seconds: default_backdate(),
        }
    }
}

impl PolicyConfig {
    /// Lifetime as a duration.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_seconds)
    }

    /// Backdate as a duration.
    pub fn backdate(&self) -> Duration {
        Duration::from_secs(self.backdate_seconds)
    }
}

impl CaConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: CaConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (url, issuer) in &self.oidc_issuers {
            validate_issuer(url, issuer)?;
        }
        for meta in &self.meta_issuers {
            if !meta.pattern.contains('*') {
                return Err(ConfigError::Invalid(format!(
                    "meta issuer {} has no wildcard; register it as an exact issuer",
                    meta.pattern
                )));
            }
            validate_issuer(&meta.pattern, &meta.issuer)?;
        }
        if let Some(ct) = &self.ct {
            if ct.url.is_empty() {
                return Err(ConfigError::Invalid("CT log URL cannot be empty".into()));
            }
            if ct.public_key.is_empty() {
                return Err(ConfigError::Invalid(
                    "CT log public key cannot be empty".into(),
                ));
            }
        }
        if self.policy.lifetime_seconds == 0 {
            return Err(ConfigError::Invalid(
                "leaf lifetime must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn validate_issuer(url: &str, issuer: &IssuerConfig) -> Result<(), ConfigError> {
    if issuer.client_id.values().iter().any(|c| c.is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "issuer {url} has an empty client-id"
        )));
    }
    match issuer.issuer_type {
        IssuerType::Spiffe if issuer.spiffe_trust_domain.is_none() => Err(ConfigError::Invalid(
            format!("spiffe issuer {url} requires spiffe-trust-domain"),
        )),
        IssuerType::Uri | IssuerType::Username if issuer.subject_domain.is_none() => {
            Err(ConfigError::Invalid(format!(
                "issuer {url} requires subject-domain"
            )))
        }
        _ => Ok(()),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(String),

    /// File was not valid TOML for this schema.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Schema-valid but semantically inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
