//! OIDC token verification
//!
//! Establishes who the bearer of an identity token is: resolves the issuer
//! through the registry, checks the token signature against the issuer's
//! JWKS, enforces audience and expiry (30 s clock-skew leeway), and returns
//! the parsed claims together with the descriptor that vouched for them.
//!
//! When a descriptor carries `issuer_claim`, the effective issuer is
//! re-extracted from the named claim after signature verification and the
//! descriptor is re-resolved, so federating issuers can delegate identity
//! shaping to the issuer they front for.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::jwks::JwksCache;
use super::registry::{IssuerDescriptor, RegistryHandle};
use crate::types::Deadline;

/// Allowed leeway on `exp`, in seconds.
const CLOCK_SKEW_LEEWAY_SECS: u64 = 30;

/// Token algorithms this authority accepts.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Verified claims from an OIDC identity token. Request-scoped.
#[derive(Debug, Clone)]
pub struct Claims {
    /// Effective issuer (after `issuer_claim` re-derivation, if configured).
    pub issuer: String,
    /// The `sub` claim.
    pub subject: String,
    /// All `aud` values.
    pub audience: Vec<String>,
    /// Token expiry.
    pub expiry: DateTime<Utc>,
    /// The full claim set.
    pub raw: serde_json::Map<String, Value>,
}

impl Claims {
    /// A top-level string claim.
    pub fn str_claim(&self, name: &str) -> Option<&str> {
        self.raw.get(name).and_then(Value::as_str)
    }

    /// A claim addressed by dotted path (`a.b.c`; leading `$.` accepted).
    pub fn path(&self, selector: &str) -> Option<&Value> {
        let path = selector.strip_prefix("$.").unwrap_or(selector);
        let mut current: Option<&Value> = None;
        for segment in path.split('.') {
            current = match current {
                None => self.raw.get(segment),
                Some(value) => value.get(segment),
            };
            current?;
        }
        current
    }

    /// A string claim addressed by dotted path.
    pub fn path_str(&self, selector: &str) -> Option<&str> {
        self.path(selector).and_then(Value::as_str)
    }
}

/// Token verification errors.
#[derive(Debug, Error)]
pub enum OidcError {
    /// The token is malformed or its signature does not verify.
    #[error("invalid OIDC token: {0}")]
    InvalidToken(String),

    /// No configured issuer matches the token's `iss`.
    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    /// The token's `aud` does not contain a configured client id.
    #[error("audience mismatch")]
    AudienceMismatch,

    /// The token expired (beyond the clock-skew leeway).
    #[error("token expired")]
    Expired,

    /// The issuer's signing keys could not be resolved. Retriable.
    #[error("key resolution failed: {0}")]
    KeyResolutionFailed(String),
}

/// Verifies bearer tokens against the issuer registry and JWKS cache.
pub struct OidcVerifier {
    registry: RegistryHandle,
    jwks: Arc<JwksCache>,
}

impl OidcVerifier {
    /// Verifier over a registry handle and key cache.
    pub fn new(registry: RegistryHandle, jwks: Arc<JwksCache>) -> Self {
        Self { registry, jwks }
    }

    /// Verify a compact-serialized token. On success returns the claims and
    /// the descriptor that will shape the certificate.
    pub async fn verify(
        &self,
        raw_token: &str,
        deadline: &Deadline,
    ) -> Result<(Claims, Arc<IssuerDescriptor>), OidcError> {
        let registry = self.registry.snapshot();

        let header = jsonwebtoken::decode_header(raw_token)
            .map_err(|e| OidcError::InvalidToken(e.to_string()))?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(OidcError::InvalidToken(format!(
                "unsupported token algorithm {:?}",
                header.alg
            )));
        }

        // Registry selection needs `iss` before the signature can be
        // checked; nothing else is read from the unverified payload.
        let unverified_iss = peek_issuer(raw_token)?;
        let descriptor = registry
            .lookup(&unverified_iss)
            .ok_or_else(|| OidcError::UnknownIssuer(unverified_iss.clone()))?;

        let key_set = self.jwks.key_set(&unverified_iss, deadline).await?;
        let jwk = select_key(&key_set, header.kid.as_deref())?;
        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| OidcError::KeyResolutionFailed(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        validation.set_audience(&descriptor.client_ids);
        validation.set_issuer(&[unverified_iss.as_str()]);

        let token_data =
            jsonwebtoken::decode::<serde_json::Map<String, Value>>(raw_token, &decoding_key, &validation)
                .map_err(classify_jwt_error)?;
        let claims = build_claims(unverified_iss, token_data.claims)?;

        // Federating issuers re-derive the effective issuer from a claim and
        // the descriptor is re-resolved against it.
        if let Some(selector) = &descriptor.issuer_claim {
            let effective = claims
                .path_str(selector)
                .ok_or_else(|| {
                    OidcError::InvalidToken(format!("issuer claim {selector} missing"))
                })?
                .to_string();
            let redirected = registry
                .lookup(&effective)
                .ok_or_else(|| OidcError::UnknownIssuer(effective.clone()))?;
            let claims = Claims {
                issuer: effective,
                ..claims
            };
            return Ok((claims, redirected));
        }

        Ok((claims, descriptor))
    }
}

/// Extract `iss` from the (not yet verified) payload.
fn peek_issuer(raw_token: &str) -> Result<String, OidcError> {
    let payload = raw_token
        .split('.')
        .nth(1)
        .ok_or_else(|| OidcError::InvalidToken("not a compact JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| OidcError::InvalidToken("payload is not base64url".into()))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|_| OidcError::InvalidToken("payload is not JSON".into()))?;
    value
        .get("iss")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OidcError::InvalidToken("iss claim missing".into()))
}

fn select_key<'a>(keys: &'a jsonwebtoken::jwk::JwkSet, kid: Option<&str>) -> Result<&'a Jwk, OidcError> {
    let signing_keys = keys
        .keys
        .iter()
        .filter(|k| !matches!(k.algorithm, AlgorithmParameters::OctetKey(_)));
    match kid {
        Some(kid) => signing_keys
            .into_iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .ok_or_else(|| OidcError::KeyResolutionFailed(format!("no key with kid {kid}"))),
        None => {
            let candidates: Vec<_> = signing_keys.collect();
            match candidates.as_slice() {
                [only] => Ok(only),
                [] => Err(OidcError::KeyResolutionFailed("empty key set".into())),
                _ => Err(OidcError::KeyResolutionFailed(
                    "token has no kid and the key set is ambiguous".into(),
                )),
            }
        }
    }
}

fn classify_jwt_error(err: jsonwebtoken::errors::Error) -> OidcError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => OidcError::Expired,
        ErrorKind::InvalidAudience => OidcError::AudienceMismatch,
        ErrorKind::InvalidIssuer => OidcError::UnknownIssuer("issuer changed mid-flight".into()),
        _ => OidcError::InvalidToken(err.to_string()),
    }
}

fn build_claims(
    issuer: String,
    raw: serde_json::Map<String, Value>,
) -> Result<Claims, OidcError> {
    let subject = raw
        .get("sub")
        .and_then(Value::as_str)
        .ok_or_else(|| OidcError::InvalidToken("sub claim missing".into()))?
        .to_string();
    let audience = match raw.get("aud") {
        Some(Value::String(aud)) => vec![aud.clone()],
        Some(Value::Array(auds)) => auds
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => vec![],
    };
    let exp = raw
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| OidcError::InvalidToken("exp claim missing".into()))?;
    let expiry = Utc
        .timestamp_opt(exp, 0)
        .single()
        .ok_or_else(|| OidcError::InvalidToken("exp out of range".into()))?;
    Ok(Claims {
        issuer,
        subject,
        audience,
        expiry,
        raw,
    })
}
