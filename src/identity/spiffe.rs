//! SPIFFE principal extraction
//!
//! `sub` must be a SPIFFE ID (`spiffe://<trust-domain>/<path>`) whose trust
//! domain equals the one configured on the issuer.

use url::Url;

use super::{CertExtension, ExtensionSet, ExtractError, SubjectAltName};
use crate::oidc::{Claims, IssuerDescriptor};

/// A workload identified by a SPIFFE ID.
#[derive(Debug, Clone)]
pub struct SpiffePrincipal {
    /// The full SPIFFE ID from `sub`; also the challenge value.
    pub spiffe_id: String,
    /// Trust domain component of the ID.
    pub trust_domain: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract(
    claims: &Claims,
    descriptor: &IssuerDescriptor,
) -> Result<SpiffePrincipal, ExtractError> {
    let expected_domain = descriptor
        .spiffe_trust_domain
        .as_deref()
        .ok_or_else(|| ExtractError::InvalidClaims("issuer has no trust domain".into()))?;

    let id = Url::parse(&claims.subject)
        .map_err(|_| ExtractError::InvalidClaims("sub is not a valid SPIFFE ID".into()))?;
    if id.scheme() != "spiffe" {
        return Err(ExtractError::InvalidClaims(format!(
            "sub has scheme {}, expected spiffe",
            id.scheme()
        )));
    }
    let trust_domain = id
        .host_str()
        .ok_or_else(|| ExtractError::InvalidClaims("SPIFFE ID has no trust domain".into()))?;
    if trust_domain != expected_domain {
        return Err(ExtractError::DomainMismatch(format!(
            "SPIFFE ID trust domain {trust_domain} is not {expected_domain}"
        )));
    }

    Ok(SpiffePrincipal {
        spiffe_id: claims.subject.clone(),
        trust_domain: trust_domain.to_string(),
        issuer: claims.issuer.clone(),
    })
}

impl SpiffePrincipal {
    /// A single URI SAN carrying the SPIFFE ID.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(self.spiffe_id.clone())]
    }

    /// Issuer provenance only.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        Ok(set.build())
    }
}
