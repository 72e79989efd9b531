//! URI principal extraction
//!
//! `sub` is a URI whose scheme and host must match the issuer's configured
//! subject domain.

use url::Url;

use super::{CertExtension, ExtensionSet, ExtractError, SubjectAltName};
use crate::oidc::{Claims, IssuerDescriptor};

/// A subject identified by a URI under a configured domain.
#[derive(Debug, Clone)]
pub struct UriPrincipal {
    /// The subject URI from `sub`; also the challenge value.
    pub subject_uri: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract(
    claims: &Claims,
    descriptor: &IssuerDescriptor,
) -> Result<UriPrincipal, ExtractError> {
    let domain = descriptor
        .subject_domain
        .as_deref()
        .ok_or_else(|| ExtractError::InvalidClaims("issuer has no subject domain".into()))?;
    let expected = Url::parse(domain)
        .map_err(|_| ExtractError::InvalidClaims("subject domain is not a URL".into()))?;
    let subject = Url::parse(&claims.subject)
        .map_err(|_| ExtractError::InvalidClaims("sub is not a URI".into()))?;

    if subject.scheme() != expected.scheme() {
        return Err(ExtractError::DomainMismatch(format!(
            "subject scheme {} does not match domain scheme {}",
            subject.scheme(),
            expected.scheme()
        )));
    }
    match (subject.host_str(), expected.host_str()) {
        (Some(actual), Some(expected_host)) if actual == expected_host => {}
        (actual, _) => {
            return Err(ExtractError::DomainMismatch(format!(
                "subject host {} is not under the configured domain",
                actual.unwrap_or("<none>")
            )))
        }
    }

    Ok(UriPrincipal {
        subject_uri: claims.subject.clone(),
        issuer: claims.issuer.clone(),
    })
}

impl UriPrincipal {
    /// A single URI SAN carrying the subject URI.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(self.subject_uri.clone())]
    }

    /// Issuer provenance only.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        Ok(set.build())
    }
}
