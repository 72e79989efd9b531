//! Principals: typed identities derived from verified OIDC claims
//!
//! One extractor per issuer type. Extraction is pure: `(claims, descriptor)`
//! in, a `Principal` out. The principal carries everything the template
//! builder needs to shape a certificate: the stable identity `name` (also
//! the value a signed-challenge proof must cover), the ordered typed SANs,
//! and the ordered provenance extensions under the `1.3.6.1.4.1.57264.1.*`
//! arc.

pub mod ci;
pub mod email;
pub mod github;
pub mod kubernetes;
pub mod oids;
pub mod spiffe;
pub mod uri;
pub mod username;

use der::oid::ObjectIdentifier;
use thiserror::Error;

use crate::oidc::{Claims, IssuerDescriptor, IssuerType};

pub use ci::{
    BuildkiteJobPrincipal, ChainguardPrincipal, CodefreshWorkflowPrincipal,
    GitlabPipelinePrincipal,
};
pub use email::EmailPrincipal;
pub use github::GithubWorkflowPrincipal;
pub use kubernetes::KubernetesPrincipal;
pub use spiffe::SpiffePrincipal;
pub use uri::UriPrincipal;
pub use username::UsernamePrincipal;

/// A typed subject alternative name, in certificate order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAltName {
    /// rfc822Name.
    Email(String),
    /// uniformResourceIdentifier.
    Uri(String),
    /// dNSName.
    Dns(String),
    /// otherName with an OID-tagged UTF-8 payload.
    OtherName {
        /// The otherName type-id.
        type_id: ObjectIdentifier,
        /// The UTF-8 payload carried in the `[0] EXPLICIT UTF8String`.
        value: String,
    },
}

/// One X.509 extension to stamp into the certificate, value bytes ready to
/// be wrapped into `extnValue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertExtension {
    /// Extension OID.
    pub oid: ObjectIdentifier,
    /// Extension value: raw UTF-8 for the legacy arc entries, DER for the
    /// rest.
    pub value: Vec<u8>,
    /// Criticality flag.
    pub critical: bool,
}

/// Principal extraction errors.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A claim was present but unusable.
    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    /// A claim the issuer type requires was absent.
    #[error("missing required claim: {0}")]
    MissingRequiredClaim(String),

    /// The subject falls outside the configured domain.
    #[error("domain mismatch: {0}")]
    DomainMismatch(String),

    /// `email_verified` was absent or false.
    #[error("email is not verified")]
    UnverifiedEmail,
}

/// The identity bound into a certificate, one case per issuer type.
#[derive(Debug, Clone)]
pub enum Principal {
    /// A human, identified by verified email.
    Email(EmailPrincipal),
    /// A workload with a SPIFFE ID.
    Spiffe(SpiffePrincipal),
    /// A GitHub Actions workflow run.
    GithubWorkflow(Box<GithubWorkflowPrincipal>),
    /// A Kubernetes service account.
    Kubernetes(KubernetesPrincipal),
    /// A subject URI under a configured domain.
    Uri(UriPrincipal),
    /// A bare username scoped to a configured domain.
    Username(UsernamePrincipal),
    /// A Buildkite job.
    BuildkiteJob(BuildkiteJobPrincipal),
    /// A GitLab CI pipeline.
    GitlabPipeline(Box<GitlabPipelinePrincipal>),
    /// A Codefresh workflow.
    CodefreshWorkflow(CodefreshWorkflowPrincipal),
    /// A Chainguard workload identity.
    Chainguard(ChainguardPrincipal),
}

impl Principal {
    /// Derive a principal from verified claims according to the descriptor's
    /// issuer type.
    pub fn extract(
        claims: &Claims,
        descriptor: &IssuerDescriptor,
    ) -> Result<Self, ExtractError> {
        match descriptor.issuer_type {
            IssuerType::Email => email::extract(claims).map(Principal::Email),
            IssuerType::Spiffe => spiffe::extract(claims, descriptor).map(Principal::Spiffe),
            IssuerType::GithubWorkflow => github::extract(claims)
                .map(Box::new)
                .map(Principal::GithubWorkflow),
            IssuerType::Kubernetes => kubernetes::extract(claims).map(Principal::Kubernetes),
            IssuerType::Uri => uri::extract(claims, descriptor).map(Principal::Uri),
            IssuerType::Username => username::extract(claims, descriptor).map(Principal::Username),
            IssuerType::BuildkiteJob => ci::extract_buildkite(claims).map(Principal::BuildkiteJob),
            IssuerType::GitlabPipeline => ci::extract_gitlab(claims)
                .map(Box::new)
                .map(Principal::GitlabPipeline),
            IssuerType::CodefreshWorkflow => {
                ci::extract_codefresh(claims).map(Principal::CodefreshWorkflow)
            }
            IssuerType::Chainguard => ci::extract_chainguard(claims).map(Principal::Chainguard),
        }
    }

    /// The stable identity string. This is also the challenge value a
    /// signed-proof must cover, compared byte-exact as UTF-8.
    pub fn name(&self) -> &str {
        match self {
            Self::Email(p) => &p.email,
            Self::Spiffe(p) => &p.spiffe_id,
            Self::GithubWorkflow(p) => &p.subject,
            Self::Kubernetes(p) => &p.name,
            Self::Uri(p) => &p.subject_uri,
            Self::Username(p) => &p.username,
            Self::BuildkiteJob(p) => &p.subject,
            Self::GitlabPipeline(p) => &p.subject,
            Self::CodefreshWorkflow(p) => &p.subject,
            Self::Chainguard(p) => &p.subject,
        }
    }

    /// The issuer URL recorded in the provenance extensions.
    pub fn issuer(&self) -> &str {
        match self {
            Self::Email(p) => &p.issuer,
            Self::Spiffe(p) => &p.issuer,
            Self::GithubWorkflow(p) => &p.issuer,
            Self::Kubernetes(p) => &p.issuer,
            Self::Uri(p) => &p.issuer,
            Self::Username(p) => &p.issuer,
            Self::BuildkiteJob(p) => &p.issuer,
            Self::GitlabPipeline(p) => &p.issuer,
            Self::CodefreshWorkflow(p) => &p.issuer,
            Self::Chainguard(p) => &p.issuer,
        }
    }

    /// Ordered typed SANs for the certificate.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        match self {
            Self::Email(p) => p.subject_alt_names(),
            Self::Spiffe(p) => p.subject_alt_names(),
            Self::GithubWorkflow(p) => p.subject_alt_names(),
            Self::Kubernetes(p) => p.subject_alt_names(),
            Self::Uri(p) => p.subject_alt_names(),
            Self::Username(p) => p.subject_alt_names(),
            Self::BuildkiteJob(p) => p.subject_alt_names(),
            Self::GitlabPipeline(p) => p.subject_alt_names(),
            Self::CodefreshWorkflow(p) => p.subject_alt_names(),
            Self::Chainguard(p) => p.subject_alt_names(),
        }
    }

    /// Whether the SAN extension must be marked critical. True only when the
    /// SAN is the sole subject identifier in otherName form, since no
    /// non-SAN subject is present.
    pub fn san_critical(&self) -> bool {
        matches!(self, Self::Username(_))
    }

    /// Ordered provenance extensions.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        match self {
            Self::Email(p) => p.extensions(),
            Self::Spiffe(p) => p.extensions(),
            Self::GithubWorkflow(p) => p.extensions(),
            Self::Kubernetes(p) => p.extensions(),
            Self::Uri(p) => p.extensions(),
            Self::Username(p) => p.extensions(),
            Self::BuildkiteJob(p) => p.extensions(),
            Self::GitlabPipeline(p) => p.extensions(),
            Self::CodefreshWorkflow(p) => p.extensions(),
            Self::Chainguard(p) => p.extensions(),
        }
    }
}

/// Ordered provenance extension builder shared by the extractors.
#[derive(Debug, Default)]
pub(crate) struct ExtensionSet {
    list: Vec<CertExtension>,
}

impl ExtensionSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Legacy arc entry: raw UTF-8 bytes, non-critical.
    pub(crate) fn raw(&mut self, oid: ObjectIdentifier, value: &str) -> &mut Self {
        self.list.push(CertExtension {
            oid,
            value: value.as_bytes().to_vec(),
            critical: false,
        });
        self
    }

    /// DER `UTF8String` entry, non-critical.
    pub(crate) fn utf8(
        &mut self,
        oid: ObjectIdentifier,
        value: &str,
    ) -> Result<&mut Self, ExtractError> {
        let der = oids::der_utf8(value)
            .map_err(|e| ExtractError::InvalidClaims(format!("unencodable claim value: {e}")))?;
        self.list.push(CertExtension {
            oid,
            value: der,
            critical: false,
        });
        Ok(self)
    }

    /// DER `UTF8String` entry, skipped when the value is absent.
    pub(crate) fn utf8_opt(
        &mut self,
        oid: ObjectIdentifier,
        value: Option<&str>,
    ) -> Result<&mut Self, ExtractError> {
        if let Some(value) = value {
            self.utf8(oid, value)?;
        }
        Ok(self)
    }

    /// Both issuer entries: legacy `.1` raw, then `.8` DER.
    pub(crate) fn issuer(&mut self, issuer: &str) -> Result<&mut Self, ExtractError> {
        self.raw(oids::OID_ISSUER_LEGACY, issuer);
        self.utf8(oids::OID_ISSUER, issuer)
    }

    pub(crate) fn build(self) -> Vec<CertExtension> {
        self.list
    }
}

/// Fetch a required top-level string claim.
pub(crate) fn require_str<'a>(claims: &'a Claims, name: &str) -> Result<&'a str, ExtractError> {
    claims
        .str_claim(name)
        .ok_or_else(|| ExtractError::MissingRequiredClaim(name.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::Utc;

    /// Claims for extractor tests.
    pub(crate) fn claims(issuer: &str, json: serde_json::Value) -> Claims {
        let mut raw = json.as_object().cloned().unwrap_or_default();
        raw.entry("iss".to_string())
            .or_insert_with(|| serde_json::Value::String(issuer.to_string()));
        let subject = raw
            .get("sub")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("subject")
            .to_string();
        Claims {
            issuer: issuer.to_string(),
            subject,
            audience: vec!["sigstore".to_string()],
            expiry: Utc::now() + chrono::Duration::minutes(5),
            raw,
        }
    }

    /// A descriptor for extractor tests.
    pub(crate) fn descriptor(issuer: &str, issuer_type: IssuerType) -> IssuerDescriptor {
        IssuerDescriptor {
            issuer_url: issuer.to_string(),
            is_pattern: false,
            client_ids: vec!["sigstore".to_string()],
            issuer_type,
            spiffe_trust_domain: None,
            subject_domain: None,
            issuer_claim: None,
        }
    }
}
