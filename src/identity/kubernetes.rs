//! Kubernetes service-account principal extraction
//!
//! Projected service-account tokens carry a `kubernetes.io` claim object
//! with the namespace and service-account name; legacy tokens encode the
//! same in `sub` as `system:serviceaccount:<namespace>:<name>`.

use serde_json::Value;

use super::{CertExtension, ExtensionSet, ExtractError, SubjectAltName};
use crate::oidc::Claims;

/// A Kubernetes service account.
#[derive(Debug, Clone)]
pub struct KubernetesPrincipal {
    /// `{namespace}/{service_account}`; also the challenge value.
    pub name: String,
    /// Namespace of the service account.
    pub namespace: String,
    /// Service account name.
    pub service_account: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract(claims: &Claims) -> Result<KubernetesPrincipal, ExtractError> {
    let (namespace, service_account) = match claims.raw.get("kubernetes.io") {
        Some(Value::Object(k8s)) => {
            let namespace = k8s
                .get("namespace")
                .and_then(Value::as_str)
                .ok_or_else(|| ExtractError::MissingRequiredClaim("kubernetes.io.namespace".into()))?;
            let service_account = k8s
                .get("serviceaccount")
                .and_then(|sa| sa.get("name"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ExtractError::MissingRequiredClaim("kubernetes.io.serviceaccount.name".into())
                })?;
            (namespace.to_string(), service_account.to_string())
        }
        _ => parse_legacy_subject(&claims.subject)?,
    };

    Ok(KubernetesPrincipal {
        name: format!("{namespace}/{service_account}"),
        namespace,
        service_account,
        issuer: claims.issuer.clone(),
    })
}

fn parse_legacy_subject(subject: &str) -> Result<(String, String), ExtractError> {
    let mut parts = subject.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("system"), Some("serviceaccount"), Some(ns), Some(name), None)
            if !ns.is_empty() && !name.is_empty() =>
        {
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(ExtractError::InvalidClaims(
            "sub is not a service-account identity".into(),
        )),
    }
}

impl KubernetesPrincipal {
    /// A single URI SAN naming the service account.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(format!(
            "https://kubernetes.io/namespaces/{}/serviceaccounts/{}",
            self.namespace, self.service_account
        ))]
    }

    /// Issuer provenance only.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        Ok(set.build())
    }
}
