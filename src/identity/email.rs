//! Email principal extraction
//!
//! The identity is the `email` claim, which must be accompanied by
//! `email_verified = true`. The address becomes an rfc822Name SAN.

use serde_json::Value;

use super::{CertExtension, ExtensionSet, ExtractError, SubjectAltName};
use crate::oidc::Claims;

/// A human identified by a verified email address.
#[derive(Debug, Clone)]
pub struct EmailPrincipal {
    /// The verified address; also the challenge value.
    pub email: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract(claims: &Claims) -> Result<EmailPrincipal, ExtractError> {
    let email = super::require_str(claims, "email")?;
    if !email.contains('@') {
        return Err(ExtractError::InvalidClaims(
            "email claim is not an address".into(),
        ));
    }
    // Providers encode the flag as a bool or as the string "true".
    let verified = match claims.raw.get("email_verified") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    };
    if !verified {
        return Err(ExtractError::UnverifiedEmail);
    }
    Ok(EmailPrincipal {
        email: email.to_string(),
        issuer: claims.issuer.clone(),
    })
}

impl EmailPrincipal {
    /// A single rfc822Name SAN.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Email(self.email.clone())]
    }

    /// Issuer provenance only.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        Ok(set.build())
    }
}
