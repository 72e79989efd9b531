//! Ephemeral in-memory CA
//!
//! Generates a fresh ECDSA P-256 root and intermediate at construction.
//! Keys live in process memory and are lost on restart; issued leaves chain
//! to a root nobody else has ever seen. Development and test use only.

use async_trait::async_trait;
use core::str::FromStr;
use rand::rngs::OsRng;
use spki::EncodePublicKey;
use x509_cert::name::Name;

use super::local::{build_ca_certificate, validity_years, CaCertParams, LocalIssuer};
use super::{BackendError, CaChain, SigningBackend};
use crate::template::CertificateTemplate;

const ROOT_SUBJECT: &str = "CN=signet-ca ephemeral root,O=signet-ca";
const INTERMEDIATE_SUBJECT: &str = "CN=signet-ca ephemeral intermediate,O=signet-ca";

/// In-memory root + intermediate, generated once per process.
pub struct EphemeralCa {
    issuer: LocalIssuer,
}

impl EphemeralCa {
    /// Generate a fresh hierarchy.
    pub fn new() -> Result<Self, BackendError> {
        let root_key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let intermediate_key = p256::ecdsa::SigningKey::random(&mut OsRng);

        let root_name = name(ROOT_SUBJECT)?;
        let intermediate_name = name(INTERMEDIATE_SUBJECT)?;

        let root_spki = spki_der(&root_key)?;
        let intermediate_spki = spki_der(&intermediate_key)?;

        let root_der = build_ca_certificate(
            &CaCertParams {
                subject: &root_name,
                issuer: &root_name,
                spki_der: &root_spki,
                path_len: 1,
                validity: validity_years(10)?,
                issuer_key_id: None,
            },
            &root_key,
        )?;
        let root_key_id = crate::template::key_identifier(&root_spki)
            .map_err(|e| BackendError::SigningFailed(e.to_string()))?;
        let intermediate_der = build_ca_certificate(
            &CaCertParams {
                subject: &intermediate_name,
                issuer: &root_name,
                spki_der: &intermediate_spki,
                path_len: 0,
                validity: validity_years(3)?,
                issuer_key_id: Some(&root_key_id),
            },
            &root_key,
        )?;

        // The root key is dropped here; only the intermediate signs leaves.
        let chain = CaChain::new(vec![intermediate_der, root_der])?;
        Ok(Self {
            issuer: LocalIssuer::new(intermediate_key, chain)?,
        })
    }
}

fn name(subject: &str) -> Result<Name, BackendError> {
    Name::from_str(subject).map_err(|e| BackendError::SigningFailed(e.to_string()))
}

fn spki_der(key: &p256::ecdsa::SigningKey) -> Result<Vec<u8>, BackendError> {
    Ok(key
        .verifying_key()
        .to_public_key_der()
        .map_err(|e| BackendError::SigningFailed(e.to_string()))?
        .as_bytes()
        .to_vec())
}

#[async_trait]
impl SigningBackend for EphemeralCa {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError> {
        self.issuer.sign_template(template)
    }

    fn chain(&self) -> &CaChain {
        self.issuer.chain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_two_deep_with_root_last() {
        let ca = EphemeralCa::new().unwrap();
        assert_eq!(ca.chain().certs().len(), 2);
        let (_, root) =
            x509_parser::parse_x509_certificate(ca.chain().root_public_bytes()).unwrap();
        assert!(root.is_ca());
        assert_eq!(root.issuer(), root.subject());
        let (_, intermediate) =
            x509_parser::parse_x509_certificate(ca.chain().signer()).unwrap();
        assert_eq!(intermediate.issuer(), root.subject());
    }

    #[test]
    fn two_instances_share_nothing() {
        let a = EphemeralCa::new().unwrap();
        let b = EphemeralCa::new().unwrap();
        assert_ne!(a.chain().root_public_bytes(), b.chain().root_public_bytes());
    }
}
