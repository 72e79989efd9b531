//! PKCS#11-backed CA
//!
//! Same shape as the KMS backend with an HSM session as the cryptographic
//! oracle. The session object wraps the vendor module and is expected to
//! serialize access to the token itself.

use async_trait::async_trait;
use der::Encode;
use x509_cert::name::Name;

use super::kms::OracleAlgorithm;
use super::local::{assemble_certificate, internal, issuer_identity, tbs_digest};
use super::{BackendError, CaChain, SigningBackend};
use crate::template::CertificateTemplate;

/// Port onto a PKCS#11 token session.
#[async_trait]
pub trait Pkcs11Session: Send + Sync {
    /// The algorithm of the token-resident key.
    fn algorithm(&self) -> OracleAlgorithm;

    /// Sign a SHA-256 digest with the token-resident key.
    async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>, BackendError>;
}

/// CA whose key lives on a PKCS#11 HSM.
pub struct Pkcs11Ca {
    session: std::sync::Arc<dyn Pkcs11Session>,
    chain: CaChain,
    issuer_name: Name,
    key_id: Vec<u8>,
}

impl Pkcs11Ca {
    /// Bind an HSM session to the chain certifying its key.
    pub fn new(
        session: std::sync::Arc<dyn Pkcs11Session>,
        chain: CaChain,
    ) -> Result<Self, BackendError> {
        let (issuer_name, key_id) = issuer_identity(chain.signer())?;
        Ok(Self {
            session,
            chain,
            issuer_name,
            key_id,
        })
    }
}

#[async_trait]
impl SigningBackend for Pkcs11Ca {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError> {
        let algorithm = self.session.algorithm().identifier()?;
        let tbs = template
            .to_tbs(&self.issuer_name, &algorithm, Some(&self.key_id))
            .map_err(internal)?;
        let tbs_der = tbs.to_der().map_err(internal)?;
        let signature = self.session.sign_digest(tbs_digest(&tbs_der)).await?;
        assemble_certificate(tbs, algorithm, &signature)
    }

    fn chain(&self) -> &CaChain {
        &self.chain
    }
}
