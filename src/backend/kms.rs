//! Cloud-KMS-backed CA
//!
//! The signing key never leaves the KMS. The backend DER-encodes the
//! TBSCertificate, hashes it, and asks the oracle to sign the digest; the
//! vendor protocol behind the oracle is an external collaborator.

use async_trait::async_trait;
use der::Encode;
use spki::AlgorithmIdentifierOwned;
use x509_cert::name::Name;

use super::local::{
    assemble_certificate, ecdsa_sha256, internal, issuer_identity, rsa_sha256, tbs_digest,
};
use super::{BackendError, CaChain, SigningBackend};
use crate::template::CertificateTemplate;

/// Signature algorithms a digest-signing oracle can hold a key for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleAlgorithm {
    /// ECDSA P-256 over SHA-256; the oracle returns an ASN.1 DER signature.
    EcdsaP256Sha256,
    /// RSA PKCS#1 v1.5 over SHA-256.
    RsaPkcs1Sha256,
}

impl OracleAlgorithm {
    pub(crate) fn identifier(&self) -> Result<AlgorithmIdentifierOwned, BackendError> {
        match self {
            Self::EcdsaP256Sha256 => Ok(ecdsa_sha256()),
            Self::RsaPkcs1Sha256 => rsa_sha256(),
        }
    }
}

/// Port onto a cloud KMS signing key.
#[async_trait]
pub trait KmsSigner: Send + Sync {
    /// The algorithm the held key signs with.
    fn algorithm(&self) -> OracleAlgorithm;

    /// Sign a SHA-256 digest, returning signature bytes in the algorithm's
    /// standard encoding.
    async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>, BackendError>;
}

/// CA whose key lives in a cloud KMS.
pub struct KmsCa {
    signer: std::sync::Arc<dyn KmsSigner>,
    chain: CaChain,
    issuer_name: Name,
    key_id: Vec<u8>,
}

impl KmsCa {
    /// Bind a KMS oracle to the chain certifying its key.
    pub fn new(signer: std::sync::Arc<dyn KmsSigner>, chain: CaChain) -> Result<Self, BackendError> {
        let (issuer_name, key_id) = issuer_identity(chain.signer())?;
        Ok(Self {
            signer,
            chain,
            issuer_name,
            key_id,
        })
    }
}

#[async_trait]
impl SigningBackend for KmsCa {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError> {
        let algorithm = self.signer.algorithm().identifier()?;
        let tbs = template
            .to_tbs(&self.issuer_name, &algorithm, Some(&self.key_id))
            .map_err(internal)?;
        let tbs_der = tbs.to_der().map_err(internal)?;
        let signature = self.signer.sign_digest(tbs_digest(&tbs_der)).await?;
        assemble_certificate(tbs, algorithm, &signature)
    }

    fn chain(&self) -> &CaChain {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::super::local::{build_ca_certificate, validity_years, CaCertParams};
    use super::*;
    use core::str::FromStr;
    use mockall::mock;
    use p256::ecdsa::signature::hazmat::PrehashSigner;
    use rand::rngs::OsRng;
    use spki::EncodePublicKey;
    use std::sync::Arc;
    use x509_cert::name::Name;

    mock! {
        Oracle {}

        #[async_trait]
        impl KmsSigner for Oracle {
            fn algorithm(&self) -> OracleAlgorithm;
            async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>, BackendError>;
        }
    }

    #[tokio::test]
    async fn kms_backend_signs_through_the_digest_oracle() {
        let secret = p256::SecretKey::random(&mut OsRng);
        let signing = p256::ecdsa::SigningKey::from(&secret);
        let name = Name::from_str("CN=kms test root").unwrap();
        let spki = signing
            .verifying_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();
        let cert = build_ca_certificate(
            &CaCertParams {
                subject: &name,
                issuer: &name,
                spki_der: &spki,
                path_len: 0,
                validity: validity_years(1).unwrap(),
                issuer_key_id: None,
            },
            &signing,
        )
        .unwrap();
        let chain = CaChain::new(vec![cert]).unwrap();

        let mut oracle = MockOracle::new();
        oracle
            .expect_algorithm()
            .return_const(OracleAlgorithm::EcdsaP256Sha256);
        let oracle_key = signing.clone();
        oracle.expect_sign_digest().returning(move |digest| {
            let signature: p256::ecdsa::Signature =
                oracle_key.sign_prehash(&digest).expect("prehash sign");
            Ok(signature.to_der().as_bytes().to_vec())
        });

        let ca = KmsCa::new(Arc::new(oracle), chain).unwrap();

        let template = crate::template::CertificateTemplate::build(
            &crate::identity::Principal::Email(crate::identity::EmailPrincipal {
                email: "alice@example.com".into(),
                issuer: "https://accounts.google.com".into(),
            }),
            spki.clone(),
            chrono::Utc::now(),
            &crate::config::PolicyConfig::default(),
        )
        .unwrap();

        let leaf = ca.sign(&template).await.unwrap();
        let (_, parsed) = x509_parser::parse_x509_certificate(&leaf).unwrap();
        let (_, issuer) = x509_parser::parse_x509_certificate(ca.chain().signer()).unwrap();
        parsed.verify_signature(Some(issuer.public_key())).unwrap();
    }
}
