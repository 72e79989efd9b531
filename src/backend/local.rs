//! Shared machinery for backends that hold a P-256 signing key in process
//!
//! The ephemeral, file, and Tink backends all end up with a
//! `p256::ecdsa::SigningKey` in memory; everything else about them is how
//! that key got there. This module holds the common issuer state and the
//! TBS assembly/signing helpers, plus the CA-certificate builder the
//! ephemeral backend (and tests) use to mint hierarchies.

use der::asn1::{BitString, Null, OctetString};
use der::oid::ObjectIdentifier;
use der::{Any, Decode, Encode};
use p256::ecdsa::signature::Signer;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier,
};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;

use super::{BackendError, CaChain};
use crate::template::CertificateTemplate;

pub(crate) const OID_ECDSA_WITH_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
pub(crate) const OID_SHA256_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// `ecdsa-with-SHA256`, parameters absent.
pub(crate) fn ecdsa_sha256() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: OID_ECDSA_WITH_SHA256,
        parameters: None,
    }
}

/// `sha256WithRSAEncryption`, parameters NULL as RFC 4055 requires.
pub(crate) fn rsa_sha256() -> Result<AlgorithmIdentifierOwned, BackendError> {
    let null = Null.to_der().map_err(internal)?;
    Ok(AlgorithmIdentifierOwned {
        oid: OID_SHA256_WITH_RSA,
        parameters: Some(Any::from_der(&null).map_err(internal)?),
    })
}

pub(crate) fn internal<E: std::fmt::Display>(err: E) -> BackendError {
    BackendError::SigningFailed(err.to_string())
}

/// Wrap a signed TBS into a DER certificate.
pub(crate) fn assemble_certificate(
    tbs: TbsCertificate,
    signature_algorithm: AlgorithmIdentifierOwned,
    signature: &[u8],
) -> Result<Vec<u8>, BackendError> {
    let certificate = Certificate {
        tbs_certificate: tbs,
        signature_algorithm,
        signature: BitString::from_bytes(signature).map_err(internal)?,
    };
    certificate.to_der().map_err(internal)
}

/// Subject name and key identifier of an issuing certificate, taken from
/// its subjectKeyIdentifier extension when present and recomputed from the
/// key bits otherwise.
pub(crate) fn issuer_identity(cert_der: &[u8]) -> Result<(Name, Vec<u8>), BackendError> {
    let cert = Certificate::from_der(cert_der)
        .map_err(|e| BackendError::KeyNotReady(format!("bad issuing certificate: {e}")))?;
    let tbs = &cert.tbs_certificate;
    let key_id = tbs
        .extensions
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .find(|e| e.extn_id == const_oid::db::rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER)
        .and_then(|e| SubjectKeyIdentifier::from_der(e.extn_value.as_bytes()).ok())
        .map(|ski| ski.0.as_bytes().to_vec());
    let key_id = match key_id {
        Some(id) => id,
        None => {
            let spki_der = tbs.subject_public_key_info.to_der().map_err(internal)?;
            crate::template::key_identifier(&spki_der).map_err(internal)?
        }
    };
    Ok((tbs.subject.clone(), key_id))
}

/// A P-256 issuer held in process memory.
pub(crate) struct LocalIssuer {
    signing_key: p256::ecdsa::SigningKey,
    issuer_name: Name,
    key_id: Vec<u8>,
    chain: CaChain,
}

impl LocalIssuer {
    /// Bind a signing key to the chain whose first certificate certifies
    /// it.
    pub(crate) fn new(
        signing_key: p256::ecdsa::SigningKey,
        chain: CaChain,
    ) -> Result<Self, BackendError> {
        let (issuer_name, key_id) = issuer_identity(chain.signer())?;
        Ok(Self {
            signing_key,
            issuer_name,
            key_id,
            chain,
        })
    }

    pub(crate) fn chain(&self) -> &CaChain {
        &self.chain
    }

    /// Sign a leaf template.
    pub(crate) fn sign_template(
        &self,
        template: &CertificateTemplate,
    ) -> Result<Vec<u8>, BackendError> {
        let tbs = template
            .to_tbs(&self.issuer_name, &ecdsa_sha256(), Some(&self.key_id))
            .map_err(internal)?;
        let tbs_der = tbs.to_der().map_err(internal)?;
        let signature: p256::ecdsa::DerSignature = self.signing_key.sign(&tbs_der);
        assemble_certificate(tbs, ecdsa_sha256(), signature.as_bytes())
    }
}

/// Parameters for minting a CA certificate.
pub(crate) struct CaCertParams<'a> {
    /// Subject of the new certificate.
    pub subject: &'a Name,
    /// Issuer; equal to `subject` for a self-signed root.
    pub issuer: &'a Name,
    /// DER SPKI of the key being certified.
    pub spki_der: &'a [u8],
    /// Path length constraint (1 for roots that sign intermediates, 0 for
    /// intermediates that only sign leaves).
    pub path_len: u8,
    /// Validity window.
    pub validity: Validity,
    /// Key identifier of the issuing key, absent for self-signed roots.
    pub issuer_key_id: Option<&'a [u8]>,
}

/// Mint a CA certificate signed by `signing_key` (the issuer's key).
pub(crate) fn build_ca_certificate(
    params: &CaCertParams<'_>,
    signing_key: &p256::ecdsa::SigningKey,
) -> Result<Vec<u8>, BackendError> {
    let spki = spki::SubjectPublicKeyInfoOwned::from_der(params.spki_der).map_err(internal)?;
    let subject_key_id = crate::template::key_identifier(params.spki_der).map_err(internal)?;

    let mut extensions = vec![
        Extension {
            extn_id: const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS,
            critical: true,
            extn_value: OctetString::new(
                BasicConstraints {
                    ca: true,
                    path_len_constraint: Some(params.path_len),
                }
                .to_der()
                .map_err(internal)?,
            )
            .map_err(internal)?,
        },
        Extension {
            extn_id: const_oid::db::rfc5280::ID_CE_KEY_USAGE,
            critical: true,
            extn_value: OctetString::new(
                KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign)
                    .to_der()
                    .map_err(internal)?,
            )
            .map_err(internal)?,
        },
        Extension {
            extn_id: const_oid::db::rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER,
            critical: false,
            extn_value: OctetString::new(
                OctetString::new(subject_key_id)
                    .map_err(internal)?
                    .to_der()
                    .map_err(internal)?,
            )
            .map_err(internal)?,
        },
    ];
    if let Some(issuer_key_id) = params.issuer_key_id {
        let aki = AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(issuer_key_id).map_err(internal)?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };
        extensions.push(Extension {
            extn_id: const_oid::db::rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER,
            critical: false,
            extn_value: OctetString::new(aki.to_der().map_err(internal)?).map_err(internal)?,
        });
    }

    let mut serial = [0u8; 20];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut serial);
    serial[0] &= 0x7f;

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&serial).map_err(internal)?,
        signature: ecdsa_sha256(),
        issuer: params.issuer.clone(),
        validity: params.validity.clone(),
        subject: params.subject.clone(),
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };
    let tbs_der = tbs.to_der().map_err(internal)?;
    let signature: p256::ecdsa::DerSignature = signing_key.sign(&tbs_der);
    assemble_certificate(tbs, ecdsa_sha256(), signature.as_bytes())
}

/// Validity window spanning `years` from now.
pub(crate) fn validity_years(years: u64) -> Result<Validity, BackendError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(internal)?;
    let not_after = now + std::time::Duration::from_secs(years * 365 * 24 * 60 * 60);
    Ok(Validity {
        not_before: x509_cert::time::Time::UtcTime(
            der::asn1::UtcTime::from_unix_duration(now).map_err(internal)?,
        ),
        not_after: x509_cert::time::Time::UtcTime(
            der::asn1::UtcTime::from_unix_duration(not_after).map_err(internal)?,
        ),
    })
}

/// SHA-256 of a DER TBS, for digest-signing oracles.
pub(crate) fn tbs_digest(tbs_der: &[u8]) -> [u8; 32] {
    Sha256::digest(tbs_der).into()
}
