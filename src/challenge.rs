//! Proof-of-possession verification
//!
//! A client proves it holds the private key for the public key it submits,
//! in one of two ways:
//!
//! 1. **CSR path**: the PKCS#10 CSR's embedded signature over its own
//!    `CertificationRequestInfo` must verify against the CSR's public key.
//!    Only the public key is taken from the CSR; its subject and SANs are
//!    ignored.
//! 2. **Signed-challenge path**: a signature over the UTF-8 bytes of the
//!    principal's `name`, compared byte-exact with no normalization.
//!
//! Accepted keys: ECDSA P-256/P-384/P-521, RSA 2048–4096 (PKCS#1 v1.5 and
//! PSS), Ed25519. Everything else is rejected before any signature check.

use der::oid::ObjectIdentifier;
use der::{Decode, Encode};
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use sha2::{Sha256, Sha384, Sha512};
use signature::Verifier;
use spki::SubjectPublicKeyInfoOwned;
use thiserror::Error;
use x509_cert::request::CertReq;

use crate::types::KeyMaterial;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const OID_SECP521R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");
const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const OID_ECDSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
const OID_RSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_RSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const OID_RSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const OID_RSA_PSS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.10");

const MIN_RSA_BITS: usize = 2048;
const MAX_RSA_BITS: usize = 4096;

/// Challenge verification errors.
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// The proof (or CSR self-signature) did not verify, or did not parse.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The key type or algorithm is outside the accepted set.
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    /// The key is of an accepted type but below minimum strength.
    #[error("weak key: {0}")]
    WeakKey(String),
}

/// A parsed, policy-checked subject public key.
#[derive(Clone)]
pub enum SubjectKey {
    /// ECDSA over NIST P-256; proofs hashed with SHA-256.
    EcdsaP256(p256::ecdsa::VerifyingKey),
    /// ECDSA over NIST P-384; proofs hashed with SHA-384.
    EcdsaP384(p384::ecdsa::VerifyingKey),
    /// ECDSA over NIST P-521; proofs hashed with SHA-512.
    EcdsaP521(p521::ecdsa::VerifyingKey),
    /// RSA 2048–4096, PKCS#1 v1.5 or PSS.
    Rsa(rsa::RsaPublicKey),
    /// Ed25519.
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl std::fmt::Debug for SubjectKey {
    // p521::ecdsa::VerifyingKey has no Debug impl, so all variants are
    // rendered by algorithm name rather than deriving per-variant output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubjectKey({})", self.algorithm_name())
    }
}

impl SubjectKey {
    /// Parse a public key from PEM or DER SubjectPublicKeyInfo, rejecting
    /// unsupported and weak keys.
    pub fn parse(content: &[u8]) -> Result<Self, ChallengeError> {
        let der = decode_pem_block(content, &["PUBLIC KEY"])?
            .unwrap_or_else(|| content.to_vec());
        let spki = SubjectPublicKeyInfoOwned::from_der(&der)
            .map_err(|e| ChallengeError::UnsupportedKey(format!("not a public key: {e}")))?;
        Self::from_spki(&spki, &der)
    }

    fn from_spki(
        spki: &SubjectPublicKeyInfoOwned,
        spki_der: &[u8],
    ) -> Result<Self, ChallengeError> {
        let key_bytes = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| ChallengeError::UnsupportedKey("key bits are not octet-aligned".into()))?;
        let algorithm = spki.algorithm.oid;
        if algorithm == OID_EC_PUBLIC_KEY {
            let curve: ObjectIdentifier = spki
                .algorithm
                .parameters
                .as_ref()
                .ok_or_else(|| ChallengeError::UnsupportedKey("EC key has no named curve".into()))?
                .decode_as()
                .map_err(|_| ChallengeError::UnsupportedKey("EC key has no named curve".into()))?;
            if curve == OID_SECP256R1 {
                p256::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(Self::EcdsaP256)
                    .map_err(|e| ChallengeError::UnsupportedKey(format!("bad P-256 point: {e}")))
            } else if curve == OID_SECP384R1 {
                p384::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(Self::EcdsaP384)
                    .map_err(|e| ChallengeError::UnsupportedKey(format!("bad P-384 point: {e}")))
            } else if curve == OID_SECP521R1 {
                p521::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(Self::EcdsaP521)
                    .map_err(|e| ChallengeError::UnsupportedKey(format!("bad P-521 point: {e}")))
            } else {
                Err(ChallengeError::UnsupportedKey(format!(
                    "unsupported curve {curve}"
                )))
            }
        } else if algorithm == OID_RSA_ENCRYPTION {
            let key = rsa::RsaPublicKey::from_public_key_der(spki_der)
                .map_err(|e| ChallengeError::UnsupportedKey(format!("bad RSA key: {e}")))?;
            let bits = key.size() * 8;
            if bits < MIN_RSA_BITS {
                return Err(ChallengeError::WeakKey(format!(
                    "RSA-{bits} is below the {MIN_RSA_BITS}-bit minimum"
                )));
            }
            if bits > MAX_RSA_BITS {
                return Err(ChallengeError::UnsupportedKey(format!(
                    "RSA-{bits} exceeds the {MAX_RSA_BITS}-bit maximum"
                )));
            }
            Ok(Self::Rsa(key))
        } else if algorithm == OID_ED25519 {
            let bytes: &[u8; 32] = key_bytes.try_into().map_err(|_| {
                ChallengeError::UnsupportedKey("Ed25519 key is not 32 bytes".into())
            })?;
            ed25519_dalek::VerifyingKey::from_bytes(bytes)
                .map(Self::Ed25519)
                .map_err(|e| ChallengeError::UnsupportedKey(format!("bad Ed25519 key: {e}")))
        } else {
            Err(ChallengeError::UnsupportedKey(format!(
                "unsupported key algorithm {algorithm}"
            )))
        }
    }

    /// Canonical DER SubjectPublicKeyInfo for the certificate template.
    pub fn spki_der(&self) -> Result<Vec<u8>, ChallengeError> {
        use spki::EncodePublicKey;
        if let Self::EcdsaP521(k) = self {
            // p521::ecdsa::VerifyingKey does not implement `EncodePublicKey`,
            // so the SPKI is built by hand from its SEC1 point encoding.
            let point = k.to_encoded_point(false);
            let algorithm = spki::AlgorithmIdentifierOwned {
                oid: OID_EC_PUBLIC_KEY,
                parameters: Some(
                    der::Any::from(OID_SECP521R1),
                ),
            };
            let subject_public_key = der::asn1::BitString::from_bytes(point.as_bytes())
                .map_err(|e| ChallengeError::UnsupportedKey(format!("unencodable key: {e}")))?;
            return spki::SubjectPublicKeyInfoOwned {
                algorithm,
                subject_public_key,
            }
            .to_der()
            .map_err(|e| ChallengeError::UnsupportedKey(format!("unencodable key: {e}")));
        }
        let doc = match self {
            Self::EcdsaP256(k) => k.to_public_key_der(),
            Self::EcdsaP384(k) => k.to_public_key_der(),
            Self::EcdsaP521(_) => unreachable!("handled above"),
            Self::Rsa(k) => k.to_public_key_der(),
            Self::Ed25519(k) => k.to_public_key_der(),
        };
        doc.map(|d| d.as_bytes().to_vec())
            .map_err(|e| ChallengeError::UnsupportedKey(format!("unencodable key: {e}")))
    }

    /// Human-readable algorithm name, used in logs only.
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Self::EcdsaP256(_) => "ecdsa-p256",
            Self::EcdsaP384(_) => "ecdsa-p384",
            Self::EcdsaP521(_) => "ecdsa-p521",
            Self::Rsa(_) => "rsa",
            Self::Ed25519(_) => "ed25519",
        }
    }

    /// Verify `signature` over `data` with an algorithm matched to the key
    /// type. ECDSA accepts ASN.1 DER or fixed-width signatures; RSA accepts
    /// PKCS#1 v1.5 or PSS, both SHA-256.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), ChallengeError> {
        let invalid = |_| ChallengeError::InvalidSignature("proof did not verify".into());
        match self {
            Self::EcdsaP256(key) => {
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .or_else(|_| p256::ecdsa::Signature::from_slice(signature))
                    .map_err(bad_sig)?;
                key.verify(data, &sig).map_err(invalid)
            }
            Self::EcdsaP384(key) => {
                let sig = p384::ecdsa::Signature::from_der(signature)
                    .or_else(|_| p384::ecdsa::Signature::from_slice(signature))
                    .map_err(bad_sig)?;
                key.verify(data, &sig).map_err(invalid)
            }
            Self::EcdsaP521(key) => {
                let sig = p521::ecdsa::Signature::from_der(signature)
                    .or_else(|_| p521::ecdsa::Signature::from_slice(signature))
                    .map_err(bad_sig)?;
                key.verify(data, &sig).map_err(invalid)
            }
            Self::Rsa(key) => {
                let pkcs1 = rsa::pkcs1v15::Signature::try_from(signature)
                    .ok()
                    .filter(|sig| {
                        rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                            .verify(data, sig)
                            .is_ok()
                    });
                if pkcs1.is_some() {
                    return Ok(());
                }
                let pss = rsa::pss::Signature::try_from(signature)
                    .map_err(|e| ChallengeError::InvalidSignature(e.to_string()))?;
                rsa::pss::VerifyingKey::<Sha256>::new(key.clone())
                    .verify(data, &pss)
                    .map_err(invalid)
            }
            Self::Ed25519(key) => {
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| ChallengeError::InvalidSignature(e.to_string()))?;
                key.verify(data, &sig).map_err(invalid)
            }
        }
    }
}

fn bad_sig(err: ecdsa::Error) -> ChallengeError {
    ChallengeError::InvalidSignature(format!("unparseable signature: {err}"))
}

/// Verify the submitted key material and its proof of possession against the
/// principal's `name`, returning the key to certify.
pub fn verify_proof(
    material: &KeyMaterial,
    name: &str,
    proof: Option<&[u8]>,
) -> Result<SubjectKey, ChallengeError> {
    match material {
        KeyMaterial::PublicKey { content, .. } => {
            let key = SubjectKey::parse(content)?;
            let proof = proof.ok_or_else(|| {
                ChallengeError::InvalidSignature("proof of possession is required".into())
            })?;
            key.verify(name.as_bytes(), proof)?;
            Ok(key)
        }
        KeyMaterial::CertificateSigningRequest(bytes) => verify_csr(bytes),
    }
}

/// Parse a PKCS#10 CSR, verify its self-signature, and return its public
/// key. Subject and SANs in the CSR are ignored by design.
pub fn verify_csr(content: &[u8]) -> Result<SubjectKey, ChallengeError> {
    let der = decode_pem_block(content, &["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"])?
        .unwrap_or_else(|| content.to_vec());
    let csr = CertReq::from_der(&der)
        .map_err(|e| ChallengeError::InvalidSignature(format!("CSR did not parse: {e}")))?;

    let spki_der = csr
        .info
        .public_key
        .to_der()
        .map_err(|e| ChallengeError::UnsupportedKey(format!("bad CSR key: {e}")))?;
    let key = SubjectKey::from_spki(&csr.info.public_key, &spki_der)?;

    let message = csr
        .info
        .to_der()
        .map_err(|e| ChallengeError::InvalidSignature(format!("CSR re-encode failed: {e}")))?;
    let signature = csr
        .signature
        .as_bytes()
        .ok_or_else(|| ChallengeError::InvalidSignature("CSR signature bits".into()))?;

    verify_with_algorithm(&key, csr.algorithm.oid, &message, signature)?;
    Ok(key)
}

/// Verify a signature under an explicit X.509 signature algorithm, checking
/// algorithm/key agreement.
fn verify_with_algorithm(
    key: &SubjectKey,
    algorithm: ObjectIdentifier,
    message: &[u8],
    signature: &[u8],
) -> Result<(), ChallengeError> {
    let invalid = |_| ChallengeError::InvalidSignature("CSR self-signature did not verify".into());
    let sig_error = |e: signature::Error| ChallengeError::InvalidSignature(e.to_string());
    match key {
        SubjectKey::EcdsaP256(k) if algorithm == OID_ECDSA_SHA256 => {
            let sig = p256::ecdsa::Signature::from_der(signature).map_err(bad_sig)?;
            k.verify(message, &sig).map_err(invalid)
        }
        SubjectKey::EcdsaP384(k) if algorithm == OID_ECDSA_SHA384 => {
            let sig = p384::ecdsa::Signature::from_der(signature).map_err(bad_sig)?;
            k.verify(message, &sig).map_err(invalid)
        }
        SubjectKey::EcdsaP521(k) if algorithm == OID_ECDSA_SHA512 => {
            let sig = p521::ecdsa::Signature::from_der(signature).map_err(bad_sig)?;
            k.verify(message, &sig).map_err(invalid)
        }
        SubjectKey::Rsa(k) if algorithm == OID_RSA_SHA256 => {
            let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(sig_error)?;
            rsa::pkcs1v15::VerifyingKey::<Sha256>::new(k.clone())
                .verify(message, &sig)
                .map_err(invalid)
        }
        SubjectKey::Rsa(k) if algorithm == OID_RSA_SHA384 => {
            let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(sig_error)?;
            rsa::pkcs1v15::VerifyingKey::<Sha384>::new(k.clone())
                .verify(message, &sig)
                .map_err(invalid)
        }
        SubjectKey::Rsa(k) if algorithm == OID_RSA_SHA512 => {
            let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(sig_error)?;
            rsa::pkcs1v15::VerifyingKey::<Sha512>::new(k.clone())
                .verify(message, &sig)
                .map_err(invalid)
        }
        SubjectKey::Rsa(k) if algorithm == OID_RSA_PSS => {
            let sig = rsa::pss::Signature::try_from(signature).map_err(sig_error)?;
            rsa::pss::VerifyingKey::<Sha256>::new(k.clone())
                .verify(message, &sig)
                .map_err(invalid)
        }
        SubjectKey::Ed25519(k) if algorithm == OID_ED25519 => {
            let sig = ed25519_dalek::Signature::from_slice(signature).map_err(sig_error)?;
            k.verify(message, &sig).map_err(invalid)
        }
        _ => Err(ChallengeError::UnsupportedKey(format!(
            "signature algorithm {algorithm} does not match the submitted key"
        ))),
    }
}

/// Decode the first PEM block when `content` is PEM with one of the
/// expected labels; `None` when the content is not PEM at all.
fn decode_pem_block(
    content: &[u8],
    labels: &[&str],
) -> Result<Option<Vec<u8>>, ChallengeError> {
    let Ok(text) = std::str::from_utf8(content) else {
        return Ok(None);
    };
    if !text.trim_start().starts_with("-----BEGIN") {
        return Ok(None);
    }
    let block = pem::parse(text)
        .map_err(|e| ChallengeError::UnsupportedKey(format!("bad PEM: {e}")))?;
    if !labels.contains(&block.tag()) {
        return Err(ChallengeError::UnsupportedKey(format!(
            "unexpected PEM label {}",
            block.tag()
        )));
    }
    Ok(Some(block.contents().to_vec()))
}
