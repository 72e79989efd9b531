//! Certificate template construction
//!
//! Builds the unsigned shape of a leaf certificate from a principal and its
//! proven public key. Identity flows entirely through SANs and provenance
//! extensions; the subject DN is empty. Serial numbers are 159 bits of
//! cryptographic randomness (20 bytes, top bit cleared, so the DER INTEGER
//! is always positive).

use chrono::{DateTime, Utc};
use der::asn1::{Ia5String, Null, OctetString};
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use thiserror::Error;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages,
    SubjectAltName as SanExtension,
};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};

use crate::config::PolicyConfig;
use crate::identity::username::marshal_username_san;
use crate::identity::{oids, CertExtension, Principal, SubjectAltName};

const OID_KP_CODE_SIGNING: der::oid::ObjectIdentifier =
    der::oid::ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");

/// Template construction errors. These indicate bugs or unrepresentable
/// inputs, not client mistakes.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A field failed DER encoding.
    #[error("DER encoding failed: {0}")]
    Der(String),

    /// The template would violate an issuance invariant.
    #[error("invalid template: {0}")]
    Invalid(String),
}

impl From<der::Error> for TemplateError {
    fn from(err: der::Error) -> Self {
        Self::Der(err.to_string())
    }
}

/// The unsigned shape of a certificate, ready for a backend to sign.
#[derive(Debug, Clone)]
pub struct CertificateTemplate {
    /// 20 bytes, top bit clear; positive 159-bit big-endian integer.
    pub serial: [u8; 20],
    /// Start of validity (backdated for clock skew).
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// DER SubjectPublicKeyInfo of the key being certified.
    pub spki_der: Vec<u8>,
    /// Ordered typed SANs.
    pub san: Vec<SubjectAltName>,
    /// Whether the SAN extension is critical.
    pub san_critical: bool,
    /// Ordered provenance extensions.
    pub extensions: Vec<CertExtension>,
    /// True for the CT pre-certificate (adds the poison extension).
    pub is_precert: bool,
    /// DER `SignedCertificateTimestampList` to embed, for the final
    /// certificate on the embedded-SCT path.
    pub sct_list_der: Option<Vec<u8>>,
}

impl CertificateTemplate {
    /// Build a template for `principal` and `spki_der` at `now` under the
    /// given validity policy.
    pub fn build(
        principal: &Principal,
        spki_der: Vec<u8>,
        now: DateTime<Utc>,
        policy: &PolicyConfig,
    ) -> Result<Self, TemplateError> {
        let extensions = principal
            .extensions()
            .map_err(|e| TemplateError::Invalid(format!("principal extensions: {e}")))?;
        Ok(Self {
            serial: random_serial(),
            not_before: now
                - chrono::Duration::from_std(policy.backdate())
                    .map_err(|e| TemplateError::Invalid(e.to_string()))?,
            not_after: now
                + chrono::Duration::from_std(policy.lifetime())
                    .map_err(|e| TemplateError::Invalid(e.to_string()))?,
            spki_der,
            san: principal.subject_alt_names(),
            san_critical: principal.san_critical(),
            extensions,
            is_precert: false,
            sct_list_der: None,
        })
    }

    /// The pre-certificate variant: same shape plus the critical CT poison
    /// extension, never an SCT.
    pub fn into_precert(mut self) -> Self {
        self.is_precert = true;
        self.sct_list_der = None;
        self
    }

    /// The final-certificate variant with an embedded SCT list. Poison and
    /// SCT are mutually exclusive by construction.
    pub fn with_sct(mut self, sct_list_der: Vec<u8>) -> Self {
        self.is_precert = false;
        self.sct_list_der = Some(sct_list_der);
        self
    }

    /// Serial as a lowercase hex string, for audit records.
    pub fn serial_hex(&self) -> String {
        hex::encode(self.serial)
    }

    /// Assemble the TBSCertificate for an issuer. The backend supplies its
    /// subject name, signature algorithm, and key identifier.
    pub fn to_tbs(
        &self,
        issuer: &Name,
        signature_algorithm: &AlgorithmIdentifierOwned,
        issuer_key_id: Option<&[u8]>,
    ) -> Result<TbsCertificate, TemplateError> {
        let serial_number =
            SerialNumber::new(&self.serial).map_err(|e| TemplateError::Der(e.to_string()))?;
        let validity = Validity {
            not_before: time_from_datetime(self.not_before)?,
            not_after: time_from_datetime(self.not_after)?,
        };
        let spki = SubjectPublicKeyInfoOwned::from_der(&self.spki_der)
            .map_err(|e| TemplateError::Invalid(format!("bad subject key: {e}")))?;

        let mut extensions = Vec::new();
        extensions.push(extension(
            const_oid::db::rfc5280::ID_CE_KEY_USAGE,
            true,
            KeyUsage(KeyUsages::DigitalSignature.into()).to_der()?,
        )?);
        extensions.push(extension(
            const_oid::db::rfc5280::ID_CE_EXT_KEY_USAGE,
            false,
            ExtendedKeyUsage(vec![OID_KP_CODE_SIGNING]).to_der()?,
        )?);
        extensions.push(extension(
            const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS,
            true,
            BasicConstraints {
                ca: false,
                path_len_constraint: None,
            }
            .to_der()?,
        )?);
        extensions.push(extension(
            const_oid::db::rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER,
            false,
            OctetString::new(key_identifier(&self.spki_der)?)?.to_der()?,
        )?);
        if let Some(key_id) = issuer_key_id {
            let aki = AuthorityKeyIdentifier {
                key_identifier: Some(OctetString::new(key_id)?),
                authority_cert_issuer: None,
                authority_cert_serial_number: None,
            };
            extensions.push(extension(
                const_oid::db::rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER,
                false,
                aki.to_der()?,
            )?);
        }
        extensions.push(extension(
            const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME,
            self.san_critical,
            san_extension_value(&self.san)?,
        )?);
        for ext in &self.extensions {
            extensions.push(extension(ext.oid, ext.critical, ext.value.clone())?);
        }
        if self.is_precert {
            extensions.push(extension(oids::OID_CT_POISON, true, Null.to_der()?)?);
        } else if let Some(sct) = &self.sct_list_der {
            extensions.push(extension(oids::OID_CT_SCT_LIST, false, sct.clone())?);
        }

        Ok(TbsCertificate {
            version: Version::V3,
            serial_number,
            signature: signature_algorithm.clone(),
            issuer: issuer.clone(),
            validity,
            subject: Name::default(),
            subject_public_key_info: spki,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        })
    }
}

/// 20 random bytes with the top bit cleared; regenerated in the (2^-160)
/// case of all zeroes.
fn random_serial() -> [u8; 20] {
    use rand::RngCore;
    let mut bytes = [0u8; 20];
    loop {
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes[0] &= 0x7f;
        if bytes.iter().any(|&b| b != 0) {
            return bytes;
        }
    }
}

/// RFC 7093 method 1 key identifier: leftmost 160 bits of SHA-256 over the
/// subjectPublicKey bits.
pub(crate) fn key_identifier(spki_der: &[u8]) -> Result<Vec<u8>, TemplateError> {
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der)
        .map_err(|e| TemplateError::Invalid(format!("bad SPKI: {e}")))?;
    let key_bits = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| TemplateError::Invalid("key bits are not octet-aligned".into()))?;
    Ok(Sha256::digest(key_bits)[..20].to_vec())
}

fn extension(
    oid: der::oid::ObjectIdentifier,
    critical: bool,
    value: Vec<u8>,
) -> Result<Extension, TemplateError> {
    Ok(Extension {
        extn_id: oid,
        critical,
        extn_value: OctetString::new(value)?,
    })
}

fn san_extension_value(sans: &[SubjectAltName]) -> Result<Vec<u8>, TemplateError> {
    if sans.is_empty() {
        return Err(TemplateError::Invalid(
            "certificate must carry at least one SAN".into(),
        ));
    }
    // A lone otherName goes through the strict username codec so the wire
    // bytes match the documented payload exactly.
    if let [SubjectAltName::OtherName { type_id, value }] = sans {
        if *type_id != oids::OID_OTHERNAME_USERNAME {
            return Err(TemplateError::Invalid(format!(
                "unsupported otherName type-id {type_id}"
            )));
        }
        return marshal_username_san(value).map_err(|e| TemplateError::Der(e.to_string()));
    }
    let names = sans
        .iter()
        .map(|san| match san {
            SubjectAltName::Email(email) => Ok(GeneralName::Rfc822Name(
                Ia5String::new(email).map_err(TemplateError::from)?,
            )),
            SubjectAltName::Uri(uri) => Ok(GeneralName::UniformResourceIdentifier(
                Ia5String::new(uri).map_err(TemplateError::from)?,
            )),
            SubjectAltName::Dns(dns) => Ok(GeneralName::DnsName(
                Ia5String::new(dns).map_err(TemplateError::from)?,
            )),
            SubjectAltName::OtherName { .. } => Err(TemplateError::Invalid(
                "otherName may not be mixed with other SANs".into(),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SanExtension(names).to_der()?)
}

/// RFC 5280 time: UTCTime through 2049, GeneralizedTime after.
fn time_from_datetime(value: DateTime<Utc>) -> Result<Time, TemplateError> {
    let timestamp = value.timestamp();
    if timestamp < 0 {
        return Err(TemplateError::Invalid("validity before the epoch".into()));
    }
    let unix = std::time::Duration::from_secs(timestamp as u64);
    // 2050-01-01T00:00:00Z
    const UTC_TIME_CUTOVER: i64 = 2_524_608_000;
    if timestamp < UTC_TIME_CUTOVER {
        Ok(Time::UtcTime(
            der::asn1::UtcTime::from_unix_duration(unix)
                .map_err(|e| TemplateError::Der(e.to_string()))?,
        ))
    } else {
        Ok(Time::GeneralTime(
            der::asn1::GeneralizedTime::from_unix_duration(unix)
                .map_err(|e| TemplateError::Der(e.to_string()))?,
        ))
    }
}
