//! Username principal extraction and the otherName SAN codec
//!
//! The identity is `sub` scoped to the issuer's subject domain as
//! `{username}!{domain}`, carried in an otherName SAN:
//!
//! ```text
//! SEQUENCE {                        -- GeneralNames
//!   [0] {                          -- otherName (implicit)
//!     OBJECT IDENTIFIER 1.3.6.1.4.1.57264.1.7
//!     [0] EXPLICIT UTF8String      -- "{username}!{domain}"
//!   }
//! }
//! ```
//!
//! The codec is DER-strict on both sides: exactly one otherName, the
//! expected type-id, no trailing data at any level. The SAN extension is
//! marked critical because the certificate has no other subject identifier.

use der::asn1::Utf8StringRef;
use der::oid::ObjectIdentifier;
use der::{Decode, Encode, Header, Length, Reader, SliceReader, Tag, TagNumber};
use thiserror::Error;

use super::{oids, CertExtension, ExtensionSet, ExtractError, SubjectAltName};
use crate::oidc::{Claims, IssuerDescriptor};

/// A user identified by a bare username scoped to a configured domain.
#[derive(Debug, Clone)]
pub struct UsernamePrincipal {
    /// The bare username from `sub`; also the challenge value.
    pub username: String,
    /// The domain the username is scoped to.
    pub subject_domain: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract(
    claims: &Claims,
    descriptor: &IssuerDescriptor,
) -> Result<UsernamePrincipal, ExtractError> {
    let domain = descriptor
        .subject_domain
        .as_deref()
        .ok_or_else(|| ExtractError::InvalidClaims("issuer has no subject domain".into()))?;
    let username = &claims.subject;
    if username.is_empty() {
        return Err(ExtractError::InvalidClaims("sub is empty".into()));
    }
    // '@' would make the identity ambiguous with an email address and '!'
    // is the scoping delimiter.
    if username.contains('@') || username.contains('!') {
        return Err(ExtractError::InvalidClaims(
            "username may not contain '@' or '!'".into(),
        ));
    }
    Ok(UsernamePrincipal {
        username: username.clone(),
        subject_domain: domain.to_string(),
        issuer: claims.issuer.clone(),
    })
}

impl UsernamePrincipal {
    /// The scoped identity, `{username}!{domain}`.
    pub fn scoped_identity(&self) -> String {
        format!("{}!{}", self.username, self.subject_domain)
    }

    /// A single otherName SAN carrying the scoped identity.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::OtherName {
            type_id: oids::OID_OTHERNAME_USERNAME,
            value: self.scoped_identity(),
        }]
    }

    /// Issuer provenance only.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        Ok(set.build())
    }
}

/// otherName SAN codec errors. The messages are part of the diagnostic
/// contract and are asserted by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SanError {
    /// The outer GeneralNames SEQUENCE is absent or mis-tagged.
    #[error("bad SAN sequence")]
    BadSequence,

    /// Bytes follow the extension value.
    #[error("trailing data after X.509 extension")]
    TrailingData,

    /// More than one GeneralName is present.
    #[error("expected only one OtherName")]
    MultipleOtherNames,

    /// The otherName type-id is not the username OID.
    #[error("unexpected OID for OtherName")]
    UnexpectedOid,

    /// The otherName body does not decode.
    #[error("malformed OtherName")]
    Malformed,
}

/// Encode a scoped identity into the SAN extension value.
pub fn marshal_username_san(identity: &str) -> Result<Vec<u8>, SanError> {
    let utf8 = Utf8StringRef::new(identity).map_err(|_| SanError::Malformed)?;
    let inner = utf8.to_der().map_err(|_| SanError::Malformed)?;
    let explicit_value = context_constructed(&inner)?;

    let mut other_name = oids::OID_OTHERNAME_USERNAME
        .to_der()
        .map_err(|_| SanError::Malformed)?;
    other_name.extend_from_slice(&explicit_value);
    let general_name = context_constructed(&other_name)?;

    let mut out = header_bytes(Tag::Sequence, general_name.len())?;
    out.extend_from_slice(&general_name);
    Ok(out)
}

/// Decode a SAN extension value back into the scoped identity.
pub fn unmarshal_username_san(bytes: &[u8]) -> Result<String, SanError> {
    let mut reader = SliceReader::new(bytes).map_err(|_| SanError::BadSequence)?;
    let header = Header::decode(&mut reader).map_err(|_| SanError::BadSequence)?;
    if header.tag != Tag::Sequence {
        return Err(SanError::BadSequence);
    }
    let body = read_body(&mut reader, header.length).ok_or(SanError::BadSequence)?;
    if !reader.is_finished() {
        return Err(SanError::TrailingData);
    }

    let mut names = SliceReader::new(body).map_err(|_| SanError::Malformed)?;
    let name_header = Header::decode(&mut names).map_err(|_| SanError::Malformed)?;
    if name_header.tag != other_name_tag() {
        return Err(SanError::Malformed);
    }
    let name_body = read_body(&mut names, name_header.length).ok_or(SanError::Malformed)?;
    if !names.is_finished() {
        return Err(SanError::MultipleOtherNames);
    }

    let mut other_name = SliceReader::new(name_body).map_err(|_| SanError::Malformed)?;
    let type_id =
        ObjectIdentifier::decode(&mut other_name).map_err(|_| SanError::Malformed)?;
    if type_id != oids::OID_OTHERNAME_USERNAME {
        return Err(SanError::UnexpectedOid);
    }
    let value_header = Header::decode(&mut other_name).map_err(|_| SanError::Malformed)?;
    if value_header.tag != other_name_tag() {
        return Err(SanError::Malformed);
    }
    let value_body = read_body(&mut other_name, value_header.length).ok_or(SanError::Malformed)?;
    if !other_name.is_finished() {
        return Err(SanError::Malformed);
    }
    let utf8 = Utf8StringRef::from_der(value_body).map_err(|_| SanError::Malformed)?;
    Ok(utf8.as_str().to_string())
}

/// `[0]` constructed, used both for the implicit otherName GeneralName and
/// the explicit value wrapper.
fn other_name_tag() -> Tag {
    Tag::ContextSpecific {
        constructed: true,
        number: TagNumber::N0,
    }
}

fn context_constructed(body: &[u8]) -> Result<Vec<u8>, SanError> {
    let mut out = header_bytes(other_name_tag(), body.len())?;
    out.extend_from_slice(body);
    Ok(out)
}

fn header_bytes(tag: Tag, len: usize) -> Result<Vec<u8>, SanError> {
    let length = Length::try_from(len).map_err(|_| SanError::Malformed)?;
    let header = Header::new(tag, length).map_err(|_| SanError::Malformed)?;
    header.to_der().map_err(|_| SanError::Malformed)
}

fn read_body<'a>(reader: &mut SliceReader<'a>, length: Length) -> Option<&'a [u8]> {
    reader.read_slice(length).ok()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{claims, descriptor};
    use super::*;
    use crate::oidc::IssuerType;

    const FOO_EXAMPLE_COM: &str =
        "3021a01f060a2b0601040183bf300107a0110c0f666f6f216578616d706c652e636f6d";

    fn username_descriptor(domain: &str) -> IssuerDescriptor {
        let mut d = descriptor("https://issuer.example.com", IssuerType::Username);
        d.subject_domain = Some(domain.to_string());
        d
    }

    #[test]
    fn marshal_matches_known_payload() {
        let der = marshal_username_san("foo!example.com").unwrap();
        assert_eq!(hex::encode(der), FOO_EXAMPLE_COM);
    }

    #[test]
    fn unmarshal_round_trips() {
        let der = hex::decode(FOO_EXAMPLE_COM).unwrap();
        assert_eq!(unmarshal_username_san(&der).unwrap(), "foo!example.com");
    }

    #[test]
    fn mutated_outer_tag_is_a_bad_sequence() {
        for tag in [0xb0u8, 0x10, 0x02] {
            let mut der = hex::decode(FOO_EXAMPLE_COM).unwrap();
            der[0] = tag;
            assert_eq!(
                unmarshal_username_san(&der).unwrap_err(),
                SanError::BadSequence,
                "tag {tag:02x}"
            );
        }
    }

    #[test]
    fn trailing_byte_is_reported() {
        let mut der = hex::decode(FOO_EXAMPLE_COM).unwrap();
        der.push(0x30);
        assert_eq!(
            unmarshal_username_san(&der).unwrap_err(),
            SanError::TrailingData
        );
        assert_eq!(
            SanError::TrailingData.to_string(),
            "trailing data after X.509 extension"
        );
    }

    #[test]
    fn duplicated_other_name_is_rejected() {
        let der = hex::decode(FOO_EXAMPLE_COM).unwrap();
        // Duplicate the single GeneralName inside a re-lengthed SEQUENCE.
        let inner = &der[2..];
        let mut doubled = vec![0x30, (inner.len() * 2) as u8];
        doubled.extend_from_slice(inner);
        doubled.extend_from_slice(inner);
        assert_eq!(
            unmarshal_username_san(&doubled).unwrap_err(),
            SanError::MultipleOtherNames
        );
        assert_eq!(
            SanError::MultipleOtherNames.to_string(),
            "expected only one OtherName"
        );
    }

    #[test]
    fn wrong_type_id_is_rejected() {
        // Flip the last OID arc from .7 to .6.
        let mut der = hex::decode(FOO_EXAMPLE_COM).unwrap();
        let oid_end = 4 + 12;
        der[oid_end - 1] = 0x06;
        assert_eq!(
            unmarshal_username_san(&der).unwrap_err(),
            SanError::UnexpectedOid
        );
        assert_eq!(
            SanError::UnexpectedOid.to_string(),
            "unexpected OID for OtherName"
        );
    }

    #[test]
    fn marshal_unmarshal_is_identity_on_unicode() {
        for identity in ["foo!example.com", "ünïcode!example.com", "a!b"] {
            let der = marshal_username_san(identity).unwrap();
            assert_eq!(unmarshal_username_san(&der).unwrap(), identity);
        }
    }

    #[test]
    fn extract_scopes_username_to_domain() {
        let claims = claims(
            "https://issuer.example.com",
            serde_json::json!({ "sub": "foo" }),
        );
        let principal = extract(&claims, &username_descriptor("example.com")).unwrap();
        assert_eq!(principal.scoped_identity(), "foo!example.com");
        match &principal.subject_alt_names()[0] {
            SubjectAltName::OtherName { type_id, value } => {
                assert_eq!(*type_id, oids::OID_OTHERNAME_USERNAME);
                assert_eq!(value, "foo!example.com");
            }
            other => panic!("expected otherName SAN, got {other:?}"),
        }
    }

    #[test]
    fn email_shaped_subject_is_rejected() {
        let claims = claims(
            "https://issuer.example.com",
            serde_json::json!({ "sub": "foo@example.com" }),
        );
        assert!(matches!(
            extract(&claims, &username_descriptor("example.com")),
            Err(ExtractError::InvalidClaims(_))
        ));
    }
}
