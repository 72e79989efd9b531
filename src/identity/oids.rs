//! Object identifiers for OIDC provenance extensions
//!
//! All provenance extensions live under the private arc
//! `1.3.6.1.4.1.57264.1`. The arc is a stable wire contract: values `.1`
//! through `.6` carry raw UTF-8 bytes for compatibility with early
//! verifiers, `.8` and later carry DER-encoded `UTF8String`s.

use der::asn1::Utf8StringRef;
use der::oid::ObjectIdentifier;
use der::Encode;

/// Issuer URL, raw UTF-8 bytes (legacy encoding).
pub const OID_ISSUER_LEGACY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.1");

/// GitHub workflow trigger event, raw UTF-8 (legacy).
pub const OID_GITHUB_WORKFLOW_TRIGGER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.2");

/// Source repository SHA, raw UTF-8 (legacy).
pub const OID_GITHUB_WORKFLOW_SHA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.3");

/// Workflow name, raw UTF-8 (legacy).
pub const OID_GITHUB_WORKFLOW_NAME: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.4");

/// Source repository, raw UTF-8 (legacy).
pub const OID_GITHUB_WORKFLOW_REPOSITORY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.5");

/// Source ref, raw UTF-8 (legacy).
pub const OID_GITHUB_WORKFLOW_REF: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.6");

/// otherName SAN type-id carrying a `username!domain` identity.
pub const OID_OTHERNAME_USERNAME: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.7");

/// Issuer URL as a DER `UTF8String`.
pub const OID_ISSUER: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.8");

/// URI of the workflow/job that signed (the build signer).
pub const OID_BUILD_SIGNER_URI: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.9");

/// Digest of the build signer configuration.
pub const OID_BUILD_SIGNER_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.10");

/// Runner environment (hosted or self-hosted).
pub const OID_RUNNER_ENVIRONMENT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.11");

/// URI of the source repository.
pub const OID_SOURCE_REPOSITORY_URI: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.12");

/// Digest (commit SHA) of the source repository state that was built.
pub const OID_SOURCE_REPOSITORY_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.13");

/// Ref the build ran against.
pub const OID_SOURCE_REPOSITORY_REF: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.14");

/// Stable identifier of the source repository.
pub const OID_SOURCE_REPOSITORY_IDENTIFIER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.15");

/// URI of the source repository owner.
pub const OID_SOURCE_REPOSITORY_OWNER_URI: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.16");

/// Stable identifier of the source repository owner.
pub const OID_SOURCE_REPOSITORY_OWNER_IDENTIFIER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.17");

/// URI of the build configuration (workflow file at ref).
pub const OID_BUILD_CONFIG_URI: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.18");

/// Digest of the build configuration.
pub const OID_BUILD_CONFIG_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.19");

/// Event that triggered the build.
pub const OID_BUILD_TRIGGER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.20");

/// URI of the concrete run that performed the build.
pub const OID_RUN_INVOCATION_URI: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.21");

/// Visibility of the source repository (public or private).
pub const OID_SOURCE_REPOSITORY_VISIBILITY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.22");

/// CT pre-certificate poison extension (RFC 6962 §3.1). Critical, NULL value.
pub const OID_CT_POISON: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.3");

/// Embedded SCT list extension (RFC 6962 §3.3). Non-critical.
pub const OID_CT_SCT_LIST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.2");

/// Encode a string as a DER `UTF8String`, the value encoding used by the
/// `.8`+ provenance extensions.
pub fn der_utf8(value: &str) -> Result<Vec<u8>, der::Error> {
    Utf8StringRef::new(value)?.to_der()
}
