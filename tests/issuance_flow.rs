//! End-to-end issuance tests over the ephemeral backend
//!
//! Drives the full pipeline with a fake OIDC issuer and static JWKS:
//! email (CSR path), SPIFFE (signed-challenge path), GitHub Actions, the
//! CT embedded/detached dispositions, validity-window invariants, chain
//! verification, and the error taxonomy at the seams.

mod common;

use common::{
    assert_chains_to_root, authority, build_csr, issuer_config, p256_keypair, sign_challenge,
    CtMode, TestIssuer,
};
use signet_ca::backend::SigningBackend;
use signet_ca::oidc::IssuerType;
use signet_ca::types::{IssueRequest, KeyMaterial};
use signet_ca::ErrorClass;

const ISSUER_EXT_LEGACY: &str = "1.3.6.1.4.1.57264.1.1";
const ISSUER_EXT: &str = "1.3.6.1.4.1.57264.1.8";
const CT_POISON: &str = "1.3.6.1.4.1.11129.2.4.3";
const CT_SCT_LIST: &str = "1.3.6.1.4.1.11129.2.4.2";

fn extension_value<'a>(
    cert: &'a x509_parser::certificate::X509Certificate<'a>,
    oid: &str,
) -> Option<&'a [u8]> {
    cert.extensions()
        .iter()
        .find(|e| e.oid.to_id_string() == oid)
        .map(|e| e.value)
}

#[tokio::test]
async fn email_identity_via_csr() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::None,
    );

    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: google.token(serde_json::json!({
            "sub": "user-1234",
            "email": "alice@example.com",
            "email_verified": true,
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    let artifact = authority.issuer.issue(&request).await.unwrap();

    let (_, leaf) = x509_parser::parse_x509_certificate(&artifact.leaf).unwrap();

    // SAN carries the address.
    let san = leaf.subject_alternative_name().unwrap().unwrap();
    assert!(san.value.general_names.iter().any(|name| matches!(
        name,
        x509_parser::extensions::GeneralName::RFC822Name("alice@example.com")
    )));

    // EKU is code signing; key usage is digital signature only.
    let eku = leaf.extended_key_usage().unwrap().unwrap();
    assert!(eku.value.code_signing);
    let ku = leaf.key_usage().unwrap().unwrap();
    assert!(ku.value.digital_signature());
    assert!(!ku.value.key_cert_sign());

    // Both issuer extensions are present; the legacy one is raw UTF-8, the
    // newer one a DER UTF8String.
    assert_eq!(
        extension_value(&leaf, ISSUER_EXT_LEGACY).unwrap(),
        b"https://accounts.google.com"
    );
    let issuer_der = extension_value(&leaf, ISSUER_EXT).unwrap();
    assert_eq!(issuer_der[0], 0x0c);
    assert_eq!(&issuer_der[2..], b"https://accounts.google.com");

    // Empty subject; identity flows through SANs.
    assert_eq!(leaf.subject().iter().count(), 0);

    assert_chains_to_root(&artifact.leaf, &authority.backend);

    // Audit record has the essentials and no secrets.
    let records = authority.audit.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].issuer, "https://accounts.google.com");
    assert_eq!(records[0].subject, "alice@example.com");
    assert_eq!(records[0].serial.len(), 40);
    assert!(records[0].sct_log_id.is_none());
}

#[tokio::test]
async fn spiffe_identity_via_signed_challenge() {
    let spire = TestIssuer::new("https://allow.pub");
    let mut config = issuer_config(IssuerType::Spiffe);
    config.spiffe_trust_domain = Some("allow.pub".to_string());
    let authority = authority(vec![(&spire, config)], CtMode::None);

    let (key, spki) = p256_keypair();
    let spiffe_id = "spiffe://allow.pub/ns/foo/sa/bar";
    let request = IssueRequest {
        oidc_token: spire.token(serde_json::json!({ "sub": spiffe_id })),
        key: KeyMaterial::PublicKey {
            algorithm: Some("ECDSA".into()),
            content: spki,
        },
        proof_of_possession: Some(sign_challenge(&key, spiffe_id)),
    };
    let artifact = authority.issuer.issue(&request).await.unwrap();

    let (_, leaf) = x509_parser::parse_x509_certificate(&artifact.leaf).unwrap();
    let san = leaf.subject_alternative_name().unwrap().unwrap();
    assert!(san.value.general_names.iter().any(|name| matches!(
        name,
        x509_parser::extensions::GeneralName::URI("spiffe://allow.pub/ns/foo/sa/bar")
    )));
}

#[tokio::test]
async fn spiffe_foreign_trust_domain_is_unauthorized() {
    let spire = TestIssuer::new("https://allow.pub");
    let mut config = issuer_config(IssuerType::Spiffe);
    config.spiffe_trust_domain = Some("allow.pub".to_string());
    let authority = authority(vec![(&spire, config)], CtMode::None);

    let (key, spki) = p256_keypair();
    let foreign = "spiffe://other.pub/ns/foo/sa/bar";
    let request = IssueRequest {
        oidc_token: spire.token(serde_json::json!({ "sub": foreign })),
        key: KeyMaterial::PublicKey {
            algorithm: None,
            content: spki,
        },
        proof_of_possession: Some(sign_challenge(&key, foreign)),
    };
    let err = authority.issuer.issue(&request).await.unwrap_err();
    assert_eq!(err.code(), "domain_mismatch");
    assert_eq!(err.class(), ErrorClass::Unauthorized);
}

#[tokio::test]
async fn github_workflow_identity_with_full_provenance() {
    let github = TestIssuer::new("https://token.actions.githubusercontent.com");
    let authority = authority(
        vec![(&github, issuer_config(IssuerType::GithubWorkflow))],
        CtMode::None,
    );

    let subject = "repo:acme/widgets:ref:refs/heads/main";
    let (key, spki) = p256_keypair();
    let request = IssueRequest {
        oidc_token: github.token(serde_json::json!({
            "sub": subject,
            "job_workflow_ref": "acme/widgets/.github/workflows/release.yml@refs/heads/main",
            "sha": "0011223344556677889900112233445566778899",
            "event_name": "push",
            "repository": "acme/widgets",
            "workflow": "release",
            "ref": "refs/heads/main",
            "repository_owner": "acme",
            "repository_owner_id": "101",
            "repository_id": "202",
            "run_id": "777",
            "run_attempt": "1",
            "repository_visibility": "public",
            "ref_type": "branch",
            "runner_environment": "github-hosted",
            "workflow_ref": "acme/widgets/.github/workflows/release.yml@refs/heads/main",
            "workflow_sha": "0011223344556677889900112233445566778899",
        })),
        key: KeyMaterial::PublicKey {
            algorithm: None,
            content: spki,
        },
        proof_of_possession: Some(sign_challenge(&key, subject)),
    };
    let artifact = authority.issuer.issue(&request).await.unwrap();

    let (_, leaf) = x509_parser::parse_x509_certificate(&artifact.leaf).unwrap();
    let san = leaf.subject_alternative_name().unwrap().unwrap();
    assert!(san.value.general_names.iter().any(|name| matches!(
        name,
        x509_parser::extensions::GeneralName::URI(
            "https://github.com/acme/widgets/.github/workflows/release.yml@refs/heads/main"
        )
    )));

    // Legacy trigger/sha/workflow/repository/ref entries plus the
    // structured provenance arc.
    assert_eq!(
        extension_value(&leaf, "1.3.6.1.4.1.57264.1.2").unwrap(),
        b"push"
    );
    assert_eq!(
        extension_value(&leaf, "1.3.6.1.4.1.57264.1.5").unwrap(),
        b"acme/widgets"
    );
    for arc in 9..=22 {
        if arc == 10 {
            // Build signer digest comes from job_workflow_sha, which this
            // token does not carry.
            continue;
        }
        let oid = format!("1.3.6.1.4.1.57264.1.{arc}");
        assert!(
            extension_value(&leaf, &oid).is_some(),
            "missing provenance extension {oid}"
        );
    }
}

#[tokio::test]
async fn validity_window_is_short_lived_and_covers_now() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::None,
    );
    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: google.token(serde_json::json!({
            "email": "alice@example.com",
            "email_verified": true,
            "sub": "s",
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    let artifact = authority.issuer.issue(&request).await.unwrap();

    let (_, leaf) = x509_parser::parse_x509_certificate(&artifact.leaf).unwrap();
    let now = chrono::Utc::now().timestamp();
    let not_before = leaf.validity().not_before.timestamp();
    let not_after = leaf.validity().not_after.timestamp();
    assert!(not_before <= now && now <= not_after);
    // lifetime (10 min) + backdate (5 min)
    assert!(not_after - not_before <= 15 * 60);

    // 159-bit serial: 20 bytes, top bit clear, positive.
    let serial = leaf.raw_serial();
    assert!(serial.len() <= 20);
    assert_ne!(serial[0] & 0x80, 0x80);
}

#[tokio::test]
async fn ct_embedded_sct_replaces_poison() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::Embedded,
    );
    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: google.token(serde_json::json!({
            "email": "alice@example.com",
            "email_verified": true,
            "sub": "s",
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    let artifact = authority.issuer.issue(&request).await.unwrap();

    // The pre-certificate that went to the log carries the critical poison
    // and no SCT.
    let submissions = authority.ct_log.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let precert_der = &submissions[0][0];
    let (_, precert) = x509_parser::parse_x509_certificate(precert_der).unwrap();
    let poison = precert
        .extensions()
        .iter()
        .find(|e| e.oid.to_id_string() == CT_POISON)
        .unwrap();
    assert!(poison.critical);
    assert!(extension_value(&precert, CT_SCT_LIST).is_none());
    // The submission includes the issuing chain after the pre-cert.
    assert_eq!(submissions[0].len(), 3);

    // The final leaf embeds the SCT, has no poison, and nothing detached.
    let (_, leaf) = x509_parser::parse_x509_certificate(&artifact.leaf).unwrap();
    assert!(extension_value(&leaf, CT_SCT_LIST).is_some());
    assert!(extension_value(&leaf, CT_POISON).is_none());
    assert!(artifact.detached_sct.is_none());

    // Audit captured the log id and timestamp.
    let records = authority.audit.records.lock().unwrap();
    assert_eq!(records[0].sct_log_id.as_deref(), Some(hex::encode([0x42u8; 32]).as_str()));
    assert_eq!(records[0].sct_timestamp, Some(1_700_000_000_000));

    // Pre-cert and final cert share serial and subject key.
    assert_eq!(precert.raw_serial(), leaf.raw_serial());
}

#[tokio::test]
async fn ct_detached_sct_leaves_the_leaf_clean() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::Detached,
    );
    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: google.token(serde_json::json!({
            "email": "alice@example.com",
            "email_verified": true,
            "sub": "s",
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    let artifact = authority.issuer.issue(&request).await.unwrap();

    let (_, leaf) = x509_parser::parse_x509_certificate(&artifact.leaf).unwrap();
    assert!(extension_value(&leaf, CT_SCT_LIST).is_none());
    assert!(extension_value(&leaf, CT_POISON).is_none());
    let sct = artifact.detached_sct.expect("detached SCT");
    // TLS SCT: version 0, then the 32-byte log id.
    assert_eq!(sct[0], 0);
    assert_eq!(&sct[1..33], &[0x42u8; 32]);
}

#[tokio::test]
async fn tampered_precert_no_longer_verifies() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::Embedded,
    );
    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: google.token(serde_json::json!({
            "email": "alice@example.com",
            "email_verified": true,
            "sub": "s",
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    authority.issuer.issue(&request).await.unwrap();

    let submissions = authority.ct_log.submissions.lock().unwrap();
    let precert = submissions[0][0].clone();
    let (_, intermediate) =
        x509_parser::parse_x509_certificate(authority.backend.chain().signer()).unwrap();

    // Untampered pre-cert verifies under the intermediate.
    let (_, parsed) = x509_parser::parse_x509_certificate(&precert).unwrap();
    parsed
        .verify_signature(Some(intermediate.public_key()))
        .unwrap();

    // Any byte flip in the TBS region invalidates it: either the DER no
    // longer parses or the signature check fails.
    for offset in [50usize, 120, 200] {
        let mut tampered = precert.clone();
        tampered[offset] ^= 0x01;
        match x509_parser::parse_x509_certificate(&tampered) {
            Err(_) => {}
            Ok((_, cert)) => {
                assert!(cert.verify_signature(Some(intermediate.public_key())).is_err());
            }
        }
    }
}

#[tokio::test]
async fn expired_token_is_unauthorized() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::None,
    );
    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: google.token(serde_json::json!({
            "email": "alice@example.com",
            "email_verified": true,
            "sub": "s",
            // Far beyond the 30 s leeway.
            "exp": chrono::Utc::now().timestamp() - 600,
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    let err = authority.issuer.issue(&request).await.unwrap_err();
    assert_eq!(err.code(), "token_expired");
    assert_eq!(err.class(), ErrorClass::Unauthorized);
}

#[tokio::test]
async fn audience_mismatch_is_unauthorized() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::None,
    );
    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: google.token(serde_json::json!({
            "email": "alice@example.com",
            "email_verified": true,
            "sub": "s",
            "aud": "not-sigstore",
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    let err = authority.issuer.issue(&request).await.unwrap_err();
    assert_eq!(err.code(), "audience_mismatch");
}

#[tokio::test]
async fn unknown_issuer_is_rejected_before_key_resolution() {
    let google = TestIssuer::new("https://accounts.google.com");
    let stranger = TestIssuer::new("https://stranger.example.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::None,
    );
    let (key, _) = p256_keypair();
    let request = IssueRequest {
        oidc_token: stranger.token(serde_json::json!({
            "email": "alice@example.com",
            "email_verified": true,
            "sub": "s",
        })),
        key: KeyMaterial::CertificateSigningRequest(build_csr(&key)),
        proof_of_possession: None,
    };
    let err = authority.issuer.issue(&request).await.unwrap_err();
    assert_eq!(err.code(), "unknown_issuer");
}

#[tokio::test]
async fn wrong_key_proof_is_rejected() {
    let spire = TestIssuer::new("https://allow.pub");
    let mut config = issuer_config(IssuerType::Spiffe);
    config.spiffe_trust_domain = Some("allow.pub".to_string());
    let authority = authority(vec![(&spire, config)], CtMode::None);

    let (_, spki) = p256_keypair();
    let (other_key, _) = p256_keypair();
    let spiffe_id = "spiffe://allow.pub/ns/foo/sa/bar";
    let request = IssueRequest {
        oidc_token: spire.token(serde_json::json!({ "sub": spiffe_id })),
        key: KeyMaterial::PublicKey {
            algorithm: None,
            content: spki,
        },
        // Signed with a key that does not match the submitted public key.
        proof_of_possession: Some(sign_challenge(&other_key, spiffe_id)),
    };
    let err = authority.issuer.issue(&request).await.unwrap_err();
    assert_eq!(err.code(), "invalid_signature");
    assert_eq!(err.class(), ErrorClass::InvalidInput);
}

#[tokio::test]
async fn trust_bundle_exposes_the_chain() {
    let google = TestIssuer::new("https://accounts.google.com");
    let authority = authority(
        vec![(&google, issuer_config(IssuerType::Email))],
        CtMode::None,
    );
    let bundle = authority.issuer.trust_bundle();
    assert_eq!(bundle.matches("BEGIN CERTIFICATE").count(), 2);
}
