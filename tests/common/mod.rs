//! Common test fixtures for signet-ca integration tests
//!
//! A fake OIDC issuer (ES256 key + static JWKS), token and CSR builders,
//! a capturing audit sink, and a fake CT log.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use der::asn1::BitString;
use der::Encode;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use spki::{AlgorithmIdentifierOwned, EncodePublicKey, SubjectPublicKeyInfoOwned};
use std::sync::{Arc, Mutex};
use x509_cert::name::Name;
use x509_cert::request::{CertReq, CertReqInfo, Version as CsrVersion};

use signet_ca::backend::{EphemeralCa, SigningBackend};
use signet_ca::config::{CaConfig, ClientId, IssuerConfig, PolicyConfig};
use signet_ca::ct::{AddChainResponse, CtError, CtLogClient, CtSubmitter};
use signet_ca::oidc::{
    IssuerRegistry, IssuerType, JwksCache, OidcVerifier, RegistryHandle, StaticKeys,
};
use signet_ca::types::{AuditRecord, AuditSink};
use signet_ca::CertificateIssuer;

/// A fake OIDC issuer: an ES256 signing key published through a static
/// JWKS under `issuer_url`.
pub struct TestIssuer {
    pub issuer_url: String,
    secret: p256::SecretKey,
    encoding_key: jsonwebtoken::EncodingKey,
}

impl TestIssuer {
    pub fn new(issuer_url: &str) -> Self {
        let secret = p256::SecretKey::random(&mut OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let encoding_key = jsonwebtoken::EncodingKey::from_ec_pem(pem.as_bytes()).unwrap();
        Self {
            issuer_url: issuer_url.to_string(),
            secret,
            encoding_key,
        }
    }

    /// The issuer's JWKS, as the verifier would fetch it.
    pub fn jwk_set(&self) -> jsonwebtoken::jwk::JwkSet {
        let point = self.secret.public_key().to_encoded_point(false);
        let jwk = serde_json::json!({
            "kty": "EC",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(point.x().unwrap()),
            "y": URL_SAFE_NO_PAD.encode(point.y().unwrap()),
            "kid": "test-key",
            "alg": "ES256",
            "use": "sig",
        });
        serde_json::from_value(serde_json::json!({ "keys": [jwk] })).unwrap()
    }

    /// Sign a token with the given extra claims; `iss`, `aud`, and `exp`
    /// are filled in unless overridden.
    pub fn token(&self, claims: serde_json::Value) -> String {
        let mut claims = claims.as_object().cloned().unwrap_or_default();
        claims
            .entry("iss".to_string())
            .or_insert_with(|| self.issuer_url.clone().into());
        claims
            .entry("aud".to_string())
            .or_insert_with(|| "sigstore".into());
        claims
            .entry("exp".to_string())
            .or_insert_with(|| (chrono::Utc::now().timestamp() + 300).into());
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256);
        header.kid = Some("test-key".to_string());
        jsonwebtoken::encode(&header, &claims, &self.encoding_key).unwrap()
    }
}

/// An issuer config entry for tests.
pub fn issuer_config(issuer_type: IssuerType) -> IssuerConfig {
    IssuerConfig {
        client_id: ClientId::One("sigstore".to_string()),
        issuer_type,
        spiffe_trust_domain: None,
        subject_domain: None,
        issuer_claim: None,
    }
}

/// Audit sink that captures records for assertions.
#[derive(Default)]
pub struct CaptureAudit {
    pub records: Mutex<Vec<AuditRecord>>,
}

impl AuditSink for CaptureAudit {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// CT log double returning a structurally valid SCT and capturing the
/// submitted chains.
#[derive(Default)]
pub struct FakeCtLog {
    pub submissions: Mutex<Vec<Vec<Vec<u8>>>>,
}

#[async_trait]
impl CtLogClient for FakeCtLog {
    async fn add_pre_chain(&self, chain: &[Vec<u8>]) -> Result<AddChainResponse, CtError> {
        self.submissions.lock().unwrap().push(chain.to_vec());
        let mut digitally_signed = vec![4u8, 3, 0, 64];
        digitally_signed.extend_from_slice(&[0x5a; 64]);
        Ok(AddChainResponse {
            sct_version: 0,
            id: BASE64.encode([0x42u8; 32]),
            timestamp: 1_700_000_000_000,
            extensions: String::new(),
            signature: BASE64.encode(digitally_signed),
        })
    }
}

/// CT disposition for a test authority.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CtMode {
    None,
    Embedded,
    Detached,
}

/// Everything a test needs to drive issuance end to end.
pub struct TestAuthority {
    pub issuer: CertificateIssuer,
    pub backend: Arc<EphemeralCa>,
    pub audit: Arc<CaptureAudit>,
    pub ct_log: Arc<FakeCtLog>,
}

/// Build an authority over an ephemeral CA and static JWKS.
pub fn authority(oidc_issuers: Vec<(&TestIssuer, IssuerConfig)>, ct: CtMode) -> TestAuthority {
    let mut config = CaConfig::default();
    let mut keys = StaticKeys::new();
    for (issuer, issuer_config) in &oidc_issuers {
        config
            .oidc_issuers
            .insert(issuer.issuer_url.clone(), issuer_config.clone());
        keys = keys.insert(issuer.issuer_url.clone(), issuer.jwk_set());
    }
    let registry = RegistryHandle::new(IssuerRegistry::from_config(&config));
    let jwks = Arc::new(JwksCache::new(Arc::new(keys)));
    let verifier = OidcVerifier::new(registry, jwks);

    let backend = Arc::new(EphemeralCa::new().unwrap());
    let audit = Arc::new(CaptureAudit::default());
    let ct_log = Arc::new(FakeCtLog::default());
    let submitter = match ct {
        CtMode::None => None,
        CtMode::Embedded => Some(CtSubmitter::new(ct_log.clone(), true)),
        CtMode::Detached => Some(CtSubmitter::new(ct_log.clone(), false)),
    };

    let issuer = CertificateIssuer::new(
        verifier,
        backend.clone(),
        submitter,
        audit.clone(),
        PolicyConfig::default(),
    );
    TestAuthority {
        issuer,
        backend,
        audit,
        ct_log,
    }
}

/// A fresh P-256 keypair with its DER SPKI.
pub fn p256_keypair() -> (p256::ecdsa::SigningKey, Vec<u8>) {
    let key = p256::ecdsa::SigningKey::random(&mut OsRng);
    let spki = key
        .verifying_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    (key, spki)
}

/// Sign `name` as the proof-of-possession challenge.
pub fn sign_challenge(key: &p256::ecdsa::SigningKey, name: &str) -> Vec<u8> {
    use p256::ecdsa::signature::Signer;
    let signature: p256::ecdsa::DerSignature = key.sign(name.as_bytes());
    signature.as_bytes().to_vec()
}

/// A minimal self-signed PKCS#10 CSR for the key (empty subject; the
/// authority ignores CSR names anyway).
pub fn build_csr(key: &p256::ecdsa::SigningKey) -> Vec<u8> {
    use p256::ecdsa::signature::Signer;
    let spki_der = key
        .verifying_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    let info = CertReqInfo {
        version: CsrVersion::V1,
        subject: Name::default(),
        public_key: {
            use der::Decode as _;
            SubjectPublicKeyInfoOwned::from_der(&spki_der).unwrap()
        },
        attributes: Default::default(),
    };
    let message = info.to_der().unwrap();
    let signature: p256::ecdsa::DerSignature = key.sign(&message);
    let csr = CertReq {
        info,
        algorithm: AlgorithmIdentifierOwned {
            oid: der::oid::ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2"),
            parameters: None,
        },
        signature: BitString::from_bytes(signature.as_bytes()).unwrap(),
    };
    csr.to_der().unwrap()
}

/// Verify `leaf` chains to the backend's root: leaf signed by the
/// intermediate, intermediate by the root, root self-signed.
pub fn assert_chains_to_root(leaf_der: &[u8], backend: &EphemeralCa) {
    let chain = backend.chain();
    let (_, leaf) = x509_parser::parse_x509_certificate(leaf_der).unwrap();
    let (_, intermediate) = x509_parser::parse_x509_certificate(chain.signer()).unwrap();
    let (_, root) = x509_parser::parse_x509_certificate(chain.root_public_bytes()).unwrap();

    leaf.verify_signature(Some(intermediate.public_key()))
        .expect("leaf verifies under the intermediate");
    intermediate
        .verify_signature(Some(root.public_key()))
        .expect("intermediate verifies under the root");
    root.verify_signature(None).expect("root is self-signed");
}
