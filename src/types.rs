//! Common value objects used throughout the signet-ca crate
//!
//! Everything here is an immutable, request-scoped value: created while an
//! issuance request is being processed and dropped when the response is sent.
//! The authority keeps no durable record of issued material; the CT log is
//! the durable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Key material submitted by a client alongside its OIDC token.
///
/// Either a bare public key (with the proof of possession carried separately
/// in the request) or a PKCS#10 CSR whose self-signature doubles as the
/// proof.
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    /// A public key, PEM or DER encoded SubjectPublicKeyInfo.
    PublicKey {
        /// Client-declared algorithm hint (e.g. "ECDSA"); informational only,
        /// the key is always parsed from `content`.
        algorithm: Option<String>,
        /// PEM or DER SubjectPublicKeyInfo bytes.
        content: Vec<u8>,
    },
    /// A PKCS#10 certificate signing request, PEM or DER encoded. Only the
    /// embedded public key is trusted; subject and SANs are ignored.
    CertificateSigningRequest(Vec<u8>),
}

/// A single certificate issuance request.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// The bearer OIDC identity token, compact serialized.
    pub oidc_token: String,
    /// Public key or CSR.
    pub key: KeyMaterial,
    /// Signature over the UTF-8 bytes of the principal name. Required on the
    /// public-key path, ignored on the CSR path.
    pub proof_of_possession: Option<Vec<u8>>,
}

/// The signed output of an issuance: leaf, issuing chain, and the SCT when
/// the log returned one that was not embedded in the leaf.
#[derive(Debug, Clone)]
pub struct SignedArtifact {
    /// DER-encoded leaf certificate.
    pub leaf: Vec<u8>,
    /// DER-encoded issuing chain, signer first, root last.
    pub chain: Vec<Vec<u8>>,
    /// Detached SCT bytes (TLS-serialized). `None` when the SCT was embedded
    /// in the leaf or no CT log is configured.
    pub detached_sct: Option<Vec<u8>>,
}

impl SignedArtifact {
    /// The full chain as PEM blocks, leaf first.
    pub fn pem_chain(&self) -> Vec<String> {
        std::iter::once(&self.leaf)
            .chain(self.chain.iter())
            .map(|der| pem::encode(&pem::Pem::new("CERTIFICATE", der.clone())))
            .collect()
    }
}

/// Audit record emitted after every successful issuance.
///
/// Deliberately excludes the raw token and all key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Issuer URL the identity was established against.
    pub issuer: String,
    /// Principal name bound into the certificate.
    pub subject: String,
    /// Leaf serial number, lowercase hex.
    pub serial: String,
    /// SHA-256 fingerprint of the DER leaf, lowercase hex.
    pub fingerprint: String,
    /// CT log id (SHA-256 of the log key), lowercase hex, when CT was used.
    pub sct_log_id: Option<String>,
    /// CT log timestamp in milliseconds since the epoch, when CT was used.
    pub sct_timestamp: Option<u64>,
    /// When the leaf was issued.
    pub issued_at: DateTime<Utc>,
}

/// Sink for audit records. Injected into the orchestrator so deployments can
/// route records to their own pipeline and tests can capture them.
pub trait AuditSink: Send + Sync {
    /// Record one issuance.
    fn record(&self, record: &AuditRecord);
}

/// Default audit sink: structured `tracing` events at INFO.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            issuer = %record.issuer,
            subject = %record.subject,
            serial = %record.serial,
            fingerprint = %record.fingerprint,
            sct_log_id = record.sct_log_id.as_deref().unwrap_or(""),
            sct_timestamp = record.sct_timestamp.unwrap_or(0),
            "certificate issued"
        );
    }
}

/// Per-request deadline. Every suspension point (JWKS fetch, backend sign,
/// CT submission) is bounded by the time remaining on the request.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

/// A deadline elapsed before the awaited I/O completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded;

impl fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request deadline exceeded")
    }
}

impl std::error::Error for DeadlineExceeded {}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time remaining, zero once the deadline has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Run `fut` under the remaining budget. The in-flight future is dropped
    /// (abandoned) on expiry; no partial results are observed.
    pub async fn bound<F>(&self, fut: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: std::future::Future,
    {
        tokio::time::timeout(self.remaining(), fut)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}
