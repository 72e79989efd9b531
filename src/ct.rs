//! Certificate Transparency submission
//!
//! When a log is configured, the backend first signs a pre-certificate
//! carrying the critical poison extension; the submitter posts the pre-cert
//! chain to the log and receives an SCT; the final certificate is then
//! re-signed with the SCT list embedded (or the SCT is returned detached,
//! per policy). Poison and SCT never appear in the same certificate.
//!
//! Retriable submission failures are retried with exponential backoff
//! (200 ms base, 3 s cap, 3 attempts); exhaustion aborts issuance.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use der::Encode;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tls_codec::{SerializeBytes, TlsByteVecU16};
use x509_cert::ext::pkix::sct::{
    DigitallySigned, HashAlgorithm, LogId, SerializedSct, SignatureAlgorithm,
    SignatureAndHashAlgorithm, SignedCertificateTimestamp, SignedCertificateTimestampList,
    Version as SctVersion,
};

use crate::types::Deadline;

const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_CAP: Duration = Duration::from_secs(3);
const MAX_ATTEMPTS: u32 = 3;

/// CT submission errors.
#[derive(Debug, Error)]
pub enum CtError {
    /// The log refused the submission; retrying will not help.
    #[error("CT log rejected the submission: {0}")]
    Rejected(String),

    /// The log could not be reached or answered with a server error.
    /// Retriable.
    #[error("CT log unavailable: {0}")]
    Transient(String),

    /// The log answered with an SCT this authority cannot parse.
    #[error("invalid SCT from log: {0}")]
    InvalidSct(String),
}

/// The JSON body of a successful `add-pre-chain` call (RFC 6962 §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddChainResponse {
    /// SCT version; must be 0 (v1).
    pub sct_version: u8,
    /// Base64 log id (SHA-256 of the log's public key).
    pub id: String,
    /// Milliseconds since the epoch.
    pub timestamp: u64,
    /// Base64 opaque extensions, usually empty.
    #[serde(default)]
    pub extensions: String,
    /// Base64 TLS `DigitallySigned` over the SCT payload.
    pub signature: String,
}

/// Port onto a CT log. Implementations own the HTTP transport.
#[async_trait]
pub trait CtLogClient: Send + Sync {
    /// Submit a pre-certificate chain (pre-cert first, then the issuing
    /// chain) and return the log's SCT.
    async fn add_pre_chain(&self, chain: &[Vec<u8>]) -> Result<AddChainResponse, CtError>;
}

/// A signed certificate timestamp, in the forms issuance needs.
#[derive(Debug, Clone)]
pub struct Sct {
    /// TLS-serialized SCT structure, for detached return and audit.
    pub raw: Vec<u8>,
    /// DER `SignedCertificateTimestampList`, ready to embed as the SCT
    /// extension value.
    pub extension_der: Vec<u8>,
    /// Log id.
    pub log_id: [u8; 32],
    /// Log timestamp in milliseconds.
    pub timestamp: u64,
}

/// Submits pre-certificates and shapes the returned SCT.
pub struct CtSubmitter {
    client: Arc<dyn CtLogClient>,
    embed: bool,
    expected_log_id: Option<[u8; 32]>,
}

impl CtSubmitter {
    /// Submitter over a log client. `embed` selects embedded vs detached
    /// SCT disposition.
    pub fn new(client: Arc<dyn CtLogClient>, embed: bool) -> Self {
        Self {
            client,
            embed,
            expected_log_id: None,
        }
    }

    /// Submitter for a `[ct]` config section: embed policy from the
    /// config, log id pinned to the configured public key.
    pub fn from_config(
        config: &crate::config::CtConfig,
        client: Arc<dyn CtLogClient>,
    ) -> Result<Self, CtError> {
        Self::new(client, config.embed_sct).with_log_public_key_pem(&config.public_key)
    }

    /// Pin the log's PEM public key; SCTs whose log id is not the SHA-256
    /// of this key are rejected.
    pub fn with_log_public_key_pem(mut self, public_key_pem: &str) -> Result<Self, CtError> {
        let block = pem::parse(public_key_pem)
            .map_err(|e| CtError::InvalidSct(format!("bad log public key PEM: {e}")))?;
        let digest: [u8; 32] = sha2::Sha256::digest(block.contents()).into();
        self.expected_log_id = Some(digest);
        Ok(self)
    }

    /// Whether SCTs are embedded into the final certificate.
    pub fn embeds(&self) -> bool {
        self.embed
    }

    /// Submit the pre-cert chain, retrying transient failures, and return
    /// the SCT.
    pub async fn submit(
        &self,
        precert_chain: &[Vec<u8>],
        deadline: &Deadline,
    ) -> Result<Sct, CtError> {
        let mut delay = BACKOFF_BASE;
        let mut attempt = 1;
        let response = loop {
            let result = deadline
                .bound(self.client.add_pre_chain(precert_chain))
                .await
                .unwrap_or_else(|_| Err(CtError::Transient("submission timed out".into())));
            match result {
                Ok(response) => break response,
                Err(CtError::Transient(reason)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, %reason, "retrying CT submission");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_CAP);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };
        let sct = build_sct(&response)?;
        if let Some(expected) = self.expected_log_id {
            if sct.log_id != expected {
                return Err(CtError::InvalidSct(
                    "SCT log id does not match the configured log key".into(),
                ));
            }
        }
        Ok(sct)
    }
}

/// Validate the log response and produce both SCT encodings.
fn build_sct(response: &AddChainResponse) -> Result<Sct, CtError> {
    if response.sct_version != 0 {
        return Err(CtError::InvalidSct(format!(
            "unsupported SCT version {}",
            response.sct_version
        )));
    }
    let log_id: [u8; 32] = BASE64
        .decode(&response.id)
        .map_err(|e| CtError::InvalidSct(format!("log id: {e}")))?
        .try_into()
        .map_err(|_| CtError::InvalidSct("log id is not 32 bytes".into()))?;
    let extensions = BASE64
        .decode(&response.extensions)
        .map_err(|e| CtError::InvalidSct(format!("extensions: {e}")))?;
    let signature = BASE64
        .decode(&response.signature)
        .map_err(|e| CtError::InvalidSct(format!("signature: {e}")))?;

    let sct = SignedCertificateTimestamp {
        version: SctVersion::V1,
        log_id: LogId { key_id: log_id },
        timestamp: response.timestamp,
        extensions: TlsByteVecU16::from_slice(&extensions),
        signature: parse_digitally_signed(&signature)?,
    };
    let raw = sct
        .tls_serialize()
        .map_err(|e| CtError::InvalidSct(format!("SCT serialization: {e:?}")))?;
    let serialized =
        SerializedSct::new(sct).map_err(|e| CtError::InvalidSct(format!("SCT framing: {e:?}")))?;
    let list = SignedCertificateTimestampList::new(&[serialized])
        .map_err(|e| CtError::InvalidSct(format!("SCT list: {e:?}")))?;
    let extension_der = list
        .to_der()
        .map_err(|e| CtError::InvalidSct(format!("SCT list DER: {e}")))?;

    Ok(Sct {
        raw,
        extension_der,
        log_id,
        timestamp: response.timestamp,
    })
}

/// TLS `DigitallySigned`: hash(1) + signature algorithm(1) + length(2) +
/// signature bytes.
fn parse_digitally_signed(bytes: &[u8]) -> Result<DigitallySigned, CtError> {
    if bytes.len() < 4 {
        return Err(CtError::InvalidSct("signature too short".into()));
    }
    let hash = match bytes[0] {
        4 => HashAlgorithm::Sha256,
        5 => HashAlgorithm::Sha384,
        6 => HashAlgorithm::Sha512,
        other => {
            return Err(CtError::InvalidSct(format!(
                "unsupported hash algorithm {other}"
            )))
        }
    };
    let algorithm = match bytes[1] {
        1 => SignatureAlgorithm::Rsa,
        3 => SignatureAlgorithm::Ecdsa,
        other => {
            return Err(CtError::InvalidSct(format!(
                "unsupported signature algorithm {other}"
            )))
        }
    };
    let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if bytes.len() != 4 + length {
        return Err(CtError::InvalidSct("signature length mismatch".into()));
    }
    Ok(DigitallySigned {
        algorithm: SignatureAndHashAlgorithm {
            hash,
            signature: algorithm,
        },
        signature: TlsByteVecU16::from_slice(&bytes[4..]),
    })
}
