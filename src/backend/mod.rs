//! Signing backends
//!
//! A backend turns an unsigned `CertificateTemplate` into a signed DER
//! leaf and exposes the issuing chain. Backends differ only in where the
//! signing key lives: process memory (`ephemeral`), disk (`fileca`), a
//! cloud KMS or PKCS#11 HSM behind a digest-signing oracle port (`kms`,
//! `pkcs11`), an AEAD-wrapped Tink keyset (`tink`), or an upstream hosted
//! CA (`hosted`).
//!
//! Every backend signs pre-certificates when the template carries the CT
//! poison extension and is safe for concurrent use: signers are either
//! stateless values or oracle clients that multiplex requests themselves.

pub mod ephemeral;
pub mod fileca;
pub mod hosted;
pub mod kms;
pub(crate) mod local;
pub mod pkcs11;
pub mod tink;

use async_trait::async_trait;
use secrecy::SecretString;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::CaBackendConfig;
use crate::template::CertificateTemplate;

pub use ephemeral::EphemeralCa;
pub use fileca::FileCa;
pub use hosted::{HostedCa, UpstreamAuthority};
pub use kms::{KmsCa, KmsSigner};
pub use pkcs11::{Pkcs11Ca, Pkcs11Session};
pub use tink::{KeysetAead, TinkCa};

/// Signing backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The signing operation itself failed; indicates a bug or corrupt
    /// state, not a transient condition.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// The backend could not be reached or rate-limited the call.
    /// Retriable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The signing key exists but is not usable yet (still provisioning,
    /// not yet unwrapped). Retriable.
    #[error("signing key not ready: {0}")]
    KeyNotReady(String),
}

/// The issuing chain, signer first, root last. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct CaChain {
    certs: Vec<Vec<u8>>,
}

impl CaChain {
    /// A chain from DER certificates, signer first, root last.
    pub fn new(certs: Vec<Vec<u8>>) -> Result<Self, BackendError> {
        if certs.is_empty() {
            return Err(BackendError::KeyNotReady("empty CA chain".into()));
        }
        Ok(Self { certs })
    }

    /// Parse a PEM bundle into a chain, preserving order.
    pub fn from_pem(text: &str) -> Result<Self, BackendError> {
        let blocks = pem::parse_many(text)
            .map_err(|e| BackendError::KeyNotReady(format!("bad chain PEM: {e}")))?;
        let certs: Vec<Vec<u8>> = blocks
            .into_iter()
            .filter(|b| b.tag() == "CERTIFICATE")
            .map(|b| b.contents().to_vec())
            .collect();
        Self::new(certs)
    }

    /// DER certificates, signer first.
    pub fn certs(&self) -> &[Vec<u8>] {
        &self.certs
    }

    /// The certificate of the key that signs leaves.
    pub fn signer(&self) -> &[u8] {
        &self.certs[0]
    }

    /// The root certificate in DER, for the public trust-bundle API.
    pub fn root_public_bytes(&self) -> &[u8] {
        self.certs.last().expect("chain is never empty")
    }

    /// The whole chain as a PEM bundle.
    pub fn to_pem(&self) -> String {
        self.certs
            .iter()
            .map(|der| pem::encode(&pem::Pem::new("CERTIFICATE", der.clone())))
            .collect()
    }
}

/// Uniform contract over all signing backends.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Sign a template into a DER leaf certificate.
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError>;

    /// The issuing chain, signer first, root last.
    fn chain(&self) -> &CaChain;

    /// The chain as a PEM bundle, for the trust-bundle API.
    fn trust_bundle(&self) -> String {
        self.chain().to_pem()
    }
}

/// The closed set of signing backends. Each variant owns its own state;
/// construct the variant directly and wrap it.
pub enum CaBackend {
    /// In-memory development CA.
    Ephemeral(EphemeralCa),
    /// On-disk chain and key.
    File(FileCa),
    /// Cloud KMS oracle.
    Kms(KmsCa),
    /// PKCS#11 HSM oracle.
    Pkcs11(Pkcs11Ca),
    /// AEAD-wrapped Tink keyset.
    Tink(TinkCa),
    /// Upstream hosted CA.
    Hosted(HostedCa),
}

#[async_trait]
impl SigningBackend for CaBackend {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError> {
        match self {
            Self::Ephemeral(b) => b.sign(template).await,
            Self::File(b) => b.sign(template).await,
            Self::Kms(b) => b.sign(template).await,
            Self::Pkcs11(b) => b.sign(template).await,
            Self::Tink(b) => b.sign(template).await,
            Self::Hosted(b) => b.sign(template).await,
        }
    }

    fn chain(&self) -> &CaChain {
        match self {
            Self::Ephemeral(b) => b.chain(),
            Self::File(b) => b.chain(),
            Self::Kms(b) => b.chain(),
            Self::Pkcs11(b) => b.chain(),
            Self::Tink(b) => b.chain(),
            Self::Hosted(b) => b.chain(),
        }
    }
}

/// Injected oracle clients for the backends that delegate cryptography.
/// Only the client matching the configured backend is consulted.
#[derive(Default)]
pub struct BackendClients {
    /// KMS signing oracle, for the `kms` backend.
    pub kms: Option<Arc<dyn KmsSigner>>,
    /// HSM session, for the `pkcs11` backend.
    pub pkcs11: Option<Arc<dyn Pkcs11Session>>,
    /// Keyset-unwrapping AEAD, for the `tink` backend.
    pub keyset_aead: Option<Arc<dyn KeysetAead>>,
    /// Upstream authority client, for the `hosted` backend.
    pub upstream: Option<Arc<dyn UpstreamAuthority>>,
    /// Password for the `file` backend's encrypted key, when applicable.
    pub key_password: Option<SecretString>,
}

impl CaBackend {
    /// Construct the configured backend. Oracle-backed variants require the
    /// matching client in `clients`.
    pub async fn from_config(
        config: &CaBackendConfig,
        clients: BackendClients,
    ) -> Result<Self, BackendError> {
        match config {
            CaBackendConfig::Ephemeral => Ok(EphemeralCa::new()?.into()),
            CaBackendConfig::File { chain, key } => {
                Ok(FileCa::load(chain, key, clients.key_password)?.into())
            }
            CaBackendConfig::Kms { chain } => {
                let signer = clients.kms.ok_or_else(|| missing_client("KMS signer"))?;
                Ok(KmsCa::new(signer, load_chain(chain)?)?.into())
            }
            CaBackendConfig::Pkcs11 { chain } => {
                let session = clients
                    .pkcs11
                    .ok_or_else(|| missing_client("PKCS#11 session"))?;
                Ok(Pkcs11Ca::new(session, load_chain(chain)?)?.into())
            }
            CaBackendConfig::Tink { keyset, chain } => {
                let aead = clients
                    .keyset_aead
                    .ok_or_else(|| missing_client("keyset AEAD"))?;
                let keyset_json = std::fs::read_to_string(keyset)
                    .map_err(|e| BackendError::KeyNotReady(format!("keyset unreadable: {e}")))?;
                Ok(TinkCa::load(&keyset_json, aead.as_ref(), load_chain(chain)?)
                    .await?
                    .into())
            }
            CaBackendConfig::Hosted => {
                let upstream = clients
                    .upstream
                    .ok_or_else(|| missing_client("upstream authority"))?;
                Ok(HostedCa::connect(upstream).await?.into())
            }
        }
    }
}

fn load_chain(path: &Path) -> Result<CaChain, BackendError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| BackendError::KeyNotReady(format!("chain unreadable: {e}")))?;
    CaChain::from_pem(&pem)
}

fn missing_client(what: &str) -> BackendError {
    BackendError::KeyNotReady(format!("{what} was not provided"))
}

impl From<EphemeralCa> for CaBackend {
    fn from(backend: EphemeralCa) -> Self {
        Self::Ephemeral(backend)
    }
}

impl From<FileCa> for CaBackend {
    fn from(backend: FileCa) -> Self {
        Self::File(backend)
    }
}

impl From<KmsCa> for CaBackend {
    fn from(backend: KmsCa) -> Self {
        Self::Kms(backend)
    }
}

impl From<Pkcs11Ca> for CaBackend {
    fn from(backend: Pkcs11Ca) -> Self {
        Self::Pkcs11(backend)
    }
}

impl From<TinkCa> for CaBackend {
    fn from(backend: TinkCa) -> Self {
        Self::Tink(backend)
    }
}

impl From<HostedCa> for CaBackend {
    fn from(backend: HostedCa) -> Self {
        Self::Hosted(backend)
    }
}
