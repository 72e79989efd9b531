//! # signet-ca - OIDC-backed code-signing certificate authority
//!
//! signet-ca issues short-lived X.509 code-signing certificates to
//! workloads and humans whose identity is established through OpenID
//! Connect. A client presents an OIDC identity token and proof that it
//! holds a private key; the authority validates both, derives a typed
//! principal from the token, binds the public key to that identity in a
//! certificate signed by the configured CA, optionally obtains a Signed
//! Certificate Timestamp from a Certificate Transparency log, and returns
//! the chain. Nothing is stored: the CT log is the durable record.
//!
//! ## Architecture
//!
//! - `oidc`: token verification, issuer registry, JWKS caching
//! - `identity`: per-issuer-type principal extraction and certificate
//!   shaping (SANs, provenance extensions)
//! - `challenge`: proof-of-possession verification (CSR or signed name)
//! - `template`: unsigned certificate construction
//! - `backend`: pluggable signing backends (ephemeral, file, KMS, PKCS#11,
//!   Tink, hosted)
//! - `ct`: pre-certificate submission and SCT embedding
//! - `issue`: the end-to-end pipeline
//! - `adapters`: stock HTTP implementations of the JWKS and CT-log ports
//!
//! External concerns (transport, configuration loading, metrics sinks,
//! vendor KMS/HSM protocols) stay behind ports so deployments and tests
//! can swap them.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod adapters;
pub mod backend;
pub mod challenge;
pub mod config;
pub mod ct;
pub mod error;
pub mod identity;
pub mod issue;
pub mod oidc;
pub mod template;
pub mod types;

pub use config::CaConfig;
pub use error::{ErrorClass, IssuanceError, Result};
pub use issue::CertificateIssuer;
pub use types::{IssueRequest, KeyMaterial, SignedArtifact};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{CaBackend, CaChain, SigningBackend};
    pub use crate::config::CaConfig;
    pub use crate::ct::CtSubmitter;
    pub use crate::error::{ErrorClass, IssuanceError, Result};
    pub use crate::identity::Principal;
    pub use crate::issue::CertificateIssuer;
    pub use crate::oidc::{IssuerRegistry, JwksCache, OidcVerifier, RegistryHandle};
    pub use crate::types::{AuditSink, IssueRequest, KeyMaterial, SignedArtifact, TracingAudit};
}
