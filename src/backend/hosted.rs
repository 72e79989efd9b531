//! Hosted-CA backend
//!
//! Delegates signing to an upstream issuer (e.g. a cloud certificate
//! authority service). The upstream speaks its own protocol behind the
//! `UpstreamAuthority` port and returns whatever chain it produced; this
//! backend only checks shape.

use async_trait::async_trait;
use std::sync::Arc;

use super::{BackendError, CaChain, SigningBackend};
use crate::template::CertificateTemplate;

/// Port onto an upstream certificate authority.
#[async_trait]
pub trait UpstreamAuthority: Send + Sync {
    /// Issue a certificate for the template; returns the full chain, leaf
    /// first, root last.
    async fn issue(&self, template: &CertificateTemplate) -> Result<Vec<Vec<u8>>, BackendError>;

    /// The authority's CA chain, signer first, root last.
    async fn ca_chain(&self) -> Result<Vec<Vec<u8>>, BackendError>;
}

/// CA that delegates issuance upstream.
pub struct HostedCa {
    upstream: Arc<dyn UpstreamAuthority>,
    chain: CaChain,
}

impl HostedCa {
    /// Fetch the upstream chain once and bind the client.
    pub async fn connect(upstream: Arc<dyn UpstreamAuthority>) -> Result<Self, BackendError> {
        let chain = CaChain::new(upstream.ca_chain().await?)?;
        Ok(Self { upstream, chain })
    }
}

#[async_trait]
impl SigningBackend for HostedCa {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError> {
        let mut chain = self.upstream.issue(template).await?;
        if chain.is_empty() {
            return Err(BackendError::SigningFailed(
                "upstream returned an empty chain".into(),
            ));
        }
        Ok(chain.remove(0))
    }

    fn chain(&self) -> &CaChain {
        &self.chain
    }
}
