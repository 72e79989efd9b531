//! Issuance orchestration
//!
//! The end-to-end pipeline: verify token, resolve the issuer, extract the
//! principal, verify proof of possession, build the template, sign (through
//! the pre-certificate path when CT is configured), and emit the audit
//! record. Each issuance is a short-lived, stateless pipeline; concurrent
//! requests share only the verifier's caches and the backend's key handle.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::SigningBackend;
use crate::challenge;
use crate::config::PolicyConfig;
use crate::ct::{CtSubmitter, Sct};
use crate::error::{IssuanceError, Result};
use crate::identity::Principal;
use crate::oidc::OidcVerifier;
use crate::template::CertificateTemplate;
use crate::types::{AuditRecord, AuditSink, Deadline, IssueRequest, SignedArtifact};

/// Default per-request budget covering all suspension points.
pub const DEFAULT_REQUEST_BUDGET: Duration = Duration::from_secs(30);

/// The issuance orchestrator.
pub struct CertificateIssuer {
    verifier: OidcVerifier,
    backend: Arc<dyn SigningBackend>,
    ct: Option<CtSubmitter>,
    audit: Arc<dyn AuditSink>,
    policy: PolicyConfig,
    request_budget: Duration,
}

impl CertificateIssuer {
    /// Assemble the pipeline. `ct` is `None` when no log is configured.
    pub fn new(
        verifier: OidcVerifier,
        backend: Arc<dyn SigningBackend>,
        ct: Option<CtSubmitter>,
        audit: Arc<dyn AuditSink>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            verifier,
            backend,
            ct,
            audit,
            policy,
            request_budget: DEFAULT_REQUEST_BUDGET,
        }
    }

    /// Override the per-request deadline budget.
    pub fn with_request_budget(mut self, budget: Duration) -> Self {
        self.request_budget = budget;
        self
    }

    /// The configured chain as PEM, for the trust-bundle API.
    pub fn trust_bundle(&self) -> String {
        self.backend.trust_bundle()
    }

    /// Issue one certificate.
    pub async fn issue(&self, request: &IssueRequest) -> Result<SignedArtifact> {
        let deadline = Deadline::after(self.request_budget);

        let (claims, descriptor) = self
            .verifier
            .verify(&request.oidc_token, &deadline)
            .await?;
        let principal = Principal::extract(&claims, &descriptor)?;
        tracing::debug!(
            issuer = %principal.issuer(),
            subject = %principal.name(),
            "identity established"
        );

        let subject_key = challenge::verify_proof(
            &request.key,
            principal.name(),
            request.proof_of_possession.as_deref(),
        )?;
        let spki_der = subject_key.spki_der()?;

        let template =
            CertificateTemplate::build(&principal, spki_der, Utc::now(), &self.policy)?;
        let serial = template.serial_hex();

        let (artifact, sct) = match &self.ct {
            Some(ct) => self.sign_with_ct(ct, template, &deadline).await?,
            None => (self.sign_plain(template, &deadline).await?, None),
        };

        self.audit.record(&AuditRecord {
            issuer: principal.issuer().to_string(),
            subject: principal.name().to_string(),
            serial,
            fingerprint: hex::encode(Sha256::digest(&artifact.leaf)),
            sct_log_id: sct.as_ref().map(|s| hex::encode(s.log_id)),
            sct_timestamp: sct.as_ref().map(|s| s.timestamp),
            issued_at: Utc::now(),
        });

        Ok(artifact)
    }

    /// Sign without CT: one signature, no SCT anywhere.
    async fn sign_plain(
        &self,
        template: CertificateTemplate,
        deadline: &Deadline,
    ) -> Result<SignedArtifact> {
        let leaf = self.sign_bounded(&template, deadline).await?;
        Ok(SignedArtifact {
            leaf,
            chain: self.backend.chain().certs().to_vec(),
            detached_sct: None,
        })
    }

    /// The CT path: pre-cert, submission, then the final certificate with
    /// the SCT embedded or detached per policy.
    async fn sign_with_ct(
        &self,
        ct: &CtSubmitter,
        template: CertificateTemplate,
        deadline: &Deadline,
    ) -> Result<(SignedArtifact, Option<Sct>)> {
        let precert = self
            .sign_bounded(&template.clone().into_precert(), deadline)
            .await?;
        let mut submission = vec![precert];
        submission.extend(self.backend.chain().certs().iter().cloned());
        let sct = ct.submit(&submission, deadline).await?;

        let chain = self.backend.chain().certs().to_vec();
        let artifact = if ct.embeds() {
            let leaf = self
                .sign_bounded(&template.with_sct(sct.extension_der.clone()), deadline)
                .await?;
            SignedArtifact {
                leaf,
                chain,
                detached_sct: None,
            }
        } else {
            let leaf = self.sign_bounded(&template, deadline).await?;
            SignedArtifact {
                leaf,
                chain,
                detached_sct: Some(sct.raw.clone()),
            }
        };
        Ok((artifact, Some(sct)))
    }

    async fn sign_bounded(
        &self,
        template: &CertificateTemplate,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        let signed = deadline
            .bound(self.backend.sign(template))
            .await
            .map_err(|_| IssuanceError::DeadlineExceeded)??;
        Ok(signed)
    }
}
