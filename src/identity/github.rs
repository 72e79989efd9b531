//! GitHub Actions workflow principal extraction
//!
//! The SAN is the workflow URI built from `job_workflow_ref`; the
//! provenance extensions carry both the legacy raw-UTF-8 arc entries and
//! the structured DER `UTF8String` set.

use serde::Deserialize;

use super::{oids, CertExtension, ExtensionSet, ExtractError, SubjectAltName};
use crate::oidc::Claims;

const DEFAULT_SERVER_URL: &str = "https://github.com";

/// Claims a GitHub Actions OIDC token must carry for issuance.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubWorkflowPrincipal {
    /// The token `sub`; also the challenge value.
    #[serde(rename = "sub")]
    pub subject: String,
    /// Workflow file reference, `owner/repo/.github/workflows/x.yml@ref`.
    pub job_workflow_ref: String,
    /// Commit SHA the run was triggered on.
    pub sha: String,
    /// Trigger event name.
    pub event_name: String,
    /// `owner/repo`.
    pub repository: String,
    /// Workflow name.
    pub workflow: String,
    /// Git ref of the run.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Repository owner login.
    pub repository_owner: String,
    /// Stable repository owner id.
    pub repository_owner_id: String,
    /// Stable repository id.
    pub repository_id: String,
    /// Run id.
    pub run_id: String,
    /// Run attempt.
    pub run_attempt: String,
    /// `public` or `private`.
    pub repository_visibility: String,
    /// `branch` or `tag`.
    pub ref_type: String,
    /// `github-hosted` or `self-hosted`.
    pub runner_environment: String,
    /// SHA of the reusable workflow file, when present.
    #[serde(default)]
    pub job_workflow_sha: Option<String>,
    /// Ref of the top-level workflow file, when present.
    #[serde(default)]
    pub workflow_ref: Option<String>,
    /// SHA of the top-level workflow file, when present.
    #[serde(default)]
    pub workflow_sha: Option<String>,
    /// GitHub server URL; defaults to github.com for tokens that omit it.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Captured separately; not part of the token claim set.
    #[serde(skip)]
    pub issuer: String,
}

pub(super) fn extract(claims: &Claims) -> Result<GithubWorkflowPrincipal, ExtractError> {
    let value = serde_json::Value::Object(claims.raw.clone());
    let mut principal: GithubWorkflowPrincipal =
        serde_json::from_value(value).map_err(|e| missing_or_invalid(&e))?;
    principal.issuer = claims.issuer.clone();
    Ok(principal)
}

/// serde reports absent fields as "missing field `x`"; surface those as the
/// dedicated error case.
fn missing_or_invalid(err: &serde_json::Error) -> ExtractError {
    let text = err.to_string();
    match text.strip_prefix("missing field `") {
        Some(rest) => {
            let field = rest.split('`').next().unwrap_or("unknown").to_string();
            ExtractError::MissingRequiredClaim(field)
        }
        None => ExtractError::InvalidClaims(text),
    }
}

impl GithubWorkflowPrincipal {
    fn server_url(&self) -> &str {
        self.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }

    /// The workflow URI: `{server}/{job_workflow_ref}`.
    pub fn workflow_uri(&self) -> String {
        format!("{}/{}", self.server_url(), self.job_workflow_ref)
    }

    /// A single URI SAN carrying the workflow URI.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(self.workflow_uri())]
    }

    /// Legacy arc entries, then the structured provenance set.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let server = self.server_url();
        let mut set = ExtensionSet::new();
        set.raw(oids::OID_ISSUER_LEGACY, &self.issuer)
            .raw(oids::OID_GITHUB_WORKFLOW_TRIGGER, &self.event_name)
            .raw(oids::OID_GITHUB_WORKFLOW_SHA, &self.sha)
            .raw(oids::OID_GITHUB_WORKFLOW_NAME, &self.workflow)
            .raw(oids::OID_GITHUB_WORKFLOW_REPOSITORY, &self.repository)
            .raw(oids::OID_GITHUB_WORKFLOW_REF, &self.git_ref);
        set.utf8(oids::OID_ISSUER, &self.issuer)?;
        set.utf8(oids::OID_BUILD_SIGNER_URI, &self.workflow_uri())?;
        set.utf8_opt(
            oids::OID_BUILD_SIGNER_DIGEST,
            self.job_workflow_sha.as_deref(),
        )?;
        set.utf8(oids::OID_RUNNER_ENVIRONMENT, &self.runner_environment)?;
        set.utf8(
            oids::OID_SOURCE_REPOSITORY_URI,
            &format!("{server}/{}", self.repository),
        )?;
        set.utf8(oids::OID_SOURCE_REPOSITORY_DIGEST, &self.sha)?;
        set.utf8(oids::OID_SOURCE_REPOSITORY_REF, &self.git_ref)?;
        set.utf8(oids::OID_SOURCE_REPOSITORY_IDENTIFIER, &self.repository_id)?;
        set.utf8(
            oids::OID_SOURCE_REPOSITORY_OWNER_URI,
            &format!("{server}/{}", self.repository_owner),
        )?;
        set.utf8(
            oids::OID_SOURCE_REPOSITORY_OWNER_IDENTIFIER,
            &self.repository_owner_id,
        )?;
        if let Some(workflow_ref) = &self.workflow_ref {
            set.utf8(
                oids::OID_BUILD_CONFIG_URI,
                &format!("{server}/{workflow_ref}"),
            )?;
        }
        set.utf8_opt(oids::OID_BUILD_CONFIG_DIGEST, self.workflow_sha.as_deref())?;
        set.utf8(oids::OID_BUILD_TRIGGER, &self.event_name)?;
        set.utf8(
            oids::OID_RUN_INVOCATION_URI,
            &format!(
                "{server}/{}/actions/runs/{}/attempts/{}",
                self.repository, self.run_id, self.run_attempt
            ),
        )?;
        set.utf8(
            oids::OID_SOURCE_REPOSITORY_VISIBILITY,
            &self.repository_visibility,
        )?;
        Ok(set.build())
    }
}
