//! CI-service principal extraction: Buildkite, GitLab, Codefresh, Chainguard
//!
//! Each service has its own claim vocabulary; the SAN URIs and provenance
//! sets follow the service's published token layout.

use url::Url;

use super::{oids, CertExtension, ExtensionSet, ExtractError, SubjectAltName};
use crate::oidc::Claims;

const BUILDKITE_URL: &str = "https://buildkite.com";
const CODEFRESH_URL: &str = "https://g.codefresh.io";

/// A Buildkite job, identified by organization and pipeline.
#[derive(Debug, Clone)]
pub struct BuildkiteJobPrincipal {
    /// The token `sub`; also the challenge value.
    pub subject: String,
    /// Organization slug.
    pub organization_slug: String,
    /// Pipeline slug.
    pub pipeline_slug: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract_buildkite(claims: &Claims) -> Result<BuildkiteJobPrincipal, ExtractError> {
    Ok(BuildkiteJobPrincipal {
        subject: claims.subject.clone(),
        organization_slug: super::require_str(claims, "organization_slug")?.to_string(),
        pipeline_slug: super::require_str(claims, "pipeline_slug")?.to_string(),
        issuer: claims.issuer.clone(),
    })
}

impl BuildkiteJobPrincipal {
    /// A single URI SAN naming the pipeline.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(format!(
            "{BUILDKITE_URL}/{}/{}",
            self.organization_slug, self.pipeline_slug
        ))]
    }

    /// Issuer provenance only.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        Ok(set.build())
    }
}

/// A GitLab CI pipeline run.
#[derive(Debug, Clone)]
pub struct GitlabPipelinePrincipal {
    /// The token `sub`; also the challenge value.
    pub subject: String,
    /// `group/project`.
    pub project_path: String,
    /// CI config reference, `host/path//file@ref`.
    pub ci_config_ref_uri: String,
    /// SHA of the CI config file.
    pub ci_config_sha: String,
    /// Commit being built.
    pub sha: String,
    /// Ref being built.
    pub git_ref: String,
    /// `branch` or `tag`.
    pub ref_type: String,
    /// Event that created the pipeline.
    pub pipeline_source: String,
    /// `gitlab-hosted` or `self-hosted`.
    pub runner_environment: String,
    /// Project visibility.
    pub project_visibility: String,
    /// Stable project id.
    pub project_id: String,
    /// Stable namespace id.
    pub namespace_id: String,
    /// Job id.
    pub job_id: String,
    /// Server origin derived from the issuer, e.g. `https://gitlab.com`.
    pub server_url: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract_gitlab(claims: &Claims) -> Result<GitlabPipelinePrincipal, ExtractError> {
    let issuer_origin = Url::parse(&claims.issuer)
        .ok()
        .and_then(|u| u.host_str().map(|h| format!("{}://{}", u.scheme(), h)))
        .ok_or_else(|| ExtractError::InvalidClaims("issuer is not a URL".into()))?;
    Ok(GitlabPipelinePrincipal {
        subject: claims.subject.clone(),
        project_path: super::require_str(claims, "project_path")?.to_string(),
        ci_config_ref_uri: super::require_str(claims, "ci_config_ref_uri")?.to_string(),
        ci_config_sha: super::require_str(claims, "ci_config_sha")?.to_string(),
        sha: super::require_str(claims, "sha")?.to_string(),
        git_ref: super::require_str(claims, "ref")?.to_string(),
        ref_type: super::require_str(claims, "ref_type")?.to_string(),
        pipeline_source: super::require_str(claims, "pipeline_source")?.to_string(),
        runner_environment: super::require_str(claims, "runner_environment")?.to_string(),
        project_visibility: super::require_str(claims, "project_visibility")?.to_string(),
        project_id: super::require_str(claims, "project_id")?.to_string(),
        namespace_id: super::require_str(claims, "namespace_id")?.to_string(),
        job_id: super::require_str(claims, "job_id")?.to_string(),
        server_url: issuer_origin,
        issuer: claims.issuer.clone(),
    })
}

impl GitlabPipelinePrincipal {
    /// The CI config URI the pipeline ran under.
    pub fn config_uri(&self) -> String {
        format!("https://{}", self.ci_config_ref_uri)
    }

    /// A single URI SAN naming the CI config at ref.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(self.config_uri())]
    }

    /// Issuer plus the structured provenance set.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        set.utf8(oids::OID_BUILD_SIGNER_URI, &self.config_uri())?;
        set.utf8(oids::OID_BUILD_SIGNER_DIGEST, &self.ci_config_sha)?;
        set.utf8(oids::OID_RUNNER_ENVIRONMENT, &self.runner_environment)?;
        set.utf8(
            oids::OID_SOURCE_REPOSITORY_URI,
            &format!("{}/{}", self.server_url, self.project_path),
        )?;
        set.utf8(oids::OID_SOURCE_REPOSITORY_DIGEST, &self.sha)?;
        set.utf8(oids::OID_SOURCE_REPOSITORY_REF, &self.git_ref)?;
        set.utf8(oids::OID_SOURCE_REPOSITORY_IDENTIFIER, &self.project_id)?;
        set.utf8(
            oids::OID_SOURCE_REPOSITORY_OWNER_IDENTIFIER,
            &self.namespace_id,
        )?;
        set.utf8(oids::OID_BUILD_CONFIG_URI, &self.config_uri())?;
        set.utf8(oids::OID_BUILD_CONFIG_DIGEST, &self.ci_config_sha)?;
        set.utf8(oids::OID_BUILD_TRIGGER, &self.pipeline_source)?;
        set.utf8(
            oids::OID_RUN_INVOCATION_URI,
            &format!(
                "{}/{}/-/jobs/{}",
                self.server_url, self.project_path, self.job_id
            ),
        )?;
        set.utf8(
            oids::OID_SOURCE_REPOSITORY_VISIBILITY,
            &self.project_visibility,
        )?;
        Ok(set.build())
    }
}

/// A Codefresh workflow run.
#[derive(Debug, Clone)]
pub struct CodefreshWorkflowPrincipal {
    /// The token `sub`; also the challenge value.
    pub subject: String,
    /// Account name.
    pub account_name: String,
    /// Pipeline name.
    pub pipeline_name: String,
    /// Workflow (run) id.
    pub workflow_id: String,
    /// Runner environment, when present.
    pub runner_environment: Option<String>,
    /// Source repository URL, when present.
    pub scm_repo_url: Option<String>,
    /// Source ref, when present.
    pub scm_ref: Option<String>,
    /// Platform URL the run executed on.
    pub platform_url: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract_codefresh(
    claims: &Claims,
) -> Result<CodefreshWorkflowPrincipal, ExtractError> {
    Ok(CodefreshWorkflowPrincipal {
        subject: claims.subject.clone(),
        account_name: super::require_str(claims, "account_name")?.to_string(),
        pipeline_name: super::require_str(claims, "pipeline_name")?.to_string(),
        workflow_id: super::require_str(claims, "workflow_id")?.to_string(),
        runner_environment: claims.str_claim("runner_environment").map(str::to_string),
        scm_repo_url: claims.str_claim("scm_repo_url").map(str::to_string),
        scm_ref: claims.str_claim("scm_ref").map(str::to_string),
        platform_url: claims
            .str_claim("platform_url")
            .unwrap_or(CODEFRESH_URL)
            .to_string(),
        issuer: claims.issuer.clone(),
    })
}

impl CodefreshWorkflowPrincipal {
    /// The run URI on the platform.
    pub fn run_uri(&self) -> String {
        format!("{}/build/{}", self.platform_url, self.workflow_id)
    }

    /// A single URI SAN naming the run.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(self.run_uri())]
    }

    /// Issuer plus the provenance the token carries.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        set.utf8_opt(
            oids::OID_RUNNER_ENVIRONMENT,
            self.runner_environment.as_deref(),
        )?;
        set.utf8_opt(oids::OID_SOURCE_REPOSITORY_URI, self.scm_repo_url.as_deref())?;
        set.utf8_opt(oids::OID_SOURCE_REPOSITORY_REF, self.scm_ref.as_deref())?;
        set.utf8(oids::OID_RUN_INVOCATION_URI, &self.run_uri())?;
        Ok(set.build())
    }
}

/// A Chainguard workload identity.
#[derive(Debug, Clone)]
pub struct ChainguardPrincipal {
    /// The token `sub`; also the challenge value.
    pub subject: String,
    /// The identity URI bound into the SAN.
    pub identity_uri: String,
    /// Issuer the identity was established against.
    pub issuer: String,
}

pub(super) fn extract_chainguard(claims: &Claims) -> Result<ChainguardPrincipal, ExtractError> {
    // The subject is either a full identity URI or a path scoped under the
    // issuer.
    let identity_uri = match Url::parse(&claims.subject) {
        Ok(url) if !url.cannot_be_a_base() => claims.subject.clone(),
        _ => format!(
            "{}/{}",
            claims.issuer.trim_end_matches('/'),
            claims.subject.trim_start_matches('/')
        ),
    };
    Ok(ChainguardPrincipal {
        subject: claims.subject.clone(),
        identity_uri,
        issuer: claims.issuer.clone(),
    })
}

impl ChainguardPrincipal {
    /// A single URI SAN carrying the identity URI.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        vec![SubjectAltName::Uri(self.identity_uri.clone())]
    }

    /// Issuer provenance only.
    pub fn extensions(&self) -> Result<Vec<CertExtension>, ExtractError> {
        let mut set = ExtensionSet::new();
        set.issuer(&self.issuer)?;
        Ok(set.build())
    }
}
