//! Issuance error taxonomy
//!
//! Every component returns a typed error; the orchestrator wraps them into
//! `IssuanceError`, which carries a stable machine-readable code and a
//! coarse class that maps onto transport status ranges. Raw tokens, key
//! material, and JWKS contents never appear in messages.

use thiserror::Error;

use crate::backend::BackendError;
use crate::challenge::ChallengeError;
use crate::config::ConfigError;
use crate::ct::CtError;
use crate::identity::ExtractError;
use crate::oidc::OidcError;
use crate::template::TemplateError;

/// Result type alias for issuance operations.
pub type Result<T, E = IssuanceError> = std::result::Result<T, E>;

/// Coarse error classes, aligned with transport status ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed request material (400-class).
    InvalidInput,
    /// The identity could not be established (401-class).
    Unauthorized,
    /// A dependency failed transiently; the caller may retry the request
    /// (503-class).
    BackendTransient,
    /// An invariant was violated; indicates a bug (500-class).
    Internal,
}

/// Any error an issuance request can surface.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Token verification failed.
    #[error(transparent)]
    Oidc(#[from] OidcError),

    /// The verified claims could not be shaped into a principal.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Proof of possession failed.
    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    /// Template construction violated an invariant.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The signing backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// CT submission failed (including exhausted retries).
    #[error("CT submission failed: {0}")]
    CtSubmissionFailed(#[from] CtError),

    /// The configuration snapshot is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request deadline elapsed before a dependency answered.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl IssuanceError {
    /// The coarse class the error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Oidc(err) => match err {
                OidcError::InvalidToken(_) => ErrorClass::InvalidInput,
                OidcError::UnknownIssuer(_)
                | OidcError::AudienceMismatch
                | OidcError::Expired => ErrorClass::Unauthorized,
                OidcError::KeyResolutionFailed(_) => ErrorClass::BackendTransient,
            },
            Self::Extract(err) => match err {
                ExtractError::InvalidClaims(_) | ExtractError::MissingRequiredClaim(_) => {
                    ErrorClass::InvalidInput
                }
                ExtractError::DomainMismatch(_) | ExtractError::UnverifiedEmail => {
                    ErrorClass::Unauthorized
                }
            },
            Self::Challenge(_) => ErrorClass::InvalidInput,
            Self::Template(_) => ErrorClass::Internal,
            Self::Backend(err) => match err {
                BackendError::SigningFailed(_) => ErrorClass::Internal,
                BackendError::BackendUnavailable(_) | BackendError::KeyNotReady(_) => {
                    ErrorClass::BackendTransient
                }
            },
            Self::CtSubmissionFailed(err) => match err {
                CtError::Transient(_) => ErrorClass::BackendTransient,
                CtError::Rejected(_) | CtError::InvalidSct(_) => ErrorClass::Internal,
            },
            Self::Config(_) => ErrorClass::Internal,
            Self::DeadlineExceeded => ErrorClass::BackendTransient,
        }
    }

    /// Stable machine-readable code for API error bodies and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Oidc(OidcError::InvalidToken(_)) => "invalid_token",
            Self::Oidc(OidcError::UnknownIssuer(_)) => "unknown_issuer",
            Self::Oidc(OidcError::AudienceMismatch) => "audience_mismatch",
            Self::Oidc(OidcError::Expired) => "token_expired",
            Self::Oidc(OidcError::KeyResolutionFailed(_)) => "key_resolution_failed",
            Self::Extract(ExtractError::InvalidClaims(_)) => "invalid_claims",
            Self::Extract(ExtractError::MissingRequiredClaim(_)) => "missing_required_claim",
            Self::Extract(ExtractError::DomainMismatch(_)) => "domain_mismatch",
            Self::Extract(ExtractError::UnverifiedEmail) => "unverified_email",
            Self::Challenge(ChallengeError::InvalidSignature(_)) => "invalid_signature",
            Self::Challenge(ChallengeError::UnsupportedKey(_)) => "unsupported_key",
            Self::Challenge(ChallengeError::WeakKey(_)) => "weak_key",
            Self::Template(_) => "template_invalid",
            Self::Backend(BackendError::SigningFailed(_)) => "signing_failed",
            Self::Backend(BackendError::BackendUnavailable(_)) => "backend_unavailable",
            Self::Backend(BackendError::KeyNotReady(_)) => "key_not_ready",
            Self::CtSubmissionFailed(_) => "ct_submission_failed",
            Self::Config(_) => "configuration_invalid",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    /// Whether the caller may retry the identical request.
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::BackendTransient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_the_taxonomy() {
        let unauthorized: IssuanceError = OidcError::Expired.into();
        assert_eq!(unauthorized.class(), ErrorClass::Unauthorized);

        let invalid: IssuanceError =
            ChallengeError::InvalidSignature("no proof".into()).into();
        assert_eq!(invalid.class(), ErrorClass::InvalidInput);

        let transient: IssuanceError =
            BackendError::BackendUnavailable("rate limited".into()).into();
        assert_eq!(transient.class(), ErrorClass::BackendTransient);
        assert!(transient.is_retriable());

        let internal: IssuanceError = BackendError::SigningFailed("bug".into()).into();
        assert_eq!(internal.class(), ErrorClass::Internal);
        assert!(!internal.is_retriable());
    }

    #[test]
    fn codes_are_stable_identifiers() {
        let err: IssuanceError = OidcError::AudienceMismatch.into();
        assert_eq!(err.code(), "audience_mismatch");
        let err: IssuanceError = ExtractError::UnverifiedEmail.into();
        assert_eq!(err.code(), "unverified_email");
        let err: IssuanceError = CtError::Transient("timeout".into()).into();
        assert_eq!(err.code(), "ct_submission_failed");
    }
}
