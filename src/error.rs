//! Error taxonomy for the credential core.
//!
//! Callers (HTTP handlers) map each kind 1:1 to a status code, so every
//! failure mode is a named variant rather than a raw store error. Token
//! lookups deliberately collapse "never existed", "expired", and "already
//! consumed" into [`Error::NotFound`] to avoid oracle attacks.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by the credential core.
#[derive(Debug, Error)]
pub enum Error {
    /// Token or session absent, already consumed, or expired. The cases are
    /// indistinguishable by design.
    #[error("token not found")]
    NotFound,

    /// Explicit expiry check failed before the store's own TTL removed the
    /// record. Defense in depth; callers should render it like `NotFound`.
    #[error("token expired")]
    Expired,

    /// Enrollment session absent or bound to a different subject.
    #[error("invalid setup token")]
    InvalidSetupToken,

    /// TOTP code rejected where a valid code is a hard precondition
    /// (enrollment confirm, disable, backup-code regeneration).
    #[error("invalid TOTP code")]
    InvalidTotpCode,

    /// Backup code failed normalization (wrong length or alphabet).
    #[error("invalid backup code")]
    InvalidBackupCode,

    /// Enrollment session outlived its pending backup codes. Should not
    /// happen since both share a TTL; a detectable inconsistency.
    #[error("backup codes not found")]
    BackupCodesNotFound,

    /// MFA is already enabled for the subject.
    #[error("MFA already enabled")]
    AlreadyEnabled,

    /// MFA is not enabled for the subject.
    #[error("MFA not enabled")]
    MfaNotEnabled,

    /// Attempt-guard threshold reached for this subject and source address.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Token issuance could not complete; retryable by the caller.
    #[error("token issue failed: {0}")]
    IssueFailed(anyhow::Error),

    /// Underlying TTL store or user record store unreachable; transient.
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
}

impl Error {
    /// Wrap a collaborator failure as a transient store error.
    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::StoreUnavailable(err)
    }

    /// Stable identifier for logs and HTTP error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::InvalidSetupToken => "invalid_setup_token",
            Self::InvalidTotpCode => "invalid_totp_code",
            Self::InvalidBackupCode => "invalid_backup_code",
            Self::BackupCodesNotFound => "backup_codes_not_found",
            Self::AlreadyEnabled => "already_enabled",
            Self::MfaNotEnabled => "mfa_not_enabled",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::IssueFailed(_) => "issue_failed",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Whether the caller may safely retry the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IssueFailed(_) | Self::StoreUnavailable(_))
    }
}
