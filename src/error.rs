use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Authentication entry points never surface the precise rejection reason to
/// the caller; they audit it internally and return [`Error::AccessDenied`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("expired")]
    Expired,
    #[error("revoked")]
    Revoked,
    #[error("rate limited")]
    RateLimited,
    #[error("ip not allowed")]
    IpNotAllowed,
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("secret mismatch")]
    SecretMismatch,
    #[error("unknown encryption key")]
    KeyMismatch,
    #[error("integrity failure")]
    IntegrityFailure,
    #[error("invalid code")]
    CodeInvalid,
    #[error("backup code already used")]
    BackupCodeAlreadyUsed,
    #[error("store unavailable")]
    StoreUnavailable,
    #[error("malformed credential")]
    Malformed,
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("encryption failure")]
    EncryptionFailure,
    #[error("access denied")]
    AccessDenied,
}

impl Error {
    /// Machine-readable reason code recorded in the audit trail.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::RateLimited => "rate_limited",
            Self::IpNotAllowed => "ip_not_allowed",
            Self::SignatureInvalid => "signature_invalid",
            Self::SecretMismatch => "secret_mismatch",
            Self::KeyMismatch => "key_mismatch",
            Self::IntegrityFailure => "integrity_failure",
            Self::CodeInvalid => "code_invalid",
            Self::BackupCodeAlreadyUsed => "backup_code_already_used",
            Self::StoreUnavailable => "store_unavailable",
            Self::Malformed => "malformed",
            Self::InvalidFilter(_) => "invalid_filter",
            Self::EncryptionFailure => "encryption_failure",
            Self::AccessDenied => "access_denied",
        }
    }

    /// Whether this rejection stems from policy (rate limit, allow-list,
    /// revocation) rather than bad credentials. Policy rejections raise a
    /// security event in addition to the audit record.
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::RateLimited | Self::IpNotAllowed | Self::Revoked)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
