//! Error types for MailTrust

use std::time::Duration;
use thiserror::Error;

/// Main error type for MailTrust
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Quota exceeded for {resource}, retry after {}s", retry_after.as_secs())]
    QuotaExceeded {
        resource: String,
        retry_after: Duration,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MailTrust
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Crypto(_) => "CRYPTO_ERROR",
            Error::Dns(_) => "DNS_ERROR",
            Error::Provider(_) => "PROVIDER_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::QuotaExceeded { .. } | Error::Conflict(_) | Error::Provider(_)
        )
    }

    /// Retry-after hint for quota violations
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::QuotaExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_error_is_retryable() {
        let err = Error::QuotaExceeded {
            resource: "email_send".to_string(),
            retry_after: Duration::from_secs(42),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(err.code(), "QUOTA_EXCEEDED");
        assert_eq!(
            err.to_string(),
            "Quota exceeded for email_send, retry after 42s"
        );
    }

    #[test]
    fn test_crypto_error_is_fatal() {
        let err = Error::Crypto("bad tag".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after(), None);
    }
}
