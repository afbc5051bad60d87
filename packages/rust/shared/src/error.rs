//! Error types for the buyer-group core.
//!
//! Library crates use [`BuyerGroupError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all buyer-group operations.
#[derive(Debug, thiserror::Error)]
pub enum BuyerGroupError {
    /// Configuration loading or validation error. Fatal for a whole run.
    #[error("config error: {message}")]
    Config { message: String },

    /// The provider could not be reached or answered with a server error.
    #[error("{provider} provider unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// The provider throttled the request.
    #[error("{provider} provider rate limited")]
    ProviderRateLimited {
        provider: String,
        /// Server-suggested wait before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The provider refused the request (bad credentials, forbidden, bad request).
    #[error("{provider} provider rejected request: HTTP {status}")]
    ProviderRejected { provider: String, status: u16 },

    /// The company (or another looked-up entity) does not exist upstream.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The company domain could not be normalized to a host name.
    #[error("invalid domain: {input:?}")]
    InvalidDomain { input: String },

    /// A single profile payload could not be used.
    #[error("malformed profile {profile_id}: {message}")]
    MalformedProfile { profile_id: String, message: String },

    /// Two matching strategies or two profiles disagreed on a Person.
    #[error("reconciliation conflict: {message}")]
    ReconciliationConflict { message: String },

    /// Database or checkpoint store error.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, invalid state transition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BuyerGroupError>;

impl BuyerGroupError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn unavailable(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::ProviderRateLimited {
            provider: provider.into(),
            retry_after,
        }
    }

    pub fn malformed(profile_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedProfile {
            profile_id: profile_id.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors worth retrying with backoff: the upstream may recover.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. } | Self::ProviderRateLimited { .. }
        )
    }

    /// Errors that mark a unit `skipped`: retrying cannot change the answer.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidDomain { .. })
    }

    /// Server-requested delay, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ProviderRateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BuyerGroupError::config("people concurrency must be > 0");
        assert_eq!(err.to_string(), "config error: people concurrency must be > 0");

        let err = BuyerGroupError::rate_limited("people", None);
        assert_eq!(err.to_string(), "people provider rate limited");

        let err = BuyerGroupError::InvalidDomain {
            input: "http://".into(),
        };
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn transient_and_permanent_are_disjoint() {
        let transient = [
            BuyerGroupError::unavailable("company", "503"),
            BuyerGroupError::rate_limited("people", Some(Duration::from_secs(2))),
        ];
        for err in &transient {
            assert!(err.is_transient());
            assert!(!err.is_permanent());
        }

        let permanent = [
            BuyerGroupError::not_found("company acme.io"),
            BuyerGroupError::InvalidDomain { input: "".into() },
        ];
        for err in &permanent {
            assert!(err.is_permanent());
            assert!(!err.is_transient());
        }

        let neither = BuyerGroupError::Persistence("disk full".into());
        assert!(!neither.is_transient());
        assert!(!neither.is_permanent());
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let err = BuyerGroupError::rate_limited("people", Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(BuyerGroupError::unavailable("people", "x").retry_after(), None);
    }
}
