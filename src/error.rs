//! The error taxonomy every component returns into. Kinds, not exception types —
//! each maps directly onto a job-ledger policy (record-and-skip vs. surface-to-operator).

use thiserror::Error as ThisError;

/// Crate-wide result alias.
pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;

#[derive(Debug, ThisError)]
pub enum ScrapeError {
    /// Missing vault key, invalid range, unreachable DB on boot. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential blob tampered or wrong key. Tenant skipped until operator intervenes.
    #[error("credential decryption failed: {0}")]
    Decryption(String),

    /// Login-page missing CSRF, verification failed, or retries exhausted.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// TCP/TLS failure, DNS — transient, subsequent tick likely recovers.
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx status other than 401/403.
    #[error("upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    /// Observed 429, or repeated 401/403 cascades beyond the reauth budget.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// HTML shape changed, JSON malformed. Operator must update the parser.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ScrapeError {
    /// Classifies an HTTP status. 401/403 are session-invalidation signals the
    /// adapter handles internally and should never reach this constructor;
    /// 429 becomes `RateLimitExceeded`; anything else non-2xx surfaces as `Upstream`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 429 {
            return Self::RateLimitExceeded(message.into());
        }
        Self::Upstream { status, message: message.into() }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        ScrapeError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(e: serde_json::Error) -> Self {
        ScrapeError::Parse(e.to_string())
    }
}
