// src/error.rs
//! Typed errors shared by the limiters, upstream clients and pipeline stages.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Provider reason codes that turn a 403 into a rate-limit signal.
pub const RATE_LIMIT_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

#[derive(Debug, Error)]
pub enum Error {
    /// The metered API's daily budget is spent. Callers stop issuing metered
    /// calls and persist what they have.
    #[error("quota exceeded: {used} >= {limit} units")]
    QuotaExceeded { used: u64, limit: u64 },

    #[error("upstream error (status {status}): {message}")]
    Upstream {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("transcript unavailable for {id}: {detail}")]
    TranscriptUnavailable { id: String, detail: String },

    #[error("invalid inference output: {0}")]
    InvalidOutput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Error::QuotaExceeded { .. })
    }

    /// Provider-reported throttling: 429, or 403 carrying a quota/rate reason.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Error::Upstream { status: 429, .. } => true,
            Error::Upstream {
                status: 403,
                reason: Some(r),
                ..
            } => RATE_LIMIT_REASONS.contains(&r.as_str()),
            _ => false,
        }
    }

    /// Retry-eligible iff server-side (5xx) or an explicit rate-limit signal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream { status, .. } if *status >= 500 => true,
            other => other.is_rate_limit(),
        }
    }

    /// Short label used in retry logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::Upstream { status, .. } if *status >= 500 => "server_error",
            e @ Error::Upstream { .. } if e.is_rate_limit() => "rate_limit",
            Error::Upstream { .. } => "client_error",
            Error::Network(_) => "network",
            Error::Parse(_) => "parse",
            Error::TranscriptUnavailable { .. } => "transcript_unavailable",
            Error::InvalidOutput(_) => "invalid_output",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Error::Upstream {
                status: status.as_u16(),
                reason: None,
                message: err.to_string(),
            },
            None => Error::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
