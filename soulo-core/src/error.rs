//! Workspace-wide error type.
//!
//! Every failure carries a stable [`SouloError::error_code`] which the HTTP
//! handlers and `--format json` output return next to the message.

use thiserror::Error;

pub type SouloResult<T> = Result<T, SouloError>;

#[derive(Error, Debug)]
pub enum SouloError {
    #[error("configuration error: {0}")]
    Config(String),

    /// A credential or URL the requested operation needs is not set.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("database integrity check failed: {0}")]
    IntegrityCheck(String),

    /// Transport-level failure talking to an upstream.
    #[error("http error: {0}")]
    Http(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    /// Non-success response from an upstream ("backend", "llm", "speech",
    /// "sentiment").
    #[error("{service} error (status {status}): {message}")]
    Api {
        service: String,
        status: u16,
        message: String,
    },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited by {0}")]
    RateLimited(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generated SQL that the read-only guard refused to run.
    #[error("unsafe query rejected: {0}")]
    UnsafeQuery(String),

    #[error("journal entry not found: {0}")]
    EntryNotFound(String),

    #[error("chat thread not found: {0}")]
    ThreadNotFound(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Every route of the retrieval fallback chain failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("service init error: {0}")]
    ServiceInit(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SouloError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::MissingConfig(_) => "config_error",
            Self::Database(_) | Self::Migration(_) | Self::Pool(_) | Self::IntegrityCheck(_) => {
                "database_error"
            }
            Self::Http(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Api { .. } => "upstream_error",
            Self::AuthFailed(_) => "auth_failed",
            Self::RateLimited(_) => "rate_limited",
            Self::InvalidInput(_) => "invalid_input",
            Self::UnsafeQuery(_) => "unsafe_query",
            Self::EntryNotFound(_) | Self::ThreadNotFound(_) => "not_found",
            Self::Transcription(_) => "transcription_failed",
            Self::Retrieval(_) => "retrieval_failed",
            Self::Generation(_) => "generation_failed",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
            Self::ServiceInit(_) | Self::Service(_) => "service_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SouloError {
    fn from(e: serde_json::Error) -> Self {
        SouloError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for SouloError {
    fn from(e: toml::de::Error) -> Self {
        SouloError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_is_transient_on_5xx_only() {
        let api = |status| SouloError::Api {
            service: "llm".into(),
            status,
            message: "overloaded".into(),
        };
        assert_eq!(api(503).to_string(), "llm error (status 503): overloaded");
        assert_eq!(api(503).error_code(), "upstream_error");
        assert!(api(503).is_transient());
        assert!(!api(400).is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SouloError::Config("bad value".into()).to_string(), "configuration error: bad value");
        assert_eq!(SouloError::UnsafeQuery("drop".into()).error_code(), "unsafe_query");
        assert_eq!(SouloError::ThreadNotFound("t".into()).error_code(), "not_found");
        assert!(!SouloError::InvalidInput("x".into()).is_transient());
    }

    #[test]
    fn test_io_error_converts() {
        let err: SouloError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.error_code(), "io_error");
    }
}
