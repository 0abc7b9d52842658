//! Error handling for the ingest pipeline.
//!
//! Defines the kinds enumerated in the error-handling design and a unified
//! `Result` alias. Library code returns `PipelineError` so callers can match
//! on kind; call-site boundaries (the CLI binary, tests) work in terms of
//! `anyhow::Result` for context chaining.

use thiserror::Error;

/// Error kinds produced by the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("transient network failure: {0}")]
    NetworkTransient(String),

    #[error("permanent network failure ({tag}): {message}")]
    NetworkPermanent { tag: String, message: String },

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("store busy: {0}")]
    StoreBusy(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),

    #[error("zip error")]
    Zip(#[from] zip::result::ZipError),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_permanent_carries_tag_and_message() {
        let err = PipelineError::NetworkPermanent {
            tag: "not_yet_published".to_string(),
            message: "404".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not_yet_published"));
        assert!(msg.contains("404"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
