//! Error taxonomy for the pipeline.
//!
//! Every fallible operation in the crate returns a [`PipelineError`]. The
//! variants correspond 1:1 to the error kinds enumerated by the propagation
//! policy: some are fatal (abort startup), some are retryable, some are
//! contained at the point they occur (counters + a warning log line).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("cancelled")]
    Cancelled,

    #[error("buffer full: {0}")]
    BufferFull(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PipelineError::ConfigInvalid(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PipelineError::Internal(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        PipelineError::ValidationFailed(msg.into())
    }

    pub fn schema_mismatch<S: Into<String>>(msg: S) -> Self {
        PipelineError::SchemaMismatch(msg.into())
    }

    pub fn invalid_metric<S: Into<String>>(msg: S) -> Self {
        PipelineError::InvalidMetric(msg.into())
    }

    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        PipelineError::BackendUnavailable(msg.into())
    }

    /// Kind name used in structured log lines (`error.kind` field).
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ConfigInvalid(_) => "ConfigInvalid",
            PipelineError::AuthFailed(_) => "AuthFailed",
            PipelineError::SourceUnavailable(_) => "SourceUnavailable",
            PipelineError::SchemaMismatch(_) => "SchemaMismatch",
            PipelineError::InvalidMetric(_) => "InvalidMetric",
            PipelineError::BackendUnavailable(_) => "BackendUnavailable",
            PipelineError::RateLimited(_) => "RateLimited",
            PipelineError::Timeout(_) => "Timeout",
            PipelineError::CircuitOpen(_) => "CircuitOpen",
            PipelineError::Cancelled => "Cancelled",
            PipelineError::BufferFull(_) => "BufferFull",
            PipelineError::ValidationFailed(_) => "ValidationFailed",
            PipelineError::Http(_) => "Http",
            PipelineError::Serialization(_) => "Serialization",
            PipelineError::Io(_) => "Io",
            PipelineError::Internal(_) => "Internal",
        }
    }

    /// Fatal errors abort startup (ConfigInvalid, AuthFailed).
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::ConfigInvalid(_) | PipelineError::AuthFailed(_))
    }

    /// Errors worth retrying with backoff rather than failing the caller outright.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable(_)
                | PipelineError::BackendUnavailable(_)
                | PipelineError::RateLimited(_)
                | PipelineError::Timeout(_)
                | PipelineError::Http(_)
        )
    }

    /// Cancellation is terminal but never counted as a circuit-breaker failure.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, PipelineError::Cancelled)
    }
}
