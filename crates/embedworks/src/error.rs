use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the embedding and parsing pipelines.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or rejected configuration, detected before any remote call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to the remote service.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote service answered with a non-success status code.
    #[error("Remote service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response arrived but its shape violates the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation the selected backend cannot perform.
    #[error("Backend '{backend}' does not support {operation}")]
    Unsupported { backend: String, operation: String },

    /// Embedding pipeline failure.
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Parse failure scoped to a single source file.
    #[error("Failed to parse '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// Remote parse job reached the failed state.
    #[error("Parse job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    /// Remote parse job stayed non-terminal past the polling budget.
    #[error("Parse job {job_id} did not complete within {timeout_secs}s")]
    JobTimeout { job_id: String, timeout_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a retry could plausibly change the outcome.
    ///
    /// Transport failures and 408/429/5xx responses are transient; other
    /// client errors and malformed responses are permanent and must
    /// propagate without retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_decode(),
            Error::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Remote job id attached to this error, if one was ever assigned.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Error::JobFailed { job_id, .. } | Error::JobTimeout { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}
