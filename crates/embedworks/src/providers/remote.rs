//! Capability trait implemented by every remote backend.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

/// A remote service that can embed text and, where supported, run
/// asynchronous document-parse jobs.
///
/// Implementations:
/// - `OpenAiProvider`: OpenAI-compatible embeddings API, no parse endpoints
/// - `GatewayProvider`: self-hosted gateway with embeddings and parsing
///
/// The pipelines depend only on this trait; backend selection happens once,
/// at descriptor open time.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Embed a batch of texts in one remote call.
    ///
    /// Returns one vector per text, in request order. Shape validation
    /// beyond per-item ordering is the caller's job.
    async fn submit_embedding(
        &self,
        texts: &[String],
        model: &str,
        dimensions: Option<usize>,
    ) -> Result<Vec<Vec<f32>>>;

    /// Submit one document-parse request.
    async fn submit_parse(&self, request: &ParseSubmission) -> Result<SubmitOutcome>;

    /// Query a previously accepted parse job.
    async fn poll_job(&self, job_id: &str) -> Result<JobStatusReport>;

    /// Short backend identifier for logs.
    fn name(&self) -> &str;
}

/// Everything the service needs to start parsing one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseSubmission {
    pub source_path: String,
    pub document_type: String,
    pub parser_backend: String,
    pub parser_mode: String,
    pub custom_options: Map<String, Value>,
    pub main_output_path: String,
}

/// Immediate result of a parse submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Fast path: the service finished parsing before responding.
    Completed { output_path: String },
    /// The service finished inline and reports a failure.
    Failed { reason: String },
    /// A job was created; progress arrives via polling.
    Accepted { job_id: String },
}

/// Status reported by the job endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Any status this client does not recognize; treated as still in
    /// progress by the poll loop.
    Unknown,
}

impl RemoteJobStatus {
    /// Map a wire status string, case-insensitively. Unrecognized strings
    /// become `Unknown` rather than an error.
    pub fn from_wire(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// One poll response, already lifted off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusReport {
    pub status: RemoteJobStatus,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
}
