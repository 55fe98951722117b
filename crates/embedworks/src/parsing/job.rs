//! Parse job state machine and result aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one parse job as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submission sent; no remote acknowledgment yet.
    Submitted,
    /// Accepted by the service, waiting for a worker.
    Pending,
    Running,
    Done,
    Failed,
    /// Polling budget exhausted while the job was still non-terminal.
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::TimedOut)
    }
}

/// One parse job, tracked from submission to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseJob {
    /// Local correlation id, assigned before the service ever answers.
    pub id: Uuid,
    /// Remote job id; stays absent on the fast path.
    pub remote_id: Option<String>,
    pub source_path: String,
    pub output_path: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParseJob {
    pub fn new(source_path: impl Into<String>, output_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            remote_id: None,
            source_path: source_path.into(),
            output_path: output_path.into(),
            status: JobStatus::Submitted,
            submitted_at: now,
            updated_at: now,
        }
    }

    /// Move to `status`, refreshing the update timestamp.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Record the remote id handed out on acceptance.
    pub fn accept(&mut self, remote_id: impl Into<String>) {
        self.remote_id = Some(remote_id.into());
        self.transition(JobStatus::Pending);
    }
}

/// Outcome for one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileParseResult {
    pub source_path: String,
    /// Present iff the parse succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Present iff an asynchronous job was created for this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl FileParseResult {
    pub fn succeeded(
        source_path: impl Into<String>,
        output_path: impl Into<String>,
        job_id: Option<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            output_path: Some(output_path.into()),
            success: true,
            error_message: None,
            job_id,
        }
    }

    pub fn failed(
        source_path: impl Into<String>,
        error_message: impl Into<String>,
        job_id: Option<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            output_path: None,
            success: false,
            error_message: Some(error_message.into()),
            job_id,
        }
    }
}

/// Aggregated outcome of a multi-file parse run.
///
/// Counts are derived, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchParseResult {
    /// Output paths of the files that parsed, in completion order.
    pub successful: Vec<String>,
    pub failed: Vec<FileParseResult>,
}

impl BatchParseResult {
    pub fn success_count(&self) -> usize {
        self.successful.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total_count(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}
