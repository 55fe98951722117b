//! Single-file parse pipeline: submit, fast path, poll to terminal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use super::job::{JobStatus, ParseJob};
use crate::config::{BackendKind, ParserConfig};
use crate::error::{Error, Result};
use crate::providers::{
    GatewayProvider, ParseSubmission, RemoteJobStatus, RemoteProvider, SubmitOutcome,
};
use crate::retry::run_with_retry;

impl ParserConfig {
    /// Open a live parser. Validation is eager.
    pub fn open(&self) -> Result<DocumentParser> {
        self.validate()?;
        let provider: Arc<dyn RemoteProvider> = match self.backend {
            BackendKind::Gateway => Arc::new(GatewayProvider::for_parser(self)?),
            // validate() rejects this before we get here
            BackendKind::Openai => {
                return Err(Error::config("document parsing requires the gateway backend"))
            }
        };
        tracing::info!(
            "Opened document parser: backend={}, parser={}, mode={}",
            provider.name(),
            self.parser_backend,
            self.parser_mode
        );
        tracing::debug!("Parser custom options: {:?}", self.sanitized_options());
        Ok(DocumentParser::with_provider(provider, self))
    }
}

/// Live parsing instance produced by [`ParserConfig::open`].
///
/// Owns the network client; not serializable. One instance drives any number
/// of files, each through its own submit/poll lifecycle.
pub struct DocumentParser {
    provider: Arc<dyn RemoteProvider>,
    config: ParserConfig,
}

impl DocumentParser {
    /// Build a parser over an already-constructed provider.
    pub fn with_provider(provider: Arc<dyn RemoteProvider>, config: &ParserConfig) -> Self {
        Self {
            provider,
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse one document, driving the remote job to a terminal state.
    ///
    /// Returns the parsed document's output path. Poll budget exhaustion
    /// surfaces as [`Error::JobTimeout`], a remote failure as
    /// [`Error::JobFailed`]; both are normal terminal outcomes of the job
    /// state machine, not protocol violations.
    pub async fn parse_one(&self, source_path: &str, output_path: &str) -> Result<String> {
        let mut job = ParseJob::new(source_path, output_path);
        tracing::info!("[{}] Submitting parse job {}", source_path, job.id);

        let submission = self.submission(source_path, output_path);
        let outcome = run_with_retry(&self.config.retry, "Parse submission", || {
            self.provider.submit_parse(&submission)
        })
        .await
        .map_err(|e| {
            Error::file_parse(job.source_path.as_str(), format!("submission failed: {}", e))
        })?;

        match outcome {
            SubmitOutcome::Completed { output_path: remote_output } => {
                job.transition(JobStatus::Done);
                tracing::info!("[{}] Parse completed inline -> {}", source_path, remote_output);
                Ok(remote_output)
            }
            SubmitOutcome::Failed { reason } => {
                job.transition(JobStatus::Failed);
                Err(Error::file_parse(source_path, reason))
            }
            SubmitOutcome::Accepted { job_id } => {
                job.accept(job_id.as_str());
                tracing::info!("[{}] Parse job accepted as {}", source_path, job_id);
                self.wait_for_completion(&mut job).await
            }
        }
    }

    /// Poll until the job reaches a terminal state or the budget runs out.
    async fn wait_for_completion(&self, job: &mut ParseJob) -> Result<String> {
        let job_id = job
            .remote_id
            .clone()
            .ok_or_else(|| Error::internal("job accepted without a remote id"))?;
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let poll_timeout = Duration::from_secs(self.config.poll_timeout_secs);
        let started = Instant::now();

        loop {
            if started.elapsed() > poll_timeout {
                job.transition(JobStatus::TimedOut);
                tracing::warn!(
                    "[{}] Parse job {} timed out after {}s",
                    job.source_path,
                    job_id,
                    self.config.poll_timeout_secs
                );
                return Err(Error::JobTimeout {
                    job_id,
                    timeout_secs: self.config.poll_timeout_secs,
                });
            }

            let polled = run_with_retry(&self.config.retry, "Job status poll", || {
                self.provider.poll_job(&job_id)
            })
            .await;
            let report = match polled {
                Ok(report) => report,
                // The job may still be running remotely, but with its status
                // endpoint unreachable it is failed as far as this client
                // can tell.
                Err(e) => {
                    job.transition(JobStatus::Failed);
                    return Err(Error::JobFailed {
                        job_id,
                        reason: format!("status poll failed: {}", e),
                    });
                }
            };

            match report.status {
                RemoteJobStatus::Completed => {
                    // A completed job carrying an error message is a failure.
                    if let Some(reason) = report.error_message {
                        job.transition(JobStatus::Failed);
                        return Err(Error::JobFailed { job_id, reason });
                    }
                    job.transition(JobStatus::Done);
                    // The service echoes the output location; fall back to
                    // the one we asked for.
                    let output = report
                        .output_path
                        .unwrap_or_else(|| job.output_path.clone());
                    tracing::info!(
                        "[{}] Parse job {} completed -> {}",
                        job.source_path,
                        job_id,
                        output
                    );
                    return Ok(output);
                }
                RemoteJobStatus::Failed => {
                    job.transition(JobStatus::Failed);
                    let reason = report
                        .error_message
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(Error::JobFailed { job_id, reason });
                }
                RemoteJobStatus::Pending => job.transition(JobStatus::Pending),
                RemoteJobStatus::Running => job.transition(JobStatus::Running),
                RemoteJobStatus::Unknown => {}
            }

            sleep(poll_interval).await;
        }
    }

    fn submission(&self, source_path: &str, output_path: &str) -> ParseSubmission {
        ParseSubmission {
            source_path: source_path.to_string(),
            document_type: self.config.document_type.clone(),
            parser_backend: self.config.parser_backend.clone(),
            parser_mode: self.config.parser_mode.clone(),
            custom_options: self.config.custom_options.clone(),
            main_output_path: output_path.to_string(),
        }
    }
}

// The provider is a live network client with no useful Debug form.
impl fmt::Debug for DocumentParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentParser")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::providers::JobStatusReport;

    /// Provider fake whose submit outcome is fixed and whose poll responses
    /// play back a script; the last report repeats forever. Setting
    /// `poll_error_status` makes every poll fail with that HTTP status.
    struct ScriptedProvider {
        outcome: SubmitOutcome,
        reports: Mutex<VecDeque<JobStatusReport>>,
        poll_error_status: Option<u16>,
        submit_calls: AtomicU32,
        poll_calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(outcome: SubmitOutcome, reports: Vec<JobStatusReport>) -> Self {
            Self {
                outcome,
                reports: Mutex::new(reports.into()),
                poll_error_status: None,
                submit_calls: AtomicU32::new(0),
                poll_calls: AtomicU32::new(0),
            }
        }

        fn poll_count(&self) -> u32 {
            self.poll_calls.load(Ordering::SeqCst)
        }
    }

    fn report(status: RemoteJobStatus) -> JobStatusReport {
        JobStatusReport {
            status,
            output_path: None,
            error_message: None,
        }
    }

    #[async_trait]
    impl RemoteProvider for ScriptedProvider {
        async fn submit_embedding(
            &self,
            _texts: &[String],
            _model: &str,
            _dimensions: Option<usize>,
        ) -> Result<Vec<Vec<f32>>> {
            Err(Error::internal("not a parse call"))
        }

        async fn submit_parse(&self, _request: &ParseSubmission) -> Result<SubmitOutcome> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }

        async fn poll_job(&self, _job_id: &str) -> Result<JobStatusReport> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.poll_error_status {
                return Err(Error::status(status, "injected failure"));
            }
            let mut reports = self.reports.lock().unwrap();
            if reports.len() > 1 {
                Ok(reports.pop_front().unwrap())
            } else {
                reports
                    .front()
                    .cloned()
                    .ok_or_else(|| Error::internal("poll script exhausted"))
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn quick_config() -> ParserConfig {
        ParserConfig {
            poll_interval_secs: 1,
            poll_timeout_secs: 5,
            ..ParserConfig::default()
        }
    }

    fn parser_over(provider: Arc<ScriptedProvider>) -> DocumentParser {
        DocumentParser::with_provider(provider, &quick_config())
    }

    #[tokio::test]
    async fn test_fast_path_never_polls() {
        let provider = Arc::new(ScriptedProvider::new(
            SubmitOutcome::Completed {
                output_path: "bucket/report.md".to_string(),
            },
            vec![],
        ));
        let parser = parser_over(provider.clone());

        let output = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap();
        assert_eq!(output, "bucket/report.md");
        assert_eq!(provider.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_inline_failure_reports_without_polling() {
        let provider = Arc::new(ScriptedProvider::new(
            SubmitOutcome::Failed {
                reason: "corrupt pdf".to_string(),
            },
            vec![],
        ));
        let parser = parser_over(provider.clone());

        let err = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("corrupt pdf"));
        assert!(err.job_id().is_none());
        assert_eq!(provider.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_through_states_to_done() {
        let done = JobStatusReport {
            status: RemoteJobStatus::Completed,
            output_path: Some("out/report.md".to_string()),
            error_message: None,
        };
        let provider = Arc::new(ScriptedProvider::new(
            SubmitOutcome::Accepted {
                job_id: "job-1".to_string(),
            },
            vec![
                report(RemoteJobStatus::Pending),
                report(RemoteJobStatus::Running),
                done,
            ],
        ));
        let parser = parser_over(provider.clone());

        let output = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap();
        assert_eq!(output, "out/report.md");
        assert_eq!(provider.poll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_carries_reason_and_job_id() {
        let mut failed = report(RemoteJobStatus::Failed);
        failed.error_message = Some("parser crashed".to_string());
        let provider = Arc::new(ScriptedProvider::new(
            SubmitOutcome::Accepted {
                job_id: "job-2".to_string(),
            },
            vec![report(RemoteJobStatus::Running), failed],
        ));
        let parser = parser_over(provider);

        let err = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailed { .. }));
        assert_eq!(err.job_id(), Some("job-2"));
        assert!(err.to_string().contains("parser crashed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_status_endpoint_carries_job_id() {
        let mut provider = ScriptedProvider::new(
            SubmitOutcome::Accepted {
                job_id: "job-6".to_string(),
            },
            vec![],
        );
        provider.poll_error_status = Some(503);
        let provider = Arc::new(provider);
        let parser = parser_over(provider.clone());

        let err = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailed { .. }));
        assert_eq!(err.job_id(), Some("job-6"));
        assert!(err.to_string().contains("status poll failed"));
        // One initial attempt plus three retries before giving up.
        assert_eq!(provider.poll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_with_error_message_is_failure() {
        let mut poisoned = report(RemoteJobStatus::Completed);
        poisoned.error_message = Some("bad xref table".to_string());
        let provider = Arc::new(ScriptedProvider::new(
            SubmitOutcome::Accepted {
                job_id: "job-3".to_string(),
            },
            vec![poisoned],
        ));
        let parser = parser_over(provider);

        let err = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailed { .. }));
        assert!(err.to_string().contains("bad xref table"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhaustion_times_out() {
        let provider = Arc::new(ScriptedProvider::new(
            SubmitOutcome::Accepted {
                job_id: "job-4".to_string(),
            },
            vec![report(RemoteJobStatus::Running)],
        ));
        let parser = parser_over(provider.clone());

        let err = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobTimeout { .. }));
        assert_eq!(err.job_id(), Some("job-4"));
        assert!(err.to_string().contains("did not complete within 5s"));
        assert!(provider.poll_count() >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_keeps_polling() {
        let done = JobStatusReport {
            status: RemoteJobStatus::Completed,
            output_path: Some("out/report.md".to_string()),
            error_message: None,
        };
        let provider = Arc::new(ScriptedProvider::new(
            SubmitOutcome::Accepted {
                job_id: "job-5".to_string(),
            },
            vec![
                report(RemoteJobStatus::Unknown),
                report(RemoteJobStatus::Unknown),
                done,
            ],
        ));
        let parser = parser_over(provider.clone());

        let output = parser
            .parse_one("bucket/report.pdf", "bucket/report.md")
            .await
            .unwrap();
        assert_eq!(output, "out/report.md");
        assert_eq!(provider.poll_count(), 3);
    }

    #[test]
    fn test_open_requires_gateway_backend() {
        let config = ParserConfig {
            backend: BackendKind::Openai,
            ..ParserConfig::default()
        };
        let err = config.open().unwrap_err();
        assert!(err.to_string().contains("gateway backend"));
    }
}
