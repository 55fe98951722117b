//! Multi-file parse coordination with bounded concurrency.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::job::{BatchParseResult, FileParseResult};
use super::parser::DocumentParser;
use crate::error::Error;

impl DocumentParser {
    /// Parse many files independently; a failure in one file never affects
    /// another's attempt, regardless of the configured error handling.
    ///
    /// Each file's output path is its stem joined under
    /// `source_parent_path` with the extension replaced by `.md`. Paths are
    /// object-store keys joined with `/`, not host paths.
    pub async fn parse_many(
        &self,
        files: &[String],
        source_parent_path: &str,
    ) -> BatchParseResult {
        if files.is_empty() {
            return BatchParseResult::default();
        }

        tracing::info!(
            "Parsing batch of {} files ({} max concurrent)",
            files.len(),
            self.config().max_concurrent_files
        );
        let semaphore = Arc::new(Semaphore::new(self.config().max_concurrent_files));

        let tasks = files.iter().map(|file| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            file.as_str(),
                            Err(Error::internal("worker pool closed unexpectedly")),
                        )
                    }
                };
                let output_path = derive_output_path(file, source_parent_path);
                let result = self.parse_one(file, &output_path).await;
                (file.as_str(), result)
            }
        });
        let outcomes = join_all(tasks).await;

        let mut batch = BatchParseResult::default();
        for (file, result) in outcomes {
            match result {
                Ok(output_path) => {
                    tracing::info!("[{}] Parsed -> {}", file, output_path);
                    batch.successful.push(output_path);
                }
                Err(err) => {
                    tracing::warn!("[{}] Parse failed: {}", file, err);
                    let job_id = err.job_id().map(str::to_string);
                    batch
                        .failed
                        .push(FileParseResult::failed(file, err.to_string(), job_id));
                }
            }
        }
        tracing::info!(
            "Parse batch complete: {} succeeded, {} failed",
            batch.success_count(),
            batch.failed_count()
        );
        batch
    }
}

/// `bucket/in/report.pdf` under parent `bucket/out` becomes
/// `bucket/out/report.md`.
fn derive_output_path(source_path: &str, source_parent_path: &str) -> String {
    let file_name = source_path.rsplit('/').next().unwrap_or(source_path);
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let parent = source_parent_path.trim_end_matches('/');
    if parent.is_empty() {
        format!("{}.md", stem)
    } else {
        format!("{}/{}.md", parent, stem)
    }
}
