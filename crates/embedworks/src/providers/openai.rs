//! OpenAI-compatible embeddings backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::remote::{JobStatusReport, ParseSubmission, RemoteProvider, SubmitOutcome};
use crate::config::EmbedderConfig;
use crate::error::{Error, Result};

/// Client for any service speaking the OpenAI embeddings protocol.
///
/// Parse operations are not part of that protocol and report as unsupported.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn for_embedder(config: &EmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn embeddings_endpoint(&self) -> String {
        format!("{}/embeddings", self.endpoint)
    }
}

#[async_trait]
impl RemoteProvider for OpenAiProvider {
    async fn submit_embedding(
        &self,
        texts: &[String],
        model: &str,
        dimensions: Option<usize>,
    ) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingsRequest {
            model,
            input: texts,
            dimensions,
        };

        let mut call = self.client.post(self.embeddings_endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status, body));
        }

        let payload: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::protocol(format!("Malformed embeddings response: {}", e)))?;

        // Items may arrive out of order; the index field is authoritative.
        let mut items = payload.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    async fn submit_parse(&self, _request: &ParseSubmission) -> Result<SubmitOutcome> {
        Err(Error::Unsupported {
            backend: self.name().to_string(),
            operation: "submit_parse".to_string(),
        })
    }

    async fn poll_job(&self, _job_id: &str) -> Result<JobStatusReport> {
        Err(Error::Unsupported {
            backend: self.name().to_string(),
            operation: "poll_job".to_string(),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
