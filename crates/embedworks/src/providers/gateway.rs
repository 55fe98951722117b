//! Self-hosted gateway backend: OpenAI-style embeddings plus the
//! asynchronous parse/job endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::remote::{
    JobStatusReport, ParseSubmission, RemoteJobStatus, RemoteProvider, SubmitOutcome,
};
use crate::config::{EmbedderConfig, ParserConfig};
use crate::error::{Error, Result};

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(35);
const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the self-hosted gateway.
///
/// One instance serves either the embedding or the parsing side of the
/// service, depending on which descriptor opened it; timeouts for the other
/// side keep their defaults and stay unexercised.
pub struct GatewayProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    embed_timeout: Duration,
    submit_timeout: Duration,
    status_timeout: Duration,
}

impl GatewayProvider {
    /// Instance scoped to embedding calls.
    pub fn for_embedder(config: &EmbedderConfig) -> Result<Self> {
        Self::build(
            &config.endpoint,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
            DEFAULT_SUBMIT_TIMEOUT,
            DEFAULT_STATUS_TIMEOUT,
        )
    }

    /// Instance scoped to parse submissions and job polling.
    pub fn for_parser(config: &ParserConfig) -> Result<Self> {
        Self::build(
            &config.endpoint,
            config.api_key.clone(),
            DEFAULT_EMBED_TIMEOUT,
            Duration::from_secs(config.submit_timeout_secs),
            Duration::from_secs(config.status_timeout_secs),
        )
    }

    fn build(
        endpoint: &str,
        api_key: Option<String>,
        embed_timeout: Duration,
        submit_timeout: Duration,
        status_timeout: Duration,
    ) -> Result<Self> {
        // Timeouts differ per endpoint, so they are applied per request
        // rather than on the client.
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            embed_timeout,
            submit_timeout,
            status_timeout,
        })
    }

    fn embeddings_endpoint(&self) -> String {
        format!("{}/embeddings", self.endpoint)
    }

    fn parse_endpoint(&self) -> String {
        format!("{}/api/v1/parse_from_oss", self.endpoint)
    }

    fn job_endpoint(&self, job_id: &str) -> String {
        format!("{}/api/v1/jobs/{}", self.endpoint, job_id)
    }

    fn authorize(&self, call: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => call.bearer_auth(key),
            None => call,
        }
    }
}

#[async_trait]
impl RemoteProvider for GatewayProvider {
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

        let call = self
            .client
            .post(self.embeddings_endpoint())
            .timeout(self.embed_timeout)
            .json(&request);
        let response = self.authorize(call).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status, body));
        }

        let payload: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::protocol(format!("Malformed embeddings response: {}", e)))?;

        let mut items = payload.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    async fn submit_parse(&self, request: &ParseSubmission) -> Result<SubmitOutcome> {
        let payload = ParseRequest {
            source_path: &request.source_path,
            document_type: &request.document_type,
            parser_type: &request.parser_backend,
            parser_mode: &request.parser_mode,
            custom_options: &request.custom_options,
            main_output_path: &request.main_output_path,
        };

        let call = self
            .client
            .post(self.parse_endpoint())
            .timeout(self.submit_timeout)
            .json(&payload);
        let response = self.authorize(call).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status, body));
        }

        let reply: ParseResponse = response
            .json()
            .await
            .map_err(|e| Error::protocol(format!("Malformed parse response: {}", e)))?;

        if reply.completed {
            if let Some(reason) = non_empty(reply.error_message) {
                return Ok(SubmitOutcome::Failed { reason });
            }
            let output_path = reply.main_output_path.ok_or_else(|| {
                Error::protocol("Completed parse response missing main_output_path")
            })?;
            return Ok(SubmitOutcome::Completed { output_path });
        }

        match non_empty(reply.job_id) {
            Some(job_id) => Ok(SubmitOutcome::Accepted { job_id }),
            None => Err(Error::protocol(
                "Parse response carried neither completion nor a job id",
            )),
        }
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobStatusReport> {
        let call = self
            .client
            .get(self.job_endpoint(job_id))
            .timeout(self.status_timeout);
        let response = self.authorize(call).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status, body));
        }

        let reply: JobStatusResponse = response
            .json()
            .await
            .map_err(|e| Error::protocol(format!("Malformed job status response: {}", e)))?;

        Ok(JobStatusReport {
            status: RemoteJobStatus::from_wire(&reply.status),
            output_path: reply.main_output_path,
            error_message: non_empty(reply.error_message),
        })
    }

    fn name(&self) -> &str {
        "gateway"
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
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

#[derive(Serialize)]
struct ParseRequest<'a> {
    source_path: &'a str,
    document_type: &'a str,
    parser_type: &'a str,
    parser_mode: &'a str,
    custom_options: &'a Map<String, Value>,
    main_output_path: &'a str,
}

#[derive(Deserialize)]
struct ParseResponse {
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    main_output_path: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    // A missing or unrecognized status keeps the poll loop going.
    #[serde(default)]
    status: String,
    #[serde(default)]
    main_output_path: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}
