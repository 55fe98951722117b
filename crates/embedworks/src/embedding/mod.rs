//! Order-preserving, token-budget-aware embedding pipeline.
//!
//! Two independent limits shape every call: the model's per-item token limit
//! and the API's per-request token limit. Texts under both accumulate into
//! batches; an oversized text is chunked, embedded chunk by chunk, and merged
//! back into a single unit-norm vector.

mod batch;
mod chunk;

use std::fmt;
use std::sync::Arc;

use crate::config::{BackendKind, EmbedderConfig, ErrorHandling};
use crate::error::{Error, Result};
use crate::providers::{GatewayProvider, OpenAiProvider, RemoteProvider};
use crate::registry::{ModelProfile, ModelRegistry};
use crate::retry::{run_with_retry, RetryPolicy};

use batch::{estimate_tokens, PendingBatch, APPROX_CHARS_PER_TOKEN};
use chunk::{chunk_text, merge_weighted, normalize};

impl EmbedderConfig {
    /// Open a live embedder against `registry`.
    ///
    /// All validation is eager: unknown models, unsupported dimension
    /// overrides, and bad descriptor fields fail here, never mid-call.
    pub fn open(&self, registry: &ModelRegistry) -> Result<TextEmbedder> {
        self.validate()?;
        let profile = registry.get(&self.model)?;

        if let Some(requested) = self.dimensions {
            if requested == 0 {
                return Err(Error::config("dimensions override must be > 0"));
            }
            if !profile.supports_overriding_dimensions {
                return Err(Error::config(format!(
                    "Model '{}' does not support overriding dimensions",
                    self.model
                )));
            }
        }
        if profile.max_input_tokens == 0 {
            return Err(Error::config(format!(
                "Model '{}' has an invalid max_input_tokens of 0",
                self.model
            )));
        }

        let provider: Arc<dyn RemoteProvider> = match self.backend {
            BackendKind::Openai => Arc::new(OpenAiProvider::for_embedder(self)?),
            BackendKind::Gateway => Arc::new(GatewayProvider::for_embedder(self)?),
        };
        Ok(TextEmbedder::with_provider(provider, self, &profile))
    }
}

/// Live embedding instance produced by [`EmbedderConfig::open`].
///
/// Owns the network client; not serializable. The resolved output dimension
/// and both token budgets are fixed at open time.
pub struct TextEmbedder {
    provider: Arc<dyn RemoteProvider>,
    model: String,
    dimensions: usize,
    dimension_override: Option<usize>,
    max_input_tokens: usize,
    max_batch_tokens: usize,
    retry: RetryPolicy,
    error_handling: ErrorHandling,
}

impl TextEmbedder {
    /// Build an embedder over an already-constructed provider.
    pub fn with_provider(
        provider: Arc<dyn RemoteProvider>,
        config: &EmbedderConfig,
        profile: &ModelProfile,
    ) -> Self {
        // A single item must fit into one remote call, so the per-item
        // budget is capped by the per-call budget.
        let max_input_tokens = profile.max_input_tokens.min(config.max_batch_tokens);
        Self {
            provider,
            model: config.model.clone(),
            dimensions: config.dimensions.unwrap_or(profile.dimensions),
            dimension_override: config.dimensions,
            max_input_tokens,
            max_batch_tokens: config.max_batch_tokens,
            retry: config.retry,
            error_handling: config.error_handling,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolved output dimensionality: the override if one was requested,
    /// else the model default.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed `texts`, returning one vector per text in input order.
    ///
    /// An empty input returns an empty result without any remote call.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut pending = PendingBatch::new();

        for text in texts {
            let tokens = estimate_tokens(text);
            if tokens > self.max_input_tokens {
                // Everything accumulated so far embeds first, keeping output
                // order aligned with input order.
                self.flush(&mut pending, &mut results).await?;
                results.push(self.embed_oversized(text).await?);
            } else if pending.would_overflow(tokens, self.max_batch_tokens) {
                self.flush(&mut pending, &mut results).await?;
                pending.push(text.clone(), tokens);
            } else {
                pending.push(text.clone(), tokens);
            }
        }
        self.flush(&mut pending, &mut results).await?;

        debug_assert_eq!(results.len(), texts.len());
        Ok(results)
    }

    async fn flush(&self, pending: &mut PendingBatch, results: &mut Vec<Vec<f32>>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            "Embedding batch of {} texts (~{} tokens)",
            pending.len(),
            pending.token_count()
        );
        let batch = pending.take();
        let vectors = self.embed_batch_remote(&batch).await?;
        results.extend(vectors);
        Ok(())
    }

    /// One retry-wrapped remote call for `batch`, with shape validation and
    /// the zero-vector fallback applied on exhausted transient failures.
    async fn embed_batch_remote(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let outcome = run_with_retry(&self.retry, "Embedding request", || {
            self.provider
                .submit_embedding(batch, &self.model, self.dimension_override)
        })
        .await;

        let vectors = match outcome {
            Ok(vectors) => vectors,
            Err(err)
                if err.is_transient()
                    && self.error_handling == ErrorHandling::ZeroVectorFallback =>
            {
                tracing::warn!(
                    "Embedding request failed after retries; substituting zero vectors for {} texts: {}",
                    batch.len(),
                    err
                );
                return Ok(vec![vec![0.0; self.dimensions]; batch.len()]);
            }
            Err(err) => return Err(err),
        };

        if vectors.len() != batch.len() {
            return Err(Error::protocol(format!(
                "Embedding response returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(Error::protocol(format!(
                    "Embedding response vector has {} dimensions, expected {}",
                    vector.len(),
                    self.dimensions
                )));
            }
        }
        Ok(vectors)
    }

    /// Chunk an oversized text, embed the chunks under the per-call budget,
    /// and merge the chunk vectors into one unit-norm vector.
    async fn embed_oversized(&self, text: &str) -> Result<Vec<f32>> {
        let max_chars = self.max_input_tokens * APPROX_CHARS_PER_TOKEN;
        let chunks = chunk_text(text, max_chars);
        tracing::debug!(
            "Oversized text (~{} tokens) split into {} chunks",
            estimate_tokens(text),
            chunks.len()
        );

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        let mut pending = PendingBatch::new();
        for chunk in &chunks {
            let tokens = estimate_tokens(chunk);
            if !pending.is_empty() && pending.would_overflow(tokens, self.max_batch_tokens) {
                let group = pending.take();
                vectors.extend(self.embed_batch_remote(&group).await?);
            }
            pending.push(chunk.clone(), tokens);
        }
        if !pending.is_empty() {
            let group = pending.take();
            vectors.extend(self.embed_batch_remote(&group).await?);
        }

        let weights: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        let mut merged = merge_weighted(&vectors, &weights);
        normalize(&mut merged);
        Ok(merged)
    }
}

// The provider is a live network client with no useful Debug form.
impl fmt::Debug for TextEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextEmbedder")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("dimension_override", &self.dimension_override)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("max_batch_tokens", &self.max_batch_tokens)
            .field("retry", &self.retry)
            .field("error_handling", &self.error_handling)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::providers::{JobStatusReport, ParseSubmission, SubmitOutcome};

    /// Provider fake that records every batch and fails on demand.
    struct RecordingProvider {
        default_dimensions: usize,
        calls: Mutex<Vec<Vec<String>>>,
        /// Fail this many leading calls with `fail_status` before succeeding.
        failures: AtomicU32,
        fail_status: u16,
        /// Return one vector too few, to exercise shape validation.
        short_response: bool,
    }

    impl RecordingProvider {
        fn new(default_dimensions: usize) -> Self {
            Self {
                default_dimensions,
                calls: Mutex::new(Vec::new()),
                failures: AtomicU32::new(0),
                fail_status: 503,
                short_response: false,
            }
        }

        fn failing(default_dimensions: usize, failures: u32, status: u16) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                fail_status: status,
                ..Self::new(default_dimensions)
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn recorded_calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    /// First component encodes the text's char count, so ordering is visible
    /// in the output.
    fn deterministic_vector(text: &str, dimensions: usize) -> Vec<f32> {
        let seed = text.chars().count() as f32;
        (0..dimensions).map(|i| seed + i as f32).collect()
    }

    #[async_trait]
    impl RemoteProvider for RecordingProvider {
        async fn submit_embedding(
            &self,
            texts: &[String],
            _model: &str,
            dimensions: Option<usize>,
        ) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.to_vec());
            loop {
                let remaining = self.failures.load(Ordering::SeqCst);
                if remaining == 0 {
                    break;
                }
                if self
                    .failures
                    .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Err(Error::status(self.fail_status, "injected failure"));
                }
            }
            let dims = dimensions.unwrap_or(self.default_dimensions);
            let count = if self.short_response && !texts.is_empty() {
                texts.len() - 1
            } else {
                texts.len()
            };
            Ok(texts
                .iter()
                .take(count)
                .map(|t| deterministic_vector(t, dims))
                .collect())
        }

        async fn submit_parse(&self, _request: &ParseSubmission) -> Result<SubmitOutcome> {
            Err(Error::internal("not an embedding call"))
        }

        async fn poll_job(&self, _job_id: &str) -> Result<JobStatusReport> {
            Err(Error::internal("not an embedding call"))
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay_secs: 0.0,
            max_delay_secs: 0.0,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    fn embedder_with(
        provider: Arc<RecordingProvider>,
        profile: ModelProfile,
        config: EmbedderConfig,
    ) -> TextEmbedder {
        TextEmbedder::with_provider(provider, &config, &profile)
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_remote_calls() {
        let provider = Arc::new(RecordingProvider::new(4));
        let embedder = embedder_with(
            provider.clone(),
            ModelProfile::new(4, false, 100),
            EmbedderConfig::default(),
        );
        let result = embedder.embed(&[]).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_batches_flush_at_token_ceiling() {
        let provider = Arc::new(RecordingProvider::new(4));
        let config = EmbedderConfig {
            max_batch_tokens: 10,
            retry: fast_retry(),
            ..EmbedderConfig::default()
        };
        let embedder = embedder_with(provider.clone(), ModelProfile::new(4, false, 100), config);

        // 12 chars = 4 tokens each; the third text would reach 12 >= 10
        let input = texts(&["aaaaaaaaaaaa", "bbbbbbbbbbbb", "cccccccccccc"]);
        let result = embedder.embed(&input).await.unwrap();

        assert_eq!(result.len(), 3);
        let calls = provider.recorded_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[1].len(), 1);
        // Output rows line up with input rows
        assert_eq!(result[0][0], 12.0);
        assert_eq!(result[2][0], 12.0);
    }

    #[tokio::test]
    async fn test_oversized_text_preserves_order_and_dimensions() {
        let provider = Arc::new(RecordingProvider::new(4));
        let config = EmbedderConfig {
            max_batch_tokens: 25,
            retry: fast_retry(),
            ..EmbedderConfig::default()
        };
        // 10-token per-item limit = 30 chars per chunk
        let embedder = embedder_with(provider.clone(), ModelProfile::new(4, false, 10), config);

        let input = vec![
            "a".repeat(9),  // 3 tokens
            "b".repeat(90), // 30 tokens, oversized
            "c".repeat(12), // 4 tokens
        ];
        let result = embedder.embed(&input).await.unwrap();

        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|v| v.len() == 4));
        assert_eq!(result[0][0], 9.0);
        assert_eq!(result[2][0], 12.0);

        // The merged vector is unit-norm
        let norm: f64 = result[1]
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        // The pending batch flushed before the oversized text was processed,
        // and no call exceeded the per-call token budget
        let calls = provider.recorded_calls();
        assert_eq!(calls[0], vec!["a".repeat(9)]);
        for call in &calls {
            let call_tokens: usize = call.iter().map(|t| t.chars().count() / 3).sum();
            assert!(call_tokens <= 25, "call used {} tokens", call_tokens);
        }
    }

    #[tokio::test]
    async fn test_item_above_batch_limit_is_chunked() {
        let provider = Arc::new(RecordingProvider::new(4));
        let config = EmbedderConfig {
            max_batch_tokens: 10,
            retry: fast_retry(),
            ..EmbedderConfig::default()
        };
        // Model allows 8191 tokens per item, but a call only fits 10
        let embedder = embedder_with(provider.clone(), ModelProfile::new(4, false, 8191), config);

        let input = vec!["x".repeat(33)]; // 11 tokens
        let result = embedder.embed(&input).await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].len(), 4);
        for call in provider.recorded_calls() {
            let call_tokens: usize = call.iter().map(|t| t.chars().count() / 3).sum();
            assert!(call_tokens <= 10);
        }
    }

    #[tokio::test]
    async fn test_zero_vector_fallback_after_exhausted_retries() {
        let provider = Arc::new(RecordingProvider::failing(8, u32::MAX, 503));
        let config = EmbedderConfig {
            retry: fast_retry(),
            error_handling: ErrorHandling::ZeroVectorFallback,
            ..EmbedderConfig::default()
        };
        let embedder = embedder_with(provider.clone(), ModelProfile::new(8, false, 100), config);

        let result = embedder.embed(&texts(&["one", "two", "three"])).await.unwrap();
        assert_eq!(result.len(), 3);
        for vector in &result {
            assert_eq!(vector.len(), 8);
            assert!(vector.iter().all(|v| *v == 0.0));
        }
        // 1 initial attempt + 2 retries
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fail_fast_propagates_after_exhausted_retries() {
        let provider = Arc::new(RecordingProvider::failing(8, u32::MAX, 503));
        let config = EmbedderConfig {
            retry: fast_retry(),
            ..EmbedderConfig::default()
        };
        let embedder = embedder_with(provider.clone(), ModelProfile::new(8, false, 100), config);

        let err = embedder.embed(&texts(&["one"])).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_never_masked() {
        let provider = Arc::new(RecordingProvider::failing(8, u32::MAX, 400));
        let config = EmbedderConfig {
            retry: fast_retry(),
            error_handling: ErrorHandling::ZeroVectorFallback,
            ..EmbedderConfig::default()
        };
        let embedder = embedder_with(provider.clone(), ModelProfile::new(8, false, 100), config);

        let err = embedder.embed(&texts(&["one"])).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 400, .. }));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_recovery_mid_batch() {
        let provider = Arc::new(RecordingProvider::failing(4, 1, 500));
        let config = EmbedderConfig {
            retry: fast_retry(),
            ..EmbedderConfig::default()
        };
        let embedder = embedder_with(provider.clone(), ModelProfile::new(4, false, 100), config);

        let result = embedder.embed(&texts(&["hello"])).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_wrong_vector_count_is_protocol_error() {
        let mut provider = RecordingProvider::new(4);
        provider.short_response = true;
        let config = EmbedderConfig {
            retry: fast_retry(),
            error_handling: ErrorHandling::ZeroVectorFallback,
            ..EmbedderConfig::default()
        };
        let embedder = embedder_with(
            Arc::new(provider),
            ModelProfile::new(4, false, 100),
            config,
        );

        let err = embedder.embed(&texts(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_dimension_override_resolution() {
        let provider = Arc::new(RecordingProvider::new(1536));
        let config = EmbedderConfig {
            dimensions: Some(6),
            retry: fast_retry(),
            ..EmbedderConfig::default()
        };
        let embedder = embedder_with(provider, ModelProfile::new(1536, true, 100), config);

        assert_eq!(embedder.dimensions(), 6);
        let result = embedder.embed(&texts(&["abc"])).await.unwrap();
        assert_eq!(result[0].len(), 6);
    }

    #[test]
    fn test_open_rejects_unsupported_override() {
        let registry = ModelRegistry::with_builtin_models();
        let config = EmbedderConfig {
            model: "conan-embedding-v1".to_string(),
            dimensions: Some(512),
            ..EmbedderConfig::default()
        };
        let err = config.open(&registry).unwrap_err();
        assert!(err
            .to_string()
            .contains("does not support overriding dimensions"));
    }

    #[test]
    fn test_open_rejects_unknown_model() {
        let registry = ModelRegistry::with_builtin_models();
        let config = EmbedderConfig {
            model: "made-up-model".to_string(),
            ..EmbedderConfig::default()
        };
        let err = config.open(&registry).unwrap_err();
        assert!(err.to_string().contains("Unsupported model"));
    }

    #[test]
    fn test_open_resolves_default_dimension() {
        let registry = ModelRegistry::with_builtin_models();
        let embedder = EmbedderConfig::default().open(&registry).unwrap();
        assert_eq!(embedder.dimensions(), 1792);
        assert_eq!(embedder.model(), "conan-embedding-v1");
    }
}
