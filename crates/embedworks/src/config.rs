//! Descriptor types for embedders and parsers.
//!
//! Descriptors are plain serializable values; they hold no live connection.
//! A live instance is produced by the explicit `open` call on each
//! descriptor, which is also where eager validation happens.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::registry::{ModelProfile, ModelRegistry};
use crate::retry::RetryPolicy;

/// Mask substituted for credential values in logs and debug output.
pub const REDACTED: &str = "***REDACTED***";

/// Option keys whose values never reach the logs.
const SENSITIVE_KEYS: [&str; 5] = ["api_key", "password", "token", "secret", "authorization"];

/// Parser backends the gateway service knows how to run.
pub const SUPPORTED_PARSER_BACKENDS: [&str; 1] = ["mineru"];

/// Which provider implementation an opened instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible embeddings API. No parse endpoints.
    Openai,
    /// Self-hosted gateway: OpenAI-style embeddings plus parse/job endpoints.
    #[default]
    Gateway,
}

/// Terminal behavior once retries are exhausted on a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Propagate the failure to the caller of the whole operation.
    #[default]
    FailFast,
    /// Embedding only: substitute all-zero vectors for the failed batch and
    /// keep going. Permanent errors are never masked.
    ZeroVectorFallback,
}

/// Serializable description of how to reach the embedding service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_embed_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Requested output dimensionality; requires a model that supports
    /// overriding. `None` means the model default.
    #[serde(default)]
    pub dimensions: Option<usize>,
    /// Token ceiling for one remote call.
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            endpoint: default_embed_endpoint(),
            api_key: None,
            model: default_model(),
            dimensions: None,
            max_batch_tokens: default_max_batch_tokens(),
            timeout_secs: default_embed_timeout_secs(),
            retry: RetryPolicy::default(),
            error_handling: ErrorHandling::default(),
        }
    }
}

impl EmbedderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::config("embedder endpoint must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(Error::config("embedder model must not be empty"));
        }
        if self.max_batch_tokens == 0 {
            return Err(Error::config("max_batch_tokens must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(Error::config("embedder timeout_secs must be > 0"));
        }
        self.retry.validate()
    }
}

// Credentials stay out of debug output.
impl fmt::Debug for EmbedderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbedderConfig")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("max_batch_tokens", &self.max_batch_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .field("error_handling", &self.error_handling)
            .finish()
    }
}

/// Serializable description of how to reach the parsing service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_parse_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    /// Which parser the service runs, e.g. "mineru".
    #[serde(default = "default_parser_backend")]
    pub parser_backend: String,
    #[serde(default = "default_parser_mode")]
    pub parser_mode: String,
    /// Arbitrary options forwarded verbatim in the submission payload.
    #[serde(default)]
    pub custom_options: Map<String, Value>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            endpoint: default_parse_endpoint(),
            api_key: None,
            document_type: default_document_type(),
            parser_backend: default_parser_backend(),
            parser_mode: default_parser_mode(),
            custom_options: Map::new(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            submit_timeout_secs: default_submit_timeout_secs(),
            status_timeout_secs: default_status_timeout_secs(),
            max_concurrent_files: default_max_concurrent_files(),
            retry: RetryPolicy::default(),
            error_handling: ErrorHandling::default(),
        }
    }
}

impl ParserConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::config("parser endpoint must not be empty"));
        }
        if self.backend != BackendKind::Gateway {
            return Err(Error::config(
                "document parsing requires the gateway backend",
            ));
        }
        if !SUPPORTED_PARSER_BACKENDS.contains(&self.parser_backend.as_str()) {
            return Err(Error::config(format!(
                "Unsupported parser backend '{}'. Supported backends: {}",
                self.parser_backend,
                SUPPORTED_PARSER_BACKENDS.join(", ")
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::config("poll_interval_secs must be > 0"));
        }
        if self.poll_timeout_secs == 0 {
            return Err(Error::config("poll_timeout_secs must be > 0"));
        }
        if self.poll_timeout_secs < self.poll_interval_secs {
            return Err(Error::config(
                "poll_timeout_secs must be >= poll_interval_secs",
            ));
        }
        if self.submit_timeout_secs == 0 || self.status_timeout_secs == 0 {
            return Err(Error::config("request timeouts must be > 0"));
        }
        if self.max_concurrent_files == 0 {
            return Err(Error::config("max_concurrent_files must be > 0"));
        }
        self.retry.validate()
    }

    /// Custom options safe to log.
    pub fn sanitized_options(&self) -> Map<String, Value> {
        sanitize_options(&self.custom_options)
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("document_type", &self.document_type)
            .field("parser_backend", &self.parser_backend)
            .field("parser_mode", &self.parser_mode)
            .field("custom_options", &self.sanitized_options())
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("submit_timeout_secs", &self.submit_timeout_secs)
            .field("status_timeout_secs", &self.status_timeout_secs)
            .field("max_concurrent_files", &self.max_concurrent_files)
            .field("retry", &self.retry)
            .field("error_handling", &self.error_handling)
            .finish()
    }
}

/// A custom model profile declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub dimensions: usize,
    #[serde(default)]
    pub supports_overriding_dimensions: bool,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

impl ModelConfig {
    pub fn profile(&self) -> ModelProfile {
        ModelProfile::new(
            self.dimensions,
            self.supports_overriding_dimensions,
            self.max_input_tokens,
        )
    }
}

/// Top-level configuration: both descriptors plus custom model entries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.embedder.validate()?;
        self.parser.validate()?;
        for entry in &self.models {
            if entry.name.trim().is_empty() {
                return Err(Error::config("model entry name must not be empty"));
            }
            if entry.dimensions == 0 || entry.max_input_tokens == 0 {
                return Err(Error::config(format!(
                    "model entry '{}' must have dimensions > 0 and max_input_tokens > 0",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    /// Push any `[[models]]` entries into the registry. Last write wins.
    pub fn register_models(&self, registry: &ModelRegistry) {
        for entry in &self.models {
            registry.register(&entry.name, entry.profile());
        }
    }
}

/// Recursively mask sensitive keys in an options map before logging it.
pub fn sanitize_options(options: &Map<String, Value>) -> Map<String, Value> {
    options
        .iter()
        .map(|(key, value)| {
            let masked = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else if let Value::Object(nested) = value {
                Value::Object(sanitize_options(nested))
            } else {
                value.clone()
            };
            (key.clone(), masked)
        })
        .collect()
}

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

fn default_embed_endpoint() -> String {
    "http://localhost:9997/v1".to_string()
}

fn default_model() -> String {
    "conan-embedding-v1".to_string()
}

fn default_max_batch_tokens() -> usize {
    10_000
}

fn default_embed_timeout_secs() -> u64 {
    30
}

fn default_parse_endpoint() -> String {
    "http://localhost:8000".to_string()
}

fn default_document_type() -> String {
    "pdf".to_string()
}

fn default_parser_backend() -> String {
    "mineru".to_string()
}

fn default_parser_mode() -> String {
    "pipeline".to_string()
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_poll_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_submit_timeout_secs() -> u64 {
    35
}

fn default_status_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent_files() -> usize {
    4
}

fn default_max_input_tokens() -> usize {
    crate::registry::DEFAULT_MAX_INPUT_TOKENS
}
