//! Model profile registry: per-model dimensions and input limits.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-item token limit shared by every built-in model.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 8191;

/// Intrinsic, provider-independent properties of an embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Output dimensionality the service produces by default.
    pub dimensions: usize,
    /// Whether the service accepts a `dimensions` override for this model.
    pub supports_overriding_dimensions: bool,
    /// Largest single input, in estimated tokens.
    pub max_input_tokens: usize,
}

impl ModelProfile {
    pub fn new(dimensions: usize, supports_overriding_dimensions: bool, max_input_tokens: usize) -> Self {
        Self {
            dimensions,
            supports_overriding_dimensions,
            max_input_tokens,
        }
    }
}

/// Registry mapping model ids to their profiles.
///
/// Reads vastly outnumber writes: every embedder open performs a lookup,
/// while registration happens at startup or on explicit extension.
#[derive(Debug)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, ModelProfile>>,
}

impl ModelRegistry {
    /// Registry with no known models.
    pub fn empty() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Registry seeded with the built-in catalog.
    pub fn with_builtin_models() -> Self {
        let registry = Self::empty();
        {
            let mut models = registry.models.write();
            models.insert(
                "text-embedding-ada-002".to_string(),
                ModelProfile::new(1536, false, DEFAULT_MAX_INPUT_TOKENS),
            );
            models.insert(
                "text-embedding-3-small".to_string(),
                ModelProfile::new(1536, true, DEFAULT_MAX_INPUT_TOKENS),
            );
            models.insert(
                "text-embedding-3-large".to_string(),
                ModelProfile::new(3072, true, DEFAULT_MAX_INPUT_TOKENS),
            );
            models.insert(
                "conan-embedding-v1".to_string(),
                ModelProfile::new(1792, false, DEFAULT_MAX_INPUT_TOKENS),
            );
        }
        registry
    }

    /// Register or overwrite a model profile. Last write wins.
    pub fn register(&self, model_id: impl Into<String>, profile: ModelProfile) {
        let model_id = model_id.into();
        let mut models = self.models.write();
        if models.insert(model_id.clone(), profile).is_some() {
            tracing::debug!("Replaced existing model profile for '{}'", model_id);
        } else {
            tracing::debug!("Registered model profile for '{}'", model_id);
        }
    }

    /// Look up a model's profile, failing with the list of known ids.
    pub fn get(&self, model_id: &str) -> Result<ModelProfile> {
        let models = self.models.read();
        models.get(model_id).copied().ok_or_else(|| {
            let mut supported: Vec<&str> = models.keys().map(String::as_str).collect();
            supported.sort_unstable();
            Error::config(format!(
                "Unsupported model '{}'. Supported models: {}",
                model_id,
                supported.join(", ")
            ))
        })
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.read().contains_key(model_id)
    }

    /// Sorted list of known model ids.
    pub fn supported_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_builtin_models()
    }
}
