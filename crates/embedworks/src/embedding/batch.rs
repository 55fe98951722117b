//! Token estimation and batch accumulation.

/// Rough chars-per-token ratio used for every budget decision.
pub(crate) const APPROX_CHARS_PER_TOKEN: usize = 3;

/// Estimated token count for one text.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / APPROX_CHARS_PER_TOKEN
}

/// Texts accumulated for the next remote call, with their running token sum.
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    texts: Vec<String>,
    token_count: usize,
}

impl PendingBatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.texts.len()
    }

    pub(crate) fn token_count(&self) -> usize {
        self.token_count
    }

    /// Whether adding `tokens` more would reach the per-call ceiling.
    pub(crate) fn would_overflow(&self, tokens: usize, max_batch_tokens: usize) -> bool {
        self.token_count + tokens >= max_batch_tokens
    }

    pub(crate) fn push(&mut self, text: String, tokens: usize) {
        self.texts.push(text);
        self.token_count += tokens;
    }

    /// Drain the accumulated texts, resetting the token sum.
    pub(crate) fn take(&mut self) -> Vec<String> {
        self.token_count = 0;
        std::mem::take(&mut self.texts)
    }
}
