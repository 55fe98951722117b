//! embedworks: client-side orchestration for remote embedding and document
//! parsing services.
//!
//! Turns ordered text collections into fixed-dimension vectors through a
//! token-budget-aware batching pipeline, and drives asynchronous parse jobs
//! to completion with retry, polling, and partial-success reporting.

pub mod config;
pub mod embedding;
pub mod error;
pub mod parsing;
pub mod providers;
pub mod registry;
pub mod retry;

pub use config::{BackendKind, Config, EmbedderConfig, ErrorHandling, ModelConfig, ParserConfig};
pub use embedding::TextEmbedder;
pub use error::{Error, Result};
pub use parsing::{BatchParseResult, DocumentParser, FileParseResult, JobStatus, ParseJob};
pub use registry::{ModelProfile, ModelRegistry};
pub use retry::{RetryPolicy, RetryStrategy};
