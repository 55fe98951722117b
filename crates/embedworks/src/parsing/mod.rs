//! Asynchronous document parsing: per-file job pipeline plus the batch
//! coordinator.

mod job;
mod parser;
mod worker;

pub use job::{BatchParseResult, FileParseResult, JobStatus, ParseJob};
pub use parser::DocumentParser;
