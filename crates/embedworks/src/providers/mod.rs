//! Remote backend implementations.

pub mod gateway;
pub mod openai;
pub mod remote;

pub use gateway::GatewayProvider;
pub use openai::OpenAiProvider;
pub use remote::{
    JobStatusReport, ParseSubmission, RemoteJobStatus, RemoteProvider, SubmitOutcome,
};
