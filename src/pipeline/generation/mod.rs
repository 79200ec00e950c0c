//! Text generation: the backend trait and the primary/secondary client.

pub mod client;
pub mod mock;
pub mod ollama;

pub use client::GenerationClient;
pub use mock::{CallLog, MockLlmClient};
pub use ollama::OllamaClient;

use std::time::Duration;

use super::error::GenerationError;

/// One call to a generation backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub system: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Abstraction over text generation backends for testability.
///
/// Implementations must be shareable across chunk worker threads.
pub trait LlmClient: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
