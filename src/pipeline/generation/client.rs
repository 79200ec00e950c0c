use std::time::Instant;

use tracing::{debug, warn};

use super::{GenerationRequest, LlmClient};
use crate::config::PipelineConfig;
use crate::pipeline::error::{GenerationError, ServiceUnavailable};
use crate::pipeline::prompt::RenderedPrompt;

/// Sends prompts to a backend, swapping to the secondary model once when the
/// primary fails. Never returns a transport error, only [`ServiceUnavailable`].
pub struct GenerationClient {
    backend: Box<dyn LlmClient>,
    primary_model: String,
    secondary_model: String,
    timeout: std::time::Duration,
}

impl GenerationClient {
    pub fn new(backend: Box<dyn LlmClient>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            primary_model: config.primary_model.clone(),
            secondary_model: config.secondary_model.clone(),
            timeout: config.call_timeout,
        }
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    pub fn call(&self, prompt: &RenderedPrompt, max_tokens: u32) -> Result<String, ServiceUnavailable> {
        let primary = match self.attempt(&self.primary_model, prompt, max_tokens) {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        warn!(
            model = %self.primary_model,
            error_class = primary.class(),
            error = %primary,
            "Primary model failed, trying secondary"
        );

        let secondary = match self.attempt(&self.secondary_model, prompt, max_tokens) {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        warn!(
            model = %self.secondary_model,
            error_class = secondary.class(),
            error = %secondary,
            "Secondary model failed"
        );

        Err(ServiceUnavailable {
            primary_model: self.primary_model.clone(),
            primary,
            secondary_model: self.secondary_model.clone(),
            secondary,
        })
    }

    fn attempt(
        &self,
        model: &str,
        prompt: &RenderedPrompt,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        let request = GenerationRequest {
            model: model.to_string(),
            prompt: prompt.prompt.clone(),
            system: prompt.system.clone(),
            max_tokens,
            timeout: self.timeout,
        };

        let started = Instant::now();
        let text = self.backend.generate(&request)?;
        let elapsed = started.elapsed();

        // Late replies count as timeouts even if the backend did not enforce it.
        if elapsed > self.timeout {
            return Err(GenerationError::Timeout {
                model: model.to_string(),
                after_secs: self.timeout.as_secs(),
            });
        }
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        debug!(model, elapsed_ms = elapsed.as_millis() as u64, chars = text.len(), "Generation succeeded");
        Ok(text)
    }
}
