use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationRequest, LlmClient};
use crate::pipeline::error::GenerationError;

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Create a client for an Ollama instance. `connect_timeout` bounds the
    /// TCP handshake; each call carries its own overall deadline.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GenerationError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of models installed on the instance.
    pub fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| map_send_error(e, "tags", 0))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: OllamaTagsResponse = response
            .json()
            .map_err(|e| GenerationError::MalformedEnvelope(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            system: &request.system,
            stream: false,
            format: "json",
            options: OllamaOptions { num_predict: request.max_tokens },
        };

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .map_err(|e| map_send_error(e, &request.model, request.timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: OllamaGenerateResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout {
                    model: request.model.clone(),
                    after_secs: request.timeout.as_secs(),
                }
            } else {
                GenerationError::MalformedEnvelope(e.to_string())
            }
        })?;

        debug!(model = %request.model, chars = parsed.response.len(), "Ollama reply received");
        Ok(parsed.response)
    }
}

fn map_send_error(e: reqwest::Error, model: &str, after_secs: u64) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout { model: model.to_string(), after_secs }
    } else if e.is_connect() {
        GenerationError::Transport(format!("Cannot connect to Ollama: {e}"))
    } else {
        GenerationError::Transport(e.to_string())
    }
}

/// Map a non-2xx status to its error class.
fn classify_status(status: u16, body: String) -> GenerationError {
    match status {
        401 | 403 => GenerationError::AuthFailure(format!("status {status}: {body}")),
        429 => GenerationError::QuotaExceeded(body),
        _ => GenerationError::Backend { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(401, String::new()), GenerationError::AuthFailure(_)));
        assert!(matches!(classify_status(403, String::new()), GenerationError::AuthFailure(_)));
        assert!(matches!(classify_status(429, "slow down".into()), GenerationError::QuotaExceeded(b) if b == "slow down"));
        assert_eq!(
            classify_status(404, "model not found".into()),
            GenerationError::Backend { status: 404, body: "model not found".into() }
        );
    }

    #[test]
    fn request_body_carries_token_budget() {
        let body = OllamaGenerateRequest {
            model: "qwen2.5:7b",
            prompt: "p",
            system: "s",
            stream: false,
            format: "json",
            options: OllamaOptions { num_predict: 2048 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["num_predict"], 2048);
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
    }

    #[test]
    fn unreachable_server_is_transport_or_timeout() {
        let client = OllamaClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let request = GenerationRequest {
            model: "m".into(),
            prompt: "p".into(),
            system: String::new(),
            max_tokens: 8,
            timeout: Duration::from_secs(2),
        };
        let err = client.generate(&request).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Transport(_) | GenerationError::Timeout { .. }
        ));
    }
}
