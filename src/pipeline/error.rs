//! Typed failure values for the analysis pipeline.
//!
//! None of these ever reaches a caller of the orchestrator: each one selects a
//! recovery path (retry, single resubmission, rule-based fallback). Only
//! [`crate::profile::ConfigurationError`] is allowed out, at construction time.

use thiserror::Error;

/// Why one model call failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Model '{model}' did not answer within {after_secs}s")]
    Timeout { model: String, after_secs: u64 },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Authorization failed: {0}")]
    AuthFailure(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service returned error (status {status}): {body}")]
    Backend { status: u16, body: String },

    #[error("Service returned an empty response")]
    EmptyResponse,

    #[error("Unreadable service envelope: {0}")]
    MalformedEnvelope(String),
}

impl GenerationError {
    /// Short class name used in structured logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::AuthFailure(_) => "auth_failure",
            Self::Transport(_) => "transport",
            Self::Backend { .. } => "backend",
            Self::EmptyResponse => "empty_response",
            Self::MalformedEnvelope(_) => "malformed_envelope",
        }
    }
}

/// Both the primary and the secondary model failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "Generation service unavailable (primary '{primary_model}': {primary}; \
     secondary '{secondary_model}': {secondary})"
)]
pub struct ServiceUnavailable {
    pub primary_model: String,
    pub primary: GenerationError,
    pub secondary_model: String,
    pub secondary: GenerationError,
}

/// No usable structure could be recovered from a reply.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("No structured payload found in response")]
    NoPayload,

    #[error("Structured payload appears truncated")]
    Truncated,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Reply has no batch_results collection")]
    MissingBatchResults,

    #[error("Expected {expected} batch results, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Analysis contains no words")]
    EmptyAnalysis,
}

impl ParseFailure {
    /// Failures that invalidate a whole chunk reply rather than one record.
    pub fn is_chunk_level(&self) -> bool {
        matches!(
            self,
            Self::NoPayload
                | Self::Truncated
                | Self::InvalidJson(_)
                | Self::MissingBatchResults
                | Self::LengthMismatch { .. }
        )
    }
}

/// Any reason a request ended up on the rule-based path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisFailure {
    #[error(transparent)]
    Unavailable(#[from] ServiceUnavailable),

    #[error(transparent)]
    Parse(#[from] ParseFailure),
}
