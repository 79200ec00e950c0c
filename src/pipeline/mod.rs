pub mod error;
pub mod extractor; // Tolerant reply parsing (single and batch shapes)
pub mod fallback; // Rule-based analysis when generation fails
pub mod generation;
pub mod job;
pub mod orchestrator;
pub mod output_sanitize;
pub mod prompt;
pub mod retry;
pub mod tokenize;
pub mod types;
pub mod validator;

pub use error::{AnalysisFailure, GenerationError, ParseFailure, ServiceUnavailable};
pub use job::CancellationToken;
pub use orchestrator::{AnalysisPipeline, BatchOutcome, BatchStatusEvent, BatchSummary};
pub use types::{AnalysisRequest, AnalysisResult, Provenance, ValidationIssue, WordExplanation};
