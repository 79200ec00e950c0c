//! AnalysisPipeline: drives prompt, generation, extraction and validation
//! for single requests and chunked batches, with retry and rule-based fallback.
//!
//! Guarantees: `run` returns exactly one result per request, in request order,
//! and no per-request failure escapes as an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::error::AnalysisFailure;
use super::extractor::ResponseExtractor;
use super::fallback::FallbackAnalyzer;
use super::generation::{GenerationClient, LlmClient};
use super::job::{BatchJob, CancellationToken, RequestState};
use super::prompt::PromptBuilder;
use super::retry::RetryPolicy;
use super::types::{AnalysisRequest, AnalysisResult, Provenance};
use super::validator::{ValidationPolicy, Validator};
use crate::config::PipelineConfig;
use crate::profile::{ComplexityTier, ConfigurationError, LanguageProfile};

// ═══════════════════════════════════════════
// Batch outcome and progress events
// ═══════════════════════════════════════════

/// Event emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchStatusEvent {
    Started {
        batch_id: String,
        request_count: usize,
        chunk_count: usize,
    },
    ChunkCompleted {
        chunk: usize,
        completed_chunks: usize,
        total_chunks: usize,
        generated: usize,
        fallback: usize,
    },
    Cancelled {
        completed_chunks: usize,
        total_chunks: usize,
    },
    Completed {
        generated: usize,
        fallback: usize,
        duration_ms: u64,
    },
}

/// Counters for one `run_with` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total_requests: usize,
    pub chunks: usize,
    pub completed_chunks: usize,
    /// Batch-prompt generation calls, retries included.
    pub chunk_calls: usize,
    /// Items resubmitted alone after a malformed batch record.
    pub single_resubmissions: usize,
    pub generated: usize,
    pub fallback: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Results aligned with the submitted requests. An entry is `None` only when
/// cancellation stopped its chunk from starting.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<Option<AnalysisResult>>,
    pub summary: BatchSummary,
}

pub type ProgressFn<'a> = &'a (dyn Fn(BatchStatusEvent) + Sync);

#[derive(Default)]
struct Counters {
    chunk_calls: AtomicUsize,
    single_resubmissions: AtomicUsize,
    completed_chunks: AtomicUsize,
}

// ═══════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════

pub struct AnalysisPipeline {
    profile: Arc<LanguageProfile>,
    client: GenerationClient,
    config: PipelineConfig,
    retry: RetryPolicy,
    validation: ValidationPolicy,
}

impl AnalysisPipeline {
    pub fn new(
        profile: Arc<LanguageProfile>,
        backend: Box<dyn LlmClient>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        info!(
            language = profile.language_id(),
            primary = %config.primary_model,
            secondary = %config.secondary_model,
            chunk_size = config.chunk_size,
            "Analysis pipeline ready"
        );
        Ok(Self {
            client: GenerationClient::new(backend, &config),
            retry: RetryPolicy::from_config(&config),
            validation: ValidationPolicy::from_config(&config),
            profile,
            config,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_validation_policy(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    pub fn profile(&self) -> &Arc<LanguageProfile> {
        &self.profile
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build a request against this pipeline's profile.
    pub fn request(
        &self,
        sentence: impl Into<String>,
        target_word: impl Into<String>,
        tier: ComplexityTier,
    ) -> AnalysisRequest {
        AnalysisRequest::new(&self.profile, sentence, target_word, tier)
    }

    /// Analyze one request: single prompt, bounded retries, then fallback.
    pub fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult {
        let span = info_span!(
            "analyze",
            language = request.profile().language_id(),
            target = request.target_word(),
            tier = %request.tier()
        );
        let _guard = span.enter();
        self.analyze_single(request)
    }

    /// Analyze many requests. `results[i]` always corresponds to `requests[i]`.
    pub fn run(&self, requests: &[AnalysisRequest]) -> Vec<AnalysisResult> {
        let outcome = self.run_with(requests, &CancellationToken::new(), None);
        outcome
            .results
            .into_iter()
            .zip(requests)
            .map(|(result, request)| result.unwrap_or_else(|| self.fallback(request)))
            .collect()
    }

    /// Analyze many requests with cancellation and progress reporting.
    pub fn run_with(
        &self,
        requests: &[AnalysisRequest],
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> BatchOutcome {
        let start = Instant::now();
        let batch_id = Uuid::new_v4().to_string();
        let chunks = plan_chunks(requests, self.config.chunk_size);
        let total_chunks = chunks.len();
        let emit = |event: BatchStatusEvent| {
            if let Some(f) = progress {
                f(event);
            }
        };

        info!(batch_id = %batch_id, requests = requests.len(), chunks = total_chunks, "Starting analysis batch");
        emit(BatchStatusEvent::Started {
            batch_id: batch_id.clone(),
            request_count: requests.len(),
            chunk_count: total_chunks,
        });

        let slots: Mutex<Vec<Option<AnalysisResult>>> = Mutex::new(vec![None; requests.len()]);
        let counters = Counters::default();
        let cursor = AtomicUsize::new(0);

        let worker = || loop {
            if cancel.is_cancelled() {
                break;
            }
            let chunk_index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(indices) = chunks.get(chunk_index) else {
                break;
            };

            let mut job = BatchJob::new(indices.iter().map(|&i| (i, &requests[i])));
            {
                let span = info_span!("chunk", batch_id = %batch_id, chunk = chunk_index, job = %job.id(), size = job.len());
                let _guard = span.enter();
                self.process_chunk(&mut job, &counters);
            }

            let results = job.into_results();
            let generated = results.iter().filter(|(_, r)| r.provenance == Provenance::Generated).count();
            let fallback = results.len() - generated;
            {
                let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
                for (index, result) in results {
                    slots[index] = Some(result);
                }
            }
            let completed = counters.completed_chunks.fetch_add(1, Ordering::SeqCst) + 1;
            emit(BatchStatusEvent::ChunkCompleted {
                chunk: chunk_index,
                completed_chunks: completed,
                total_chunks,
                generated,
                fallback,
            });
        };

        let workers = self.config.max_concurrent_chunks.clamp(1, total_chunks.max(1));
        if workers == 1 {
            worker();
        } else {
            std::thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(&worker);
                }
            });
        }

        let results = slots.into_inner().unwrap_or_else(|e| e.into_inner());
        let completed_chunks = counters.completed_chunks.load(Ordering::SeqCst);
        let generated = results
            .iter()
            .flatten()
            .filter(|r| r.provenance == Provenance::Generated)
            .count();
        let fallback = results.iter().flatten().count() - generated;
        let cancelled = completed_chunks < total_chunks;
        let duration_ms = start.elapsed().as_millis() as u64;

        if cancelled {
            warn!(batch_id = %batch_id, completed_chunks, total_chunks, "Analysis batch cancelled");
            emit(BatchStatusEvent::Cancelled { completed_chunks, total_chunks });
        } else {
            info!(batch_id = %batch_id, generated, fallback, duration_ms, "Analysis batch complete");
            emit(BatchStatusEvent::Completed { generated, fallback, duration_ms });
        }

        BatchOutcome {
            results,
            summary: BatchSummary {
                batch_id,
                total_requests: requests.len(),
                chunks: total_chunks,
                completed_chunks,
                chunk_calls: counters.chunk_calls.load(Ordering::SeqCst),
                single_resubmissions: counters.single_resubmissions.load(Ordering::SeqCst),
                generated,
                fallback,
                cancelled,
                duration_ms,
            },
        }
    }

    fn process_chunk(&self, job: &mut BatchJob<'_>, counters: &Counters) {
        let requests = job.requests();
        let Some(first) = requests.first() else {
            return;
        };
        let profile = first.profile();
        let prompt = PromptBuilder::new(profile).build_batch(&requests);
        let digest = prompt.digest();
        let extractor = ResponseExtractor::new(profile);
        let validator = Validator::new(profile, &self.validation);
        let max_attempts = self.retry.max_attempts();

        let mut resubmit = Vec::new();
        let mut parsed = false;
        for attempt in 1..=max_attempts {
            job.advance_unresolved(RequestState::AwaitingGeneration);
            counters.chunk_calls.fetch_add(1, Ordering::SeqCst);

            let failure: AnalysisFailure = match self.client.call(&prompt, self.config.batch_max_tokens) {
                Ok(text) => match extractor.extract_batch(&text, job.len()) {
                    Ok(items) => {
                        for (pos, item) in items.into_iter().enumerate() {
                            match item {
                                Ok(raw) => {
                                    job.advance(pos, RequestState::Parsed);
                                    let result = validator.validate(raw, requests[pos]);
                                    job.advance(pos, RequestState::Validated);
                                    job.resolve(pos, result);
                                }
                                Err(e) => {
                                    debug!(position = pos, error = %e, "Malformed batch record");
                                    job.advance(pos, RequestState::ParseFailed);
                                    resubmit.push(pos);
                                }
                            }
                        }
                        parsed = true;
                        break;
                    }
                    Err(e) => e.into(),
                },
                Err(e) => e.into(),
            };

            job.advance_unresolved(RequestState::ParseFailed);
            warn!(attempt, max_attempts, digest = %digest, error = %failure, "Chunk attempt failed");
            if attempt < max_attempts {
                self.retry.backoff(attempt);
            }
        }

        if parsed {
            for pos in resubmit {
                counters.single_resubmissions.fetch_add(1, Ordering::SeqCst);
                job.advance(pos, RequestState::AwaitingGeneration);
                let result = self.analyze_single(requests[pos]);
                job.resolve(pos, result);
            }
        }

        for pos in job.unresolved() {
            let result = self.fallback(requests[pos]);
            job.resolve(pos, result);
        }
    }

    fn analyze_single(&self, request: &AnalysisRequest) -> AnalysisResult {
        let profile = request.profile();
        let prompt = PromptBuilder::new(profile).build_single(request);
        let digest = prompt.digest();
        let extractor = ResponseExtractor::new(profile);
        let max_attempts = self.retry.max_attempts();

        for attempt in 1..=max_attempts {
            let failure: AnalysisFailure = match self.client.call(&prompt, self.config.single_max_tokens) {
                Ok(text) => match extractor.extract_single(&text) {
                    Ok(raw) => {
                        let result = Validator::new(profile, &self.validation).validate(raw, request);
                        debug!(confidence = result.confidence, issues = result.issues.len(), "Request validated");
                        return result;
                    }
                    Err(e) => e.into(),
                },
                Err(e) => e.into(),
            };

            warn!(attempt, max_attempts, digest = %digest, error = %failure, "Single attempt failed");
            if attempt < max_attempts {
                self.retry.backoff(attempt);
            }
        }

        self.fallback(request)
    }

    fn fallback(&self, request: &AnalysisRequest) -> AnalysisResult {
        info!(provenance = "fallback", target = request.target_word(), "Using rule-based analysis");
        FallbackAnalyzer::new(request.profile(), self.config.fallback_confidence).analyze_request(request)
    }
}

/// Group requests by (language, target word, tier) in order of first
/// appearance, then split each group into chunks of at most `chunk_size`.
fn plan_chunks(requests: &[AnalysisRequest], chunk_size: usize) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_key: HashMap<(String, String, ComplexityTier), usize> = HashMap::new();
    for (index, request) in requests.iter().enumerate() {
        let group = *by_key.entry(request.chunk_key()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[group].push(index);
    }

    groups
        .into_iter()
        .flat_map(|group| {
            group
                .chunks(chunk_size.max(1))
                .map(<[usize]>::to_vec)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::pipeline::error::GenerationError;
    use crate::pipeline::generation::{CallLog, GenerationRequest, MockLlmClient};
    use crate::pipeline::retry::{no_jitter, RecordingSleeper};
    use crate::pipeline::tokenize::tokenize;
    use crate::profile::test_support;

    const CAT_REPLY: &str = r#"```json
{
  "words": [
    {"word": "The", "grammatical_role": "article", "individual_meaning": "definite article pointing to a known cat"},
    {"word": "cat", "grammatical_role": "noun", "individual_meaning": "a small domesticated feline, the subject"},
    {"word": "sleeps", "grammatical_role": "verb", "individual_meaning": "third person singular present tense of sleep"}
  ],
  "explanations": {"overall_structure": "Subject followed by an intransitive verb", "key_features": "present simple"}
}
```"#;

    fn record(sentence: &str, source: &str) -> serde_json::Value {
        let words: Vec<serde_json::Value> = tokenize(sentence)
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "word": t,
                    "grammatical_role": "noun",
                    "individual_meaning": format!("{source} meaning of {t} in context"),
                })
            })
            .collect();
        serde_json::json!({
            "words": words,
            "explanations": {"overall_structure": format!("{source} structure"), "key_features": ""}
        })
    }

    fn is_batch(req: &GenerationRequest) -> bool {
        req.prompt.contains("batch_results")
    }

    /// Sentences listed in a batch prompt, in order.
    fn batch_sentences(prompt: &str) -> Vec<String> {
        prompt
            .split("SENTENCES:\n")
            .nth(1)
            .unwrap_or_default()
            .lines()
            .take_while(|l| !l.trim().is_empty())
            .filter_map(|l| l.split_once(". ").map(|(_, s)| s.to_string()))
            .collect()
    }

    fn single_sentence(prompt: &str) -> String {
        prompt
            .lines()
            .find_map(|l| l.strip_prefix("SENTENCE: "))
            .unwrap_or_default()
            .to_string()
    }

    /// Echoes well-formed analyses; sentences containing "BROKEN" get a
    /// malformed batch record.
    fn echo_client() -> MockLlmClient {
        MockLlmClient::from_fn(|req| {
            if is_batch(req) {
                let items: Vec<serde_json::Value> = batch_sentences(&req.prompt)
                    .iter()
                    .map(|s| {
                        if s.contains("BROKEN") {
                            serde_json::json!({"words": "unreadable"})
                        } else {
                            record(s, "batch")
                        }
                    })
                    .collect();
                Ok(serde_json::json!({ "batch_results": items }).to_string())
            } else {
                Ok(record(&single_sentence(&req.prompt), "single").to_string())
            }
        })
    }

    fn quiet_retry(sleeper: &RecordingSleeper) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(no_jitter)
            .with_sleeper(Arc::new(sleeper.clone()))
    }

    fn pipeline(client: MockLlmClient, config: PipelineConfig) -> (AnalysisPipeline, CallLog, RecordingSleeper) {
        let log = client.call_log();
        let sleeper = RecordingSleeper::new();
        let pipeline = AnalysisPipeline::new(test_support::english(), Box::new(client), config)
            .unwrap()
            .with_retry_policy(quiet_retry(&sleeper));
        (pipeline, log, sleeper)
    }

    fn cat_requests(pipeline: &AnalysisPipeline, n: usize) -> Vec<AnalysisRequest> {
        (0..n)
            .map(|i| pipeline.request(format!("The cat number {i} sleeps"), "cat", ComplexityTier::Beginner))
            .collect()
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = PipelineConfig { chunk_size: 0, ..PipelineConfig::default() };
        let result = AnalysisPipeline::new(test_support::english(), Box::new(MockLlmClient::new("{}")), config);
        assert!(matches!(result, Err(ConfigurationError::InvalidPolicy(_))));
    }

    #[test]
    fn well_formed_single_reply_is_generated() {
        let (pipeline, log, _) = pipeline(MockLlmClient::new(CAT_REPLY), PipelineConfig::default());
        let request = pipeline.request("The cat sleeps", "cat", ComplexityTier::Beginner);
        let result = pipeline.analyze(&request);

        assert_eq!(result.provenance, Provenance::Generated);
        assert_eq!(result.words.len(), 3);
        assert!(result.confidence > 0.5, "confidence {}", result.confidence);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn refusal_falls_back() {
        let (pipeline, _, sleeper) = pipeline(MockLlmClient::new("Sorry, I cannot help"), PipelineConfig::default());
        let request = pipeline.request("The cat sleeps", "cat", ComplexityTier::Beginner);
        let result = pipeline.analyze(&request);

        assert_eq!(result.provenance, Provenance::Fallback);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.words.len(), 3);
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn ten_requests_make_two_chunk_calls() {
        let (pipeline, log, _) = pipeline(echo_client(), PipelineConfig::default());
        let requests = cat_requests(&pipeline, 10);
        let outcome = pipeline.run_with(&requests, &CancellationToken::new(), None);

        assert_eq!(outcome.summary.chunks, 2);
        assert_eq!(outcome.summary.chunk_calls, 2);
        assert_eq!(log.len(), 2);
        assert!(log.requests().iter().all(is_batch));
        assert_eq!(outcome.results.len(), 10);
        for (result, request) in outcome.results.iter().zip(&requests) {
            let result = result.as_ref().unwrap();
            assert_eq!(result.sentence, request.sentence());
            assert_eq!(result.provenance, Provenance::Generated);
        }
    }

    #[test]
    fn malformed_item_is_the_only_resubmission() {
        let (pipeline, log, _) = pipeline(echo_client(), PipelineConfig::default());
        let mut requests = cat_requests(&pipeline, 16);
        // third item of the second chunk
        requests[10] = pipeline.request("The BROKEN cat sleeps", "cat", ComplexityTier::Beginner);

        let outcome = pipeline.run_with(&requests, &CancellationToken::new(), None);

        assert_eq!(outcome.summary.chunk_calls, 2);
        assert_eq!(outcome.summary.single_resubmissions, 1);
        let singles: Vec<_> = log.requests().into_iter().filter(|r| !is_batch(r)).collect();
        assert_eq!(singles.len(), 1);
        assert!(singles[0].prompt.contains("The BROKEN cat sleeps"));

        for (i, result) in outcome.results.iter().enumerate() {
            let result = result.as_ref().unwrap();
            assert_eq!(result.provenance, Provenance::Generated);
            let source = if i == 10 { "single" } else { "batch" };
            assert!(
                result.words[0].explanation.starts_with(source),
                "item {i}: {}",
                result.words[0].explanation
            );
        }
    }

    #[test]
    fn both_models_timing_out_falls_back_silently() {
        let client = MockLlmClient::failing(GenerationError::Timeout { model: "any".into(), after_secs: 30 });
        let (pipeline, log, _) = pipeline(client, PipelineConfig::default());

        let request = pipeline.request("The cat sleeps", "cat", ComplexityTier::Beginner);
        let single = pipeline.analyze(&request);
        assert_eq!(single.provenance, Provenance::Fallback);
        assert_eq!(log.len(), 6);

        let requests = cat_requests(&pipeline, 3);
        let results = pipeline.run(&requests);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.provenance == Provenance::Fallback && r.confidence == 0.3));
    }

    #[test]
    fn chunk_level_failure_is_retried_then_succeeds() {
        let batch_ok = serde_json::json!({
            "batch_results": [record("The cat number 0 sleeps", "batch"), record("The cat number 1 sleeps", "batch")]
        })
        .to_string();
        let client = MockLlmClient::scripted(vec![Ok("{\"batch_results\": [".into()), Ok(batch_ok)]);
        let (pipeline, log, sleeper) = pipeline(client, PipelineConfig::default());
        let requests = cat_requests(&pipeline, 2);

        let outcome = pipeline.run_with(&requests, &CancellationToken::new(), None);
        assert_eq!(outcome.summary.chunk_calls, 2);
        assert_eq!(log.len(), 2);
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(100)]);
        assert_eq!(outcome.summary.generated, 2);
    }

    #[test]
    fn length_mismatch_exhausts_retries_then_falls_back() {
        let reply = serde_json::json!({ "batch_results": [record("The cat number 0 sleeps", "batch")] }).to_string();
        let (pipeline, log, _) = pipeline(MockLlmClient::new(&reply), PipelineConfig::default());
        let requests = cat_requests(&pipeline, 2);

        let results = pipeline.run(&requests);
        assert_eq!(log.len(), 3);
        assert!(results.iter().all(AnalysisResult::is_fallback));
        assert_eq!(results[1].sentence, "The cat number 1 sleeps");
    }

    #[test]
    fn chunks_share_target_and_tier() {
        let (pipeline, log, _) = pipeline(echo_client(), PipelineConfig::default());
        let requests: Vec<_> = (0..6)
            .map(|i| {
                let target = if i % 2 == 0 { "cat" } else { "dog" };
                pipeline.request(format!("The {target} number {i} sleeps"), target, ComplexityTier::Beginner)
            })
            .collect();

        let results = pipeline.run(&requests);
        assert_eq!(log.len(), 2);
        for prompt in log.requests() {
            let sentences = batch_sentences(&prompt.prompt);
            assert_eq!(sentences.len(), 3);
            let cats = sentences.iter().filter(|s| s.contains("cat")).count();
            assert!(cats == 0 || cats == 3);
        }
        for (result, request) in results.iter().zip(&requests) {
            assert_eq!(result.sentence, request.sentence());
            assert_eq!(result.target_word, request.target_word());
        }
    }

    #[test]
    fn concurrent_chunks_preserve_order() {
        let config = PipelineConfig { chunk_size: 3, max_concurrent_chunks: 4, ..PipelineConfig::default() };
        let (pipeline, log, _) = pipeline(echo_client(), config);
        let requests = cat_requests(&pipeline, 20);

        let results = pipeline.run(&requests);
        assert_eq!(log.len(), 7);
        assert_eq!(results.len(), 20);
        for (result, request) in results.iter().zip(&requests) {
            assert_eq!(result.sentence, request.sentence());
            assert_eq!(result.provenance, Provenance::Generated);
        }
    }

    #[test]
    fn cancellation_keeps_completed_chunks() {
        let (pipeline, log, _) = pipeline(echo_client(), PipelineConfig::default());
        let requests = cat_requests(&pipeline, 20);
        let token = CancellationToken::new();
        let events = Mutex::new(Vec::new());
        let on_event = |event: BatchStatusEvent| {
            if matches!(event, BatchStatusEvent::ChunkCompleted { .. }) {
                token.cancel();
            }
            events.lock().unwrap().push(event);
        };

        let outcome = pipeline.run_with(&requests, &token, Some(&on_event));
        assert!(outcome.summary.cancelled);
        assert_eq!(outcome.summary.completed_chunks, 1);
        assert_eq!(log.len(), 1);
        assert!(outcome.results[..8].iter().all(Option::is_some));
        assert!(outcome.results[8..].iter().all(Option::is_none));

        let events = events.into_inner().unwrap();
        assert!(matches!(events.first(), Some(BatchStatusEvent::Started { request_count: 20, chunk_count: 3, .. })));
        assert!(matches!(
            events.last(),
            Some(BatchStatusEvent::Cancelled { completed_chunks: 1, total_chunks: 3 })
        ));
    }

    #[test]
    fn progress_reports_every_chunk() {
        let (pipeline, _, _) = pipeline(echo_client(), PipelineConfig::default());
        let requests = cat_requests(&pipeline, 10);
        let events = Mutex::new(Vec::new());
        let on_event = |event: BatchStatusEvent| events.lock().unwrap().push(event);

        pipeline.run_with(&requests, &CancellationToken::new(), Some(&on_event));
        let events = events.into_inner().unwrap();
        let chunk_events = events
            .iter()
            .filter(|e| matches!(e, BatchStatusEvent::ChunkCompleted { .. }))
            .count();
        assert_eq!(chunk_events, 2);
        assert!(matches!(events.last(), Some(BatchStatusEvent::Completed { generated: 10, fallback: 0, .. })));
    }

    #[test]
    fn empty_request_list() {
        let (pipeline, log, _) = pipeline(echo_client(), PipelineConfig::default());
        let outcome = pipeline.run_with(&[], &CancellationToken::new(), None);
        assert!(outcome.results.is_empty());
        assert!(!outcome.summary.cancelled);
        assert!(log.is_empty());
    }

    #[test]
    fn plan_groups_then_chunks() {
        let profile = test_support::english();
        let mk = |t: &str, tier| AnalysisRequest::new(&profile, "x", t, tier);
        let requests = vec![
            mk("a", ComplexityTier::Beginner),
            mk("b", ComplexityTier::Beginner),
            mk("a", ComplexityTier::Beginner),
            mk("a", ComplexityTier::Advanced),
            mk("A", ComplexityTier::Beginner),
        ];
        assert_eq!(plan_chunks(&requests, 2), vec![vec![0, 2], vec![4], vec![1], vec![3]]);
    }
}
