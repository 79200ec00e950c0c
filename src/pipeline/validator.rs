//! Confidence scoring and non-fatal checks for generated analyses.
//!
//! Confidence is the product of independent factors in (0, 1]. Validation
//! never rejects a result; everything it finds becomes metadata.

use std::collections::HashSet;

use tracing::debug;

use super::tokenize::{normalize_token, tokenize};
use super::types::{AnalysisRequest, AnalysisResult, Provenance, RawAnalysis, ValidationIssue, WordExplanation};
use crate::config::PipelineConfig;
use crate::profile::{LanguageProfile, OTHER_ROLE};

/// Tunable constants for the confidence heuristics.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPolicy {
    /// Token-count difference still considered a partial match.
    pub alignment_tolerance: usize,
    pub alignment_partial_factor: f32,
    pub alignment_miss_factor: f32,
    /// Fraction of `other` roles above which diversity is penalized.
    pub other_role_threshold: f32,
    pub other_role_factor: f32,
    /// Marker factor when none of the expected markers appear.
    pub marker_floor: f32,
    pub min_explanation_chars: usize,
    /// Maximum penalty when every explanation is short or boilerplate.
    pub explanation_penalty: f32,
    pub low_confidence_threshold: f32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            alignment_tolerance: 2,
            alignment_partial_factor: 0.9,
            alignment_miss_factor: 0.6,
            other_role_threshold: 0.4,
            other_role_factor: 0.7,
            marker_floor: 0.85,
            min_explanation_chars: 10,
            explanation_penalty: 0.4,
            low_confidence_threshold: 0.5,
        }
    }
}

impl ValidationPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            low_confidence_threshold: config.low_confidence_threshold,
            ..Self::default()
        }
    }
}

pub struct Validator<'a> {
    profile: &'a LanguageProfile,
    policy: &'a ValidationPolicy,
}

impl<'a> Validator<'a> {
    pub fn new(profile: &'a LanguageProfile, policy: &'a ValidationPolicy) -> Self {
        Self { profile, policy }
    }

    /// Build a generated result from a structured analysis. Issues found along
    /// the way are attached to the result.
    pub fn validate(&self, raw: RawAnalysis, request: &AnalysisRequest) -> AnalysisResult {
        let tier = request.tier();
        let mut issues = Vec::new();

        if raw.dropped_words > 0 {
            issues.push(ValidationIssue::DroppedWords { count: raw.dropped_words });
        }

        // Canonicalize roles and fill explanations.
        let mut words = Vec::with_capacity(raw.words.len());
        let mut bad_explanations = 0usize;
        for raw_word in raw.words {
            let Some(word) = raw_word.word.map(|w| w.trim().to_string()).filter(|w| !w.is_empty()) else {
                continue;
            };

            let raw_role = raw_word.grammatical_role.unwrap_or_default();
            let resolution = self.profile.resolve_role(&raw_role, tier);
            if !resolution.recognized {
                issues.push(ValidationIssue::UnknownRole { word: word.clone(), role: raw_role });
            }

            let explanation = match raw_word.individual_meaning.filter(|m| !m.trim().is_empty()) {
                Some(text) => {
                    if let Some(issue) = self.explanation_issue(&word, &text) {
                        bad_explanations += 1;
                        issues.push(issue);
                    }
                    text.trim().to_string()
                }
                None => {
                    bad_explanations += 1;
                    issues.push(ValidationIssue::MissingExplanation { word: word.clone() });
                    self.profile.render_explanation(&word, &resolution.role)
                }
            };

            words.push(WordExplanation {
                color: self.profile.color(&resolution.role).to_string(),
                role: resolution.role,
                word,
                explanation,
            });
        }

        let sentence_tokens: Vec<String> = tokenize(request.sentence())
            .into_iter()
            .map(normalize_token)
            .collect();

        if restore_reading_order(&mut words, &sentence_tokens) {
            issues.push(ValidationIssue::Reordered);
        }

        if !target_present(request.target_word(), &words) {
            issues.push(ValidationIssue::TargetWordMissing {
                target: request.target_word().trim().to_string(),
            });
        }

        let explanations = raw.explanations;
        let overall_structure = explanations.overall_structure.unwrap_or_default();
        let key_features = explanations.key_features.unwrap_or_default();

        let confidence = if words.is_empty() {
            0.0
        } else {
            let alignment = self.alignment_factor(sentence_tokens.len(), words.len(), &mut issues);
            let diversity = self.diversity_factor(&words, &mut issues);
            let markers = self.marker_factor(request, &words, &overall_structure, &key_features, &mut issues);
            let quality =
                1.0 - self.policy.explanation_penalty * (bad_explanations as f32 / words.len() as f32);
            debug!(alignment, diversity, markers, quality, "Confidence factors");
            (alignment * diversity * markers * quality).clamp(0.0, 1.0)
        };

        if confidence < self.policy.low_confidence_threshold {
            issues.push(ValidationIssue::LowConfidence { confidence });
        }

        AnalysisResult {
            sentence: request.sentence().to_string(),
            target_word: request.target_word().to_string(),
            language: self.profile.language_id().to_string(),
            tier,
            words,
            overall_structure,
            key_features,
            confidence,
            provenance: Provenance::Generated,
            issues,
        }
    }

    fn alignment_factor(&self, expected: usize, actual: usize, issues: &mut Vec<ValidationIssue>) -> f32 {
        let diff = expected.abs_diff(actual);
        if diff == 0 {
            return 1.0;
        }
        issues.push(ValidationIssue::TokenCountMismatch { expected, actual });
        if diff <= self.policy.alignment_tolerance {
            self.policy.alignment_partial_factor
        } else {
            self.policy.alignment_miss_factor
        }
    }

    fn diversity_factor(&self, words: &[WordExplanation], issues: &mut Vec<ValidationIssue>) -> f32 {
        let other = words.iter().filter(|w| w.role == OTHER_ROLE).count();
        let fraction = other as f32 / words.len() as f32;
        if fraction > self.policy.other_role_threshold {
            issues.push(ValidationIssue::ExcessiveOtherRole { fraction });
            self.policy.other_role_factor
        } else {
            1.0
        }
    }

    /// Monotone in the number of distinct expected markers mentioned.
    fn marker_factor(
        &self,
        request: &AnalysisRequest,
        words: &[WordExplanation],
        overall_structure: &str,
        key_features: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> f32 {
        let expected = self.profile.markers(request.tier());
        if expected.is_empty() {
            return 1.0;
        }
        let mut corpus = format!("{overall_structure}\n{key_features}");
        for w in words {
            corpus.push('\n');
            corpus.push_str(&w.explanation);
        }
        let corpus = corpus.to_lowercase();

        let found = expected.iter().filter(|m| corpus.contains(m.as_str())).count();
        if found == 0 {
            issues.push(ValidationIssue::MissingMarkers { expected: expected.len(), found });
        }
        let floor = self.policy.marker_floor;
        floor + (1.0 - floor) * (found as f32 / expected.len() as f32)
    }

    fn explanation_issue(&self, word: &str, text: &str) -> Option<ValidationIssue> {
        let normalized = text
            .trim()
            .trim_end_matches(['.', '!'])
            .trim()
            .to_lowercase();
        if self.profile.boilerplate().iter().any(|b| *b == normalized) {
            return Some(ValidationIssue::BoilerplateExplanation { word: word.to_string() });
        }
        if normalized.chars().count() < self.policy.min_explanation_chars {
            return Some(ValidationIssue::ShortExplanation { word: word.to_string() });
        }
        None
    }
}

/// Sort words into sentence order. Words that do not match a sentence token
/// stay behind their predecessor. Returns true if anything moved.
fn restore_reading_order(words: &mut Vec<WordExplanation>, sentence_tokens: &[String]) -> bool {
    let mut used = vec![false; sentence_tokens.len()];
    let mut keys = Vec::with_capacity(words.len());
    let mut last = 0usize;
    for word in words.iter() {
        let first_piece = tokenize(&word.word).first().map(|t| normalize_token(t)).unwrap_or_default();
        let position = sentence_tokens
            .iter()
            .enumerate()
            .position(|(i, t)| !used[i] && *t == first_piece);
        if let Some(i) = position {
            used[i] = true;
            last = i;
        }
        keys.push(last);
    }

    if keys.windows(2).all(|w| w[0] <= w[1]) {
        return false;
    }

    let mut indexed: Vec<(usize, WordExplanation)> = keys.into_iter().zip(words.drain(..)).collect();
    indexed.sort_by_key(|(key, _)| *key);
    words.extend(indexed.into_iter().map(|(_, w)| w));
    true
}

fn target_present(target: &str, words: &[WordExplanation]) -> bool {
    let wanted: Vec<String> = tokenize(target).into_iter().map(normalize_token).collect();
    if wanted.is_empty() {
        return true;
    }
    let analyzed: HashSet<String> = words
        .iter()
        .flat_map(|w| tokenize(&w.word).into_iter().map(normalize_token).collect::<Vec<_>>())
        .collect();
    wanted.iter().all(|t| analyzed.contains(t))
}
