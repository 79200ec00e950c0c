//! Deterministic rule-based analysis used whenever generation fails.
//!
//! Tokens are classified against the profile's precedence-ordered rule list;
//! the first matching rule wins and its role is folded into the request tier.
//! Unmatched tokens become `other`. This path is total: it never fails.

use std::collections::BTreeMap;

use super::tokenize::tokenize;
use super::types::{AnalysisRequest, AnalysisResult, Provenance, WordExplanation};
use crate::profile::{ComplexityTier, LanguageProfile, OTHER_ROLE};

pub struct FallbackAnalyzer<'a> {
    profile: &'a LanguageProfile,
    confidence: f32,
}

impl<'a> FallbackAnalyzer<'a> {
    pub fn new(profile: &'a LanguageProfile, confidence: f32) -> Self {
        Self { profile, confidence }
    }

    pub fn analyze_request(&self, request: &AnalysisRequest) -> AnalysisResult {
        self.analyze(request.sentence(), request.target_word(), request.tier())
    }

    pub fn analyze(&self, sentence: &str, target_word: &str, tier: ComplexityTier) -> AnalysisResult {
        let tokens = tokenize(sentence);
        let words: Vec<WordExplanation> = if tokens.is_empty() {
            let trimmed = sentence.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![self.explain(trimmed, OTHER_ROLE.to_string())]
            }
        } else {
            tokens
                .iter()
                .enumerate()
                .map(|(position, token)| self.explain(token, self.classify(token, position, tier)))
                .collect()
        };

        AnalysisResult {
            sentence: sentence.to_string(),
            target_word: target_word.to_string(),
            language: self.profile.language_id().to_string(),
            tier,
            overall_structure: summarize(&words),
            key_features: "Roles assigned from word lists and affix patterns; \
                           no generated analysis was available."
                .to_string(),
            words,
            confidence: self.confidence,
            provenance: Provenance::Fallback,
            issues: Vec::new(),
        }
    }

    /// Role for one token in the given tier.
    pub fn classify(&self, token: &str, position: usize, tier: ComplexityTier) -> String {
        self.profile
            .rules()
            .iter()
            .find(|rule| rule.matches(token, position))
            .map(|rule| self.profile.resolve_role(rule.role(), tier).role)
            .unwrap_or_else(|| OTHER_ROLE.to_string())
    }

    fn explain(&self, word: &str, role: String) -> WordExplanation {
        WordExplanation {
            word: word.to_string(),
            color: self.profile.color(&role).to_string(),
            explanation: self.profile.render_explanation(word, &role),
            role,
        }
    }
}

fn summarize(words: &[WordExplanation]) -> String {
    if words.is_empty() {
        return "No words to analyze.".to_string();
    }
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for w in words {
        *counts.entry(w.role.as_str()).or_default() += 1;
    }
    let parts = counts
        .iter()
        .map(|(role, n)| format!("{n} {}", role.replace('_', " ")))
        .collect::<Vec<_>>()
        .join(", ");
    let noun = if words.len() == 1 { "word" } else { "words" };
    format!("Rule-based analysis of {} {noun}: {parts}.", words.len())
}
