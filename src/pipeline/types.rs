//! Core values flowing through the pipeline:
//! request → (reply → raw analysis) → result.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::profile::{ComplexityTier, LanguageProfile};

// ═══════════════════════════════════════════
// Request
// ═══════════════════════════════════════════

/// One sentence to analyze. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    sentence: String,
    target_word: String,
    tier: ComplexityTier,
    profile: Arc<LanguageProfile>,
}

impl AnalysisRequest {
    pub fn new(
        profile: &Arc<LanguageProfile>,
        sentence: impl Into<String>,
        target_word: impl Into<String>,
        tier: ComplexityTier,
    ) -> Self {
        Self {
            sentence: sentence.into(),
            target_word: target_word.into(),
            tier,
            profile: Arc::clone(profile),
        }
    }

    pub fn sentence(&self) -> &str {
        &self.sentence
    }

    pub fn target_word(&self) -> &str {
        &self.target_word
    }

    pub fn tier(&self) -> ComplexityTier {
        self.tier
    }

    pub fn profile(&self) -> &LanguageProfile {
        &self.profile
    }

    /// Requests with equal keys can share one chunk prompt.
    pub(crate) fn chunk_key(&self) -> (String, String, ComplexityTier) {
        (
            self.profile.language_id().to_string(),
            self.target_word.trim().to_lowercase(),
            self.tier,
        )
    }
}

// ═══════════════════════════════════════════
// Result
// ═══════════════════════════════════════════

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Generated,
    Fallback,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One analyzed token. `role` is always in the request tier's taxonomy and
/// `explanation` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordExplanation {
    pub word: String,
    pub role: String,
    pub color: String,
    pub explanation: String,
}

/// Final, immutable analysis of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentence: String,
    pub target_word: String,
    pub language: String,
    pub tier: ComplexityTier,
    /// Reading order of the sentence.
    pub words: Vec<WordExplanation>,
    pub overall_structure: String,
    pub key_features: String,
    /// In [0, 1].
    pub confidence: f32,
    pub provenance: Provenance,
    /// Non-fatal findings from validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,
}

impl AnalysisResult {
    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }
}

/// Non-fatal validation finding attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    TokenCountMismatch { expected: usize, actual: usize },
    ExcessiveOtherRole { fraction: f32 },
    MissingMarkers { expected: usize, found: usize },
    ShortExplanation { word: String },
    BoilerplateExplanation { word: String },
    MissingExplanation { word: String },
    UnknownRole { word: String, role: String },
    DroppedWords { count: usize },
    Reordered,
    TargetWordMissing { target: String },
    LowConfidence { confidence: f32 },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenCountMismatch { expected, actual } => {
                write!(f, "analyzed {actual} words but the sentence has {expected}")
            }
            Self::ExcessiveOtherRole { fraction } => {
                write!(f, "{:.0}% of words have no specific role", fraction * 100.0)
            }
            Self::MissingMarkers { expected, found } => {
                write!(f, "only {found} of {expected} expected grammar features mentioned")
            }
            Self::ShortExplanation { word } => write!(f, "explanation for '{word}' is too short"),
            Self::BoilerplateExplanation { word } => write!(f, "explanation for '{word}' is boilerplate"),
            Self::MissingExplanation { word } => write!(f, "no explanation for '{word}', using template"),
            Self::UnknownRole { word, role } => write!(f, "unknown role '{role}' for '{word}'"),
            Self::DroppedWords { count } => write!(f, "{count} unreadable word entries were dropped"),
            Self::Reordered => write!(f, "words were reordered to match the sentence"),
            Self::TargetWordMissing { target } => write!(f, "target word '{target}' was not analyzed"),
            Self::LowConfidence { confidence } => write!(f, "low confidence ({confidence:.2})"),
        }
    }
}

// ═══════════════════════════════════════════
// Structured reply (after alias normalization)
// ═══════════════════════════════════════════

/// One word record as the service returned it. Every field is optional; the
/// validator decides what to do with gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWord {
    #[serde(default)]
    pub word: Option<String>,
    #[serde(default)]
    pub grammatical_role: Option<String>,
    #[serde(default)]
    pub individual_meaning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExplanations {
    #[serde(default)]
    pub overall_structure: Option<String>,
    #[serde(default)]
    pub key_features: Option<String>,
}

/// Structured analysis recovered from one reply record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnalysis {
    pub words: Vec<RawWord>,
    #[serde(default)]
    pub explanations: RawExplanations,
    /// Word entries skipped because they could not be read.
    #[serde(skip)]
    pub dropped_words: usize,
}

/// Which prompt shape to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Single,
    Batch,
}
