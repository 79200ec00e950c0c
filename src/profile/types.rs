use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::DEFAULT_FALLBACK_TEMPLATE;

/// Difficulty selector controlling which grammatical roles are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Beginner,
    Intermediate,
    Advanced,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    pub fn all() -> &'static [ComplexityTier] {
        &[Self::Beginner, Self::Intermediate, Self::Advanced]
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ComplexityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            other => Err(format!("unknown complexity tier '{other}'")),
        }
    }
}

/// Serialized form of a language profile, as stored in JSON.
///
/// Only [`super::LanguageProfile::from_spec`] turns this into something the
/// pipeline can use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub language_id: String,
    #[serde(default)]
    pub display_name: String,
    /// Roles exposed per tier, in display order.
    pub tiers: BTreeMap<ComplexityTier, Vec<String>>,
    /// Role → `#RRGGBB`.
    pub colors: BTreeMap<String, String>,
    /// Role → short description used in prompts and rule-based explanations.
    pub role_descriptions: BTreeMap<String, String>,
    /// Fine role → coarser role, used to fold roles into simpler tiers.
    #[serde(default)]
    pub role_parents: BTreeMap<String, String>,
    /// Role synonym → canonical role.
    #[serde(default)]
    pub role_aliases: BTreeMap<String, String>,
    /// Reply field synonym → canonical field (merged over built-in defaults).
    #[serde(default)]
    pub field_aliases: BTreeMap<String, String>,
    /// Terms whose presence in explanations shows tier-appropriate grammar coverage.
    #[serde(default)]
    pub markers: BTreeMap<ComplexityTier, Vec<String>>,
    /// Explanation phrases too generic to count as an explanation.
    #[serde(default)]
    pub boilerplate: Vec<String>,
    /// Rule-based classifier, highest precedence first.
    pub fallback_rules: Vec<RuleSpec>,
    #[serde(default)]
    pub prompts: PromptTemplates,
    #[serde(default = "default_fallback_template")]
    pub fallback_template: String,
}

fn default_fallback_template() -> String {
    DEFAULT_FALLBACK_TEMPLATE.to_string()
}

/// One precedence-ranked fallback rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub role: String,
    #[serde(flatten)]
    pub matcher: MatcherSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherSpec {
    /// Closed-class list (case-insensitive).
    Words { words: Vec<String> },
    Suffixes {
        suffixes: Vec<String>,
        #[serde(default = "default_min_stem")]
        min_stem: usize,
    },
    Prefixes {
        prefixes: Vec<String>,
        #[serde(default = "default_min_stem")]
        min_stem: usize,
    },
    /// Regular expression matched against the lowercased token.
    Pattern { pattern: String },
    /// Capitalized token that does not open the sentence.
    Capitalized,
    Numeric,
}

fn default_min_stem() -> usize {
    3
}

/// Prompt template strings with `{placeholder}` slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub system: String,
    pub single: String,
    pub batch: String,
}

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a precise {language} grammar teacher. You analyze sentences word by word \
for language learners. Output valid JSON only, with no commentary before or after it.";

const DEFAULT_SINGLE_PROMPT: &str = "\
Analyze the grammar of this {language} sentence for a {tier} learner who is studying \
the word \"{target_word}\".

SENTENCE: {sentence}

RULES:
1. List every word of the sentence in reading order. Do not skip or merge words.
2. Give each word exactly one grammatical_role from the list below.
3. individual_meaning explains what the word means and why it takes this form here.
4. Mention grammatical features (agreement, case, tense) where they apply.

ALLOWED ROLES:
{roles}

OUTPUT FORMAT:
{schema}";

const DEFAULT_BATCH_PROMPT: &str = "\
Analyze the grammar of each of the following {count} {language} sentences for a {tier} \
learner who is studying the word \"{target_word}\".

SENTENCES:
{sentences}

RULES:
1. Return exactly {count} analyses in batch_results, in the same order as the sentences.
2. For each sentence, list every word in reading order with exactly one grammatical_role.
3. individual_meaning explains what the word means and why it takes this form here.
4. Mention grammatical features (agreement, case, tense) where they apply.

ALLOWED ROLES:
{roles}

OUTPUT FORMAT:
{schema}";

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            single: DEFAULT_SINGLE_PROMPT.to_string(),
            batch: DEFAULT_BATCH_PROMPT.to_string(),
        }
    }
}
