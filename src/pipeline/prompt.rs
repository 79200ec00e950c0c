//! Prompt rendering for single and batch analysis.
//!
//! Rendering is pure: identical requests and profile always yield
//! byte-identical prompts, so `prompt_digest` is usable as a cache key.

use sha2::{Digest, Sha256};

use super::types::{AnalysisRequest, PromptMode};
use crate::profile::{render_template, LanguageProfile};

/// System prompt plus user prompt for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub prompt: String,
    pub mode: PromptMode,
    /// Number of sentences the prompt asks about.
    pub sentence_count: usize,
}

impl RenderedPrompt {
    pub fn digest(&self) -> String {
        prompt_digest(&self.system, &self.prompt)
    }
}

/// Stable SHA-256 hex digest of a rendered prompt.
pub fn prompt_digest(system: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

pub struct PromptBuilder<'a> {
    profile: &'a LanguageProfile,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(profile: &'a LanguageProfile) -> Self {
        Self { profile }
    }

    /// Render a prompt for `requests` in the given mode.
    ///
    /// Batch requests must share target word and tier; the first request
    /// supplies both. Single mode uses the first request only.
    pub fn build(&self, requests: &[&AnalysisRequest], mode: PromptMode) -> RenderedPrompt {
        match (mode, requests) {
            (PromptMode::Single, [first, ..]) => self.build_single(first),
            _ => self.build_batch(requests),
        }
    }

    pub fn build_single(&self, request: &AnalysisRequest) -> RenderedPrompt {
        let roles = self.role_list(request);
        let schema = single_schema();
        let prompt = render_template(
            &self.profile.prompts().single,
            &[
                ("language", self.profile.display_name()),
                ("tier", request.tier().as_str()),
                ("target_word", request.target_word().trim()),
                ("sentence", request.sentence().trim()),
                ("roles", &roles),
                ("schema", &schema),
            ],
        );
        RenderedPrompt {
            system: self.system(request),
            prompt,
            mode: PromptMode::Single,
            sentence_count: 1,
        }
    }

    pub fn build_batch(&self, requests: &[&AnalysisRequest]) -> RenderedPrompt {
        let Some(first) = requests.first() else {
            return RenderedPrompt {
                system: String::new(),
                prompt: String::new(),
                mode: PromptMode::Batch,
                sentence_count: 0,
            };
        };
        let count = requests.len().to_string();
        let sentences = requests
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}", i + 1, r.sentence().trim()))
            .collect::<Vec<_>>()
            .join("\n");
        let roles = self.role_list(first);
        let schema = batch_schema(requests.len());
        let prompt = render_template(
            &self.profile.prompts().batch,
            &[
                ("language", self.profile.display_name()),
                ("tier", first.tier().as_str()),
                ("target_word", first.target_word().trim()),
                ("sentences", &sentences),
                ("count", &count),
                ("roles", &roles),
                ("schema", &schema),
            ],
        );
        RenderedPrompt {
            system: self.system(first),
            prompt,
            mode: PromptMode::Batch,
            sentence_count: requests.len(),
        }
    }

    fn system(&self, request: &AnalysisRequest) -> String {
        render_template(
            &self.profile.prompts().system,
            &[
                ("language", self.profile.display_name()),
                ("tier", request.tier().as_str()),
            ],
        )
    }

    fn role_list(&self, request: &AnalysisRequest) -> String {
        self.profile
            .roles(request.tier())
            .iter()
            .map(|role| format!("- {role}: {}", self.profile.description(role)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

const WORD_SCHEMA: &str = r#"{
  "words": [
    {"word": "<token exactly as written>", "grammatical_role": "<one allowed role>", "individual_meaning": "<explanation>"}
  ],
  "explanations": {"overall_structure": "<sentence structure>", "key_features": "<notable grammar>"}
}"#;

fn single_schema() -> String {
    WORD_SCHEMA.to_string()
}

fn batch_schema(count: usize) -> String {
    let entries = (1..=count)
        .map(|i| format!("    <analysis of sentence {i}>"))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "{{\n  \"batch_results\": [\n{entries}\n  ]\n}}\n\n\
         batch_results must contain exactly {count} entries, in sentence order. \
         Each entry has this form:\n{WORD_SCHEMA}"
    )
}
