//! Compiled fallback rules: the precedence-ordered tables the rule-based
//! analyzer walks for each token.

use std::collections::HashSet;

use regex::Regex;

use super::types::{MatcherSpec, RuleSpec};

#[derive(Debug)]
pub enum Matcher {
    Words(HashSet<String>),
    Suffixes { suffixes: Vec<String>, min_stem: usize },
    Prefixes { prefixes: Vec<String>, min_stem: usize },
    Pattern(Regex),
    Capitalized,
    Numeric,
}

#[derive(Debug)]
pub struct CompiledRule {
    role: String,
    matcher: Matcher,
}

impl CompiledRule {
    pub(crate) fn compile(spec: &RuleSpec) -> Result<Self, String> {
        let matcher = match &spec.matcher {
            MatcherSpec::Words { words } => {
                let set: HashSet<String> = words
                    .iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect();
                if set.is_empty() {
                    return Err("word list is empty".into());
                }
                Matcher::Words(set)
            }
            MatcherSpec::Suffixes { suffixes, min_stem } => Matcher::Suffixes {
                suffixes: clean_affixes(suffixes)?,
                min_stem: *min_stem,
            },
            MatcherSpec::Prefixes { prefixes, min_stem } => Matcher::Prefixes {
                prefixes: clean_affixes(prefixes)?,
                min_stem: *min_stem,
            },
            MatcherSpec::Pattern { pattern } => {
                Matcher::Pattern(Regex::new(pattern).map_err(|e| format!("bad pattern: {e}"))?)
            }
            MatcherSpec::Capitalized => Matcher::Capitalized,
            MatcherSpec::Numeric => Matcher::Numeric,
        };
        Ok(Self { role: spec.role.clone(), matcher })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// `position` is the token's index in the sentence (0 = first word).
    pub fn matches(&self, token: &str, position: usize) -> bool {
        let lower = token.to_lowercase();
        match &self.matcher {
            Matcher::Words(set) => set.contains(&lower),
            Matcher::Suffixes { suffixes, min_stem } => suffixes.iter().any(|s| {
                lower.ends_with(s.as_str()) && lower.chars().count() >= s.chars().count() + min_stem
            }),
            Matcher::Prefixes { prefixes, min_stem } => prefixes.iter().any(|p| {
                lower.starts_with(p.as_str()) && lower.chars().count() >= p.chars().count() + min_stem
            }),
            Matcher::Pattern(re) => re.is_match(&lower),
            Matcher::Capitalized => {
                position > 0 && token.chars().next().is_some_and(char::is_uppercase)
            }
            Matcher::Numeric => {
                token.chars().any(|c| c.is_ascii_digit())
                    && token.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '%'))
            }
        }
    }
}

fn clean_affixes(raw: &[String]) -> Result<Vec<String>, String> {
    let mut cleaned: Vec<String> = raw
        .iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Err("affix list is empty".into());
    }
    // Longest affix first so "ation" is tried before "on".
    cleaned.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
    Ok(cleaned)
}
