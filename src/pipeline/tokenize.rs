//! Word tokenizer shared by the validator and the fallback analyzer.

use std::sync::LazyLock;

use regex::Regex;

/// A word with optional internal apostrophes or hyphens ("don't", "well-known").
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+(?:['’\-]\w+)*").expect("valid regex"));

/// Word tokens of `text` in reading order. Punctuation is dropped.
pub fn tokenize(text: &str) -> Vec<&str> {
    WORD_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Comparison form of a token: lowercase with surrounding punctuation removed.
pub fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace_and_punctuation() {
        assert_eq!(tokenize("The cat sleeps."), vec!["The", "cat", "sleeps"]);
        assert_eq!(tokenize("¿Dónde está el baño?"), vec!["Dónde", "está", "el", "baño"]);
    }

    #[test]
    fn keeps_contractions_and_hyphens() {
        assert_eq!(tokenize("I don't like well-known songs"), vec!["I", "don't", "like", "well-known", "songs"]);
        assert_eq!(tokenize("l’homme"), vec!["l’homme"]);
    }

    #[test]
    fn punctuation_only_has_no_tokens() {
        assert!(tokenize("?!... —").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn normalizes_for_comparison() {
        assert_eq!(normalize_token("\"Cat,\""), "cat");
        assert_eq!(normalize_token("Größe"), "größe");
    }
}
