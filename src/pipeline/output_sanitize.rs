//! Pre-extraction cleanup of raw generation output.
//!
//! Strips model artifacts (reasoning blocks, unused tokens, byte-order marks)
//! so the extractor only sees the answer text.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think(?:ing)?>.*?</think(?:ing)?>").expect("valid regex"));

static THINK_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<think(?:ing)?>").expect("valid regex"));

static UNUSED_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

/// Strip model-specific artifacts from raw generation output.
///
/// Handles:
/// 1. `<think>...</think>` reasoning blocks (also `<thinking>`)
/// 2. Gemma-style `<unusedN>thought\n` prefixes and stray `<unusedN>` tokens
/// 3. Byte-order marks and surrounding whitespace
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = raw.replace('\u{feff}', "");

    text = THINK_BLOCK_RE.replace_all(&text, "").into_owned();

    // An opened but never closed reasoning block swallows the rest of the reply,
    // unless structured output follows it.
    if let Some(idx) = THINK_OPEN_RE.find(&text).map(|m| m.start()) {
        let tail = &text[idx..];
        text = match tail.find(['{', '[']) {
            Some(start) => format!("{}{}", &text[..idx], &tail[start..]),
            None => text[..idx].to_string(),
        };
    }

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + 8..].to_string();
        }
    }
    text = UNUSED_TOKEN_RE.replace_all(&text, "").into_owned();

    text.trim().to_string()
}
