//! Raw reply text → structured analysis.
//!
//! Recovery strategies, first success wins:
//! 1. the whole (sanitized) text parses as JSON
//! 2. the interior of a ```json or bare ``` fence parses
//! 3. the widest `{...}` span, then the widest `[...]` span, parses
//!
//! Field names are normalized through the profile's alias table before any
//! shape checks. Nothing here panics or raises; failures are [`ParseFailure`].

use serde_json::{Map, Value};
use tracing::debug;

use super::error::ParseFailure;
use super::output_sanitize::sanitize_llm_output;
use super::types::{RawAnalysis, RawExplanations, RawWord};
use crate::profile::{normalize_key, LanguageProfile};

/// What the caller asked the service for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    Single,
    Batch { count: usize },
}

/// Extraction result matching an [`ExpectedShape`].
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Single(RawAnalysis),
    /// One entry per submitted sentence; an `Err` is an item-level failure.
    Batch(Vec<Result<RawAnalysis, ParseFailure>>),
}

pub struct ResponseExtractor<'a> {
    profile: &'a LanguageProfile,
}

impl<'a> ResponseExtractor<'a> {
    pub fn new(profile: &'a LanguageProfile) -> Self {
        Self { profile }
    }

    pub fn extract(&self, raw: &str, shape: ExpectedShape) -> Result<Extracted, ParseFailure> {
        match shape {
            ExpectedShape::Single => self.extract_single(raw).map(Extracted::Single),
            ExpectedShape::Batch { count } => self.extract_batch(raw, count).map(Extracted::Batch),
        }
    }

    pub fn extract_single(&self, raw: &str) -> Result<RawAnalysis, ParseFailure> {
        let value = self.normalize(locate_payload(&sanitize_llm_output(raw))?);

        match &value {
            Value::Object(obj) if obj.contains_key("words") => parse_record(&value),
            Value::Object(obj) => match obj.get("batch_results") {
                Some(Value::Array(items)) if items.len() == 1 => parse_record(&items[0]),
                _ => Err(ParseFailure::SchemaMismatch("reply has no words collection".into())),
            },
            // A bare list of word records.
            Value::Array(_) => {
                let mut wrapped = Map::new();
                wrapped.insert("words".into(), value.clone());
                parse_record(&Value::Object(wrapped))
            }
            _ => Err(ParseFailure::SchemaMismatch("reply is not an object".into())),
        }
    }

    /// Chunk-level failures (`Err`) cover missing or mis-sized batch results;
    /// malformed records inside a well-formed collection are item-level.
    pub fn extract_batch(
        &self,
        raw: &str,
        count: usize,
    ) -> Result<Vec<Result<RawAnalysis, ParseFailure>>, ParseFailure> {
        let value = self.normalize(locate_payload(&sanitize_llm_output(raw))?);

        let items = match value.get("batch_results") {
            Some(Value::Array(items)) => items,
            _ => return Err(ParseFailure::MissingBatchResults),
        };
        if items.len() != count {
            return Err(ParseFailure::LengthMismatch { expected: count, actual: items.len() });
        }

        Ok(items.iter().map(parse_record).collect())
    }

    /// Recursively rename object keys to their canonical field names.
    ///
    /// Keys already spelled canonically win over aliases; an alias only fills
    /// a slot that is still empty or null.
    fn normalize(&self, value: Value) -> Value {
        match value {
            Value::Object(obj) => {
                let mut out = Map::with_capacity(obj.len());
                let mut aliased = Vec::new();
                for (key, v) in obj {
                    let canonical = self.profile.canonical_field(&key);
                    let v = self.normalize(v);
                    if normalize_key(&key) == canonical {
                        fill_slot(&mut out, canonical, v);
                    } else {
                        aliased.push((canonical, v));
                    }
                }
                for (canonical, v) in aliased {
                    fill_slot(&mut out, canonical, v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.normalize(v)).collect()),
            other => other,
        }
    }
}

fn fill_slot(out: &mut Map<String, Value>, key: String, value: Value) {
    if out.get(&key).map_or(true, Value::is_null) {
        out.insert(key, value);
    }
}

// ═══════════════════════════════════════════
// Payload location
// ═══════════════════════════════════════════

fn locate_payload(text: &str) -> Result<Value, ParseFailure> {
    let trimmed = text.trim();

    // Whole text, fenced block, then the widest object span before the widest
    // list span (both reply shapes are objects).
    let candidates = [
        Some(trimmed),
        fenced_block(trimmed),
        widest_span(trimmed, '{', '}'),
        widest_span(trimmed, '[', ']'),
    ];
    let mut last_error = None;
    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str::<Value>(candidate) {
            Ok(v) if v.is_object() || v.is_array() => return Ok(v),
            Ok(_) => {}
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    let Some(start) = trimmed.find(['{', '[']) else {
        return Err(ParseFailure::NoPayload);
    };
    if is_unbalanced(&trimmed[start..]) {
        debug!(chars = trimmed.len(), "Reply payload looks truncated");
        return Err(ParseFailure::Truncated);
    }
    Err(ParseFailure::InvalidJson(
        last_error.unwrap_or_else(|| "no parseable JSON span".into()),
    ))
}

/// Interior of the first fence (bare or tagged `json`) that holds a JSON
/// object or list. Odd segments of a split on the fence marker are interiors.
fn fenced_block(text: &str) -> Option<&str> {
    text.split("```").skip(1).step_by(2).find_map(|segment| {
        let body = segment.strip_prefix("json").unwrap_or(segment).trim();
        body.starts_with(['{', '[']).then_some(body)
    })
}

/// From the first `open` to the last `close`, if both exist in that order.
fn widest_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close).filter(|end| *end > start)?;
    Some(&text[start..=end])
}

/// True when brackets opened in `text` are never all closed (string-aware).
fn is_unbalanced(text: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth > 0 || in_string
}

// ═══════════════════════════════════════════
// Record parsing
// ═══════════════════════════════════════════

fn parse_record(value: &Value) -> Result<RawAnalysis, ParseFailure> {
    let obj = value
        .as_object()
        .ok_or_else(|| ParseFailure::SchemaMismatch("record is not an object".into()))?;

    let entries = match obj.get("words") {
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(ParseFailure::SchemaMismatch("words is not a list".into())),
        None => return Err(ParseFailure::SchemaMismatch("record has no words".into())),
    };

    let mut words = Vec::with_capacity(entries.len());
    let mut dropped_words = 0;
    for entry in entries {
        match parse_word(entry) {
            Some(word) => words.push(word),
            None => dropped_words += 1,
        }
    }
    if words.is_empty() {
        return Err(ParseFailure::EmptyAnalysis);
    }

    let explanations = match obj.get("explanations") {
        Some(Value::Object(e)) => RawExplanations {
            overall_structure: text_field(e, "overall_structure"),
            key_features: text_field(e, "key_features"),
        },
        Some(Value::String(s)) if !s.trim().is_empty() => RawExplanations {
            overall_structure: Some(s.trim().to_string()),
            key_features: text_field(obj, "key_features"),
        },
        // Explanation fields flattened into the record.
        _ => RawExplanations {
            overall_structure: text_field(obj, "overall_structure"),
            key_features: text_field(obj, "key_features"),
        },
    };

    Ok(RawAnalysis { words, explanations, dropped_words })
}

/// Lenient word entry: objects with a word, or a bare token string.
fn parse_word(entry: &Value) -> Option<RawWord> {
    match entry {
        Value::Object(obj) => {
            let word = text_field(obj, "word")?;
            Some(RawWord {
                word: Some(word),
                grammatical_role: text_field(obj, "grammatical_role"),
                individual_meaning: text_field(obj, "individual_meaning"),
            })
        }
        Value::String(s) if !s.trim().is_empty() => Some(RawWord {
            word: Some(s.trim().to_string()),
            ..RawWord::default()
        }),
        _ => None,
    }
}

/// Non-empty text from a string or number field.
fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match obj.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::test_support;

    const CAT: &str = r#"{
        "words": [
            {"word": "The", "grammatical_role": "article", "individual_meaning": "definite article"},
            {"word": "cat", "grammatical_role": "noun", "individual_meaning": "a small feline"},
            {"word": "sleeps", "grammatical_role": "verb", "individual_meaning": "present tense of sleep"}
        ],
        "explanations": {"overall_structure": "Subject + verb", "key_features": "present simple"}
    }"#;

    fn triples(analysis: &RawAnalysis) -> Vec<(String, String, String)> {
        analysis
            .words
            .iter()
            .map(|w| {
                (
                    w.word.clone().unwrap_or_default(),
                    w.grammatical_role.clone().unwrap_or_default(),
                    w.individual_meaning.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn direct_json_recovers_triples() {
        let profile = test_support::english();
        let analysis = ResponseExtractor::new(&profile).extract_single(CAT).unwrap();
        assert_eq!(
            triples(&analysis),
            vec![
                ("The".into(), "article".into(), "definite article".into()),
                ("cat".into(), "noun".into(), "a small feline".into()),
                ("sleeps".into(), "verb".into(), "present tense of sleep".into()),
            ]
        );
        assert_eq!(analysis.explanations.overall_structure.as_deref(), Some("Subject + verb"));
        assert_eq!(analysis.dropped_words, 0);
    }

    #[test]
    fn fenced_json_with_chatter() {
        let profile = test_support::english();
        let raw = format!("Sure! Here is the analysis:\n```json\n{CAT}\n```\nHope this helps.");
        let analysis = ResponseExtractor::new(&profile).extract_single(&raw).unwrap();
        assert_eq!(analysis.words.len(), 3);
    }

    #[test]
    fn bare_fence_is_recognized() {
        let profile = test_support::english();
        let raw = format!("```\n{CAT}\n```");
        assert!(ResponseExtractor::new(&profile).extract_single(&raw).is_ok());
    }

    #[test]
    fn bracket_span_without_fence() {
        let profile = test_support::english();
        let raw = format!("Analysis follows {CAT} -- end of analysis");
        assert_eq!(ResponseExtractor::new(&profile).extract_single(&raw).unwrap().words.len(), 3);
    }

    #[test]
    fn think_block_is_ignored() {
        let profile = test_support::english();
        let raw = format!("<think>maybe {{ \"words\": 1 }}</think>{CAT}");
        assert_eq!(ResponseExtractor::new(&profile).extract_single(&raw).unwrap().words.len(), 3);
    }

    #[test]
    fn refusal_is_no_payload() {
        let profile = test_support::english();
        assert_eq!(
            ResponseExtractor::new(&profile).extract_single("Sorry, I cannot help"),
            Err(ParseFailure::NoPayload)
        );
    }

    #[test]
    fn cut_off_reply_is_truncated() {
        let profile = test_support::english();
        let raw = r#"```json
{"words": [{"word": "The", "grammatical_role": "article"}, {"word": "ca"#;
        assert_eq!(ResponseExtractor::new(&profile).extract_single(raw), Err(ParseFailure::Truncated));
    }

    #[test]
    fn balanced_garbage_is_invalid_json() {
        let profile = test_support::english();
        let result = ResponseExtractor::new(&profile).extract_single("{words: [the cat]}");
        assert!(matches!(result, Err(ParseFailure::InvalidJson(_))));
    }

    #[test]
    fn aliased_field_names_are_normalized() {
        let profile = test_support::english();
        let raw = r#"{
            "Word Analysis": [
                {"Token": "Dogs", "Part-of-Speech": "NOUN", "Meaning": "plural of dog"},
                {"text": "bark", "role": "verb", "explanation": "makes a loud noise"}
            ],
            "Summary": "Subject + verb"
        }"#;
        let analysis = ResponseExtractor::new(&profile).extract_single(raw).unwrap();
        assert_eq!(
            triples(&analysis),
            vec![
                ("Dogs".into(), "NOUN".into(), "plural of dog".into()),
                ("bark".into(), "verb".into(), "makes a loud noise".into()),
            ]
        );
        assert_eq!(analysis.explanations.overall_structure.as_deref(), Some("Subject + verb"));
    }

    #[test]
    fn canonical_field_beats_alias_in_same_record() {
        let profile = test_support::english();
        let raw = r#"{"words": [{
            "word": "cat",
            "token": "kat",
            "grammatical_role": "noun",
            "individual_meaning": "a small domesticated feline, the subject",
            "explanation": "n."
        }]}"#;
        let analysis = ResponseExtractor::new(&profile).extract_single(raw).unwrap();
        assert_eq!(analysis.words[0].word.as_deref(), Some("cat"));
        assert_eq!(
            analysis.words[0].individual_meaning.as_deref(),
            Some("a small domesticated feline, the subject")
        );
    }

    #[test]
    fn alias_fills_null_canonical_field() {
        let profile = test_support::english();
        let raw = r#"{"words": [{"word": "cat", "individual_meaning": null, "explanation": "a small feline"}]}"#;
        let analysis = ResponseExtractor::new(&profile).extract_single(raw).unwrap();
        assert_eq!(analysis.words[0].individual_meaning.as_deref(), Some("a small feline"));
    }

    #[test]
    fn bracketed_prose_before_object() {
        let profile = test_support::english();
        let raw = format!("Analysis [see note 1]: {CAT} [end]");
        assert_eq!(ResponseExtractor::new(&profile).extract_single(&raw).unwrap().words.len(), 3);
    }

    #[test]
    fn bare_word_list_inside_prose() {
        let profile = test_support::english();
        let raw = r#"Words: [{"word": "cat", "grammatical_role": "noun"}, {"word": "sleeps", "grammatical_role": "verb"}] done"#;
        assert_eq!(ResponseExtractor::new(&profile).extract_single(raw).unwrap().words.len(), 2);
    }

    #[test]
    fn later_json_fence_found_after_text_fence() {
        let profile = test_support::english();
        let raw = format!("```text\nnot json\n```\nThen:\n```json\n{CAT}\n```");
        assert_eq!(ResponseExtractor::new(&profile).extract_single(&raw).unwrap().words.len(), 3);
    }

    #[test]
    fn profile_specific_aliases_apply() {
        let profile = test_support::german();
        let raw = r#"{"words": [{"Wort": "Hund", "Wortart": "Substantiv", "Bedeutung": "dog"}]}"#;
        let analysis = ResponseExtractor::new(&profile).extract_single(raw).unwrap();
        assert_eq!(analysis.words[0].grammatical_role.as_deref(), Some("Substantiv"));
        assert_eq!(analysis.words[0].individual_meaning.as_deref(), Some("dog"));
    }

    #[test]
    fn unreadable_word_entries_are_dropped_and_counted() {
        let profile = test_support::english();
        let raw = r#"{"words": [{"word": "Hi"}, 42, {"grammatical_role": "noun"}, "there"]}"#;
        let analysis = ResponseExtractor::new(&profile).extract_single(raw).unwrap();
        assert_eq!(analysis.words.len(), 2);
        assert_eq!(analysis.dropped_words, 2);
        assert_eq!(analysis.words[1].word.as_deref(), Some("there"));
    }

    #[test]
    fn empty_words_is_empty_analysis() {
        let profile = test_support::english();
        assert_eq!(
            ResponseExtractor::new(&profile).extract_single(r#"{"words": []}"#),
            Err(ParseFailure::EmptyAnalysis)
        );
    }

    #[test]
    fn single_reply_wrapped_in_batch_results_is_unwrapped() {
        let profile = test_support::english();
        let raw = format!("{{\"batch_results\": [{CAT}]}}");
        assert_eq!(ResponseExtractor::new(&profile).extract_single(&raw).unwrap().words.len(), 3);
    }

    #[test]
    fn batch_reply_with_one_malformed_item() {
        let profile = test_support::english();
        let raw = format!(r#"{{"results": [{CAT}, {{"words": "oops"}}, {CAT}]}}"#);
        let items = ResponseExtractor::new(&profile).extract_batch(&raw, 3).unwrap();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ParseFailure::SchemaMismatch(_))));
        assert!(items[2].is_ok());
    }

    #[test]
    fn batch_length_mismatch_is_chunk_level() {
        let profile = test_support::english();
        let raw = format!(r#"{{"batch_results": [{CAT}, {CAT}]}}"#);
        let err = ResponseExtractor::new(&profile).extract_batch(&raw, 3).unwrap_err();
        assert_eq!(err, ParseFailure::LengthMismatch { expected: 3, actual: 2 });
        assert!(err.is_chunk_level());
    }

    #[test]
    fn batch_without_results_key_is_chunk_level() {
        let profile = test_support::english();
        let err = ResponseExtractor::new(&profile).extract_batch(CAT, 1).unwrap_err();
        assert_eq!(err, ParseFailure::MissingBatchResults);
    }

    #[test]
    fn extract_dispatches_on_shape() {
        let profile = test_support::english();
        let extractor = ResponseExtractor::new(&profile);
        assert!(matches!(extractor.extract(CAT, ExpectedShape::Single), Ok(Extracted::Single(_))));
        let batch = format!(r#"{{"batch_results": [{CAT}]}}"#);
        assert!(matches!(
            extractor.extract(&batch, ExpectedShape::Batch { count: 1 }),
            Ok(Extracted::Batch(items)) if items.len() == 1
        ));
    }
}
