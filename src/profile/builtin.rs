//! Profiles shipped with the crate. The tables live in `data/*.json` so they
//! stay data; this module only maps ids to documents.

use super::{ConfigurationError, LanguageProfile};

const BUILTIN_PROFILES: &[(&str, &str)] = &[
    ("en", include_str!("data/en.json")),
    ("es", include_str!("data/es.json")),
    ("de", include_str!("data/de.json")),
];

/// Ids of all built-in profiles.
pub fn builtin_ids() -> Vec<&'static str> {
    BUILTIN_PROFILES.iter().map(|(id, _)| *id).collect()
}

/// Load a built-in profile by language id.
pub fn builtin_profile(language_id: &str) -> Result<LanguageProfile, ConfigurationError> {
    let id = language_id.trim().to_lowercase();
    let (_, json) = BUILTIN_PROFILES
        .iter()
        .find(|(candidate, _)| *candidate == id)
        .ok_or_else(|| ConfigurationError::ProfileNotFound(language_id.to_string()))?;
    LanguageProfile::from_json_str(json)
}
