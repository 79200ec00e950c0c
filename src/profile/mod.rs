//! Language profiles: every per-language difference the pipeline knows about.
//!
//! A profile is data (role taxonomy per tier, colors, alias tables, marker
//! lists, fallback rule tables, prompt templates). One generic pipeline runs
//! against any profile; adding a language means adding a JSON document, not
//! code.
//!
//! Profiles are only constructed through [`LanguageProfile::from_spec`] (or the
//! JSON helpers built on it), which refuses structurally incomplete input with a
//! [`ConfigurationError`]. Once built, a profile is immutable and is shared as
//! `Arc<LanguageProfile>` across requests and worker threads.

pub mod builtin;
pub mod rules;
pub mod types;

pub use builtin::{builtin_ids, builtin_profile};
pub use rules::{CompiledRule, Matcher};
pub use types::*;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use thiserror::Error;

/// The catch-all role every tier must expose.
pub const OTHER_ROLE: &str = "other";

/// Canonical field names of the structured reply (after alias resolution).
pub const CANONICAL_FIELDS: &[&str] = &[
    "word",
    "grammatical_role",
    "individual_meaning",
    "words",
    "explanations",
    "overall_structure",
    "key_features",
    "batch_results",
];

/// Field synonyms seen in generation replies, merged under every profile's own table.
const DEFAULT_FIELD_ALIASES: &[(&str, &str)] = &[
    ("token", "word"),
    ("text", "word"),
    ("term", "word"),
    ("word_form", "word"),
    ("role", "grammatical_role"),
    ("grammar_role", "grammatical_role"),
    ("grammatical_function", "grammatical_role"),
    ("grammatical_category", "grammatical_role"),
    ("part_of_speech", "grammatical_role"),
    ("pos", "grammatical_role"),
    ("function", "grammatical_role"),
    ("category", "grammatical_role"),
    ("type", "grammatical_role"),
    ("meaning", "individual_meaning"),
    ("explanation", "individual_meaning"),
    ("definition", "individual_meaning"),
    ("translation", "individual_meaning"),
    ("gloss", "individual_meaning"),
    ("description", "individual_meaning"),
    ("word_analysis", "words"),
    ("words_analysis", "words"),
    ("word_explanations", "words"),
    ("analysis", "words"),
    ("breakdown", "words"),
    ("tokens", "words"),
    ("summary", "overall_structure"),
    ("structure", "overall_structure"),
    ("sentence_structure", "overall_structure"),
    ("features", "key_features"),
    ("grammar_notes", "key_features"),
    ("notes", "key_features"),
    ("results", "batch_results"),
    ("analyses", "batch_results"),
    ("batch", "batch_results"),
];

/// Default explanation template for rule-based results.
pub const DEFAULT_FALLBACK_TEMPLATE: &str = "\"{word}\" ({role_label}): {description}";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Language profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile could not be read: {0}")]
    Io(String),

    #[error("Profile is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Profile '{language}' is incomplete: {reason}")]
    Incomplete { language: String, reason: String },

    #[error("Profile '{language}' has an invalid fallback rule for '{role}': {reason}")]
    InvalidRule { language: String, role: String, reason: String },

    #[error("Invalid pipeline policy: {0}")]
    InvalidPolicy(String),
}

/// Lowercase, trim, and snake-case an identifier (field name or role).
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = false;
    for c in raw.trim().chars() {
        let mapped = if c == ' ' || c == '-' || c == '_' { '_' } else { c };
        if mapped == '_' {
            if !last_underscore && !out.is_empty() {
                out.push('_');
            }
            last_underscore = true;
        } else {
            out.extend(mapped.to_lowercase());
            last_underscore = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Single left-to-right placeholder substitution. Unknown `{names}` and
/// stray braces are copied through; substituted values are never rescanned.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// How a raw role label from a reply was mapped into a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleResolution {
    pub role: String,
    /// False when the label matched nothing the profile knows.
    pub recognized: bool,
}

/// Immutable, validated per-language configuration.
#[derive(Debug)]
pub struct LanguageProfile {
    language_id: String,
    display_name: String,
    tiers: BTreeMap<ComplexityTier, Vec<String>>,
    colors: BTreeMap<String, String>,
    role_descriptions: BTreeMap<String, String>,
    role_parents: BTreeMap<String, String>,
    role_aliases: BTreeMap<String, String>,
    field_aliases: BTreeMap<String, String>,
    markers: BTreeMap<ComplexityTier, Vec<String>>,
    boilerplate: Vec<String>,
    rules: Vec<CompiledRule>,
    prompts: PromptTemplates,
    fallback_template: String,
}

impl LanguageProfile {
    /// Validate and compile a profile specification.
    pub fn from_spec(spec: ProfileSpec) -> Result<Self, ConfigurationError> {
        let language = spec.language_id.trim().to_string();
        let incomplete = |reason: String| ConfigurationError::Incomplete {
            language: if language.is_empty() { "<unnamed>".into() } else { language.clone() },
            reason,
        };

        if language.is_empty() {
            return Err(incomplete("language_id is empty".into()));
        }

        // Taxonomy: all tiers present, non-empty, normalized, each exposing "other".
        let mut all_roles: BTreeSet<String> = BTreeSet::new();
        for tier in ComplexityTier::all() {
            let roles = spec
                .tiers
                .get(tier)
                .ok_or_else(|| incomplete(format!("missing role taxonomy for tier '{tier}'")))?;
            if roles.is_empty() {
                return Err(incomplete(format!("tier '{tier}' has no roles")));
            }
            let mut seen = HashSet::new();
            for role in roles {
                if normalize_key(role) != *role || role.is_empty() {
                    return Err(incomplete(format!(
                        "role '{role}' in tier '{tier}' is not a normalized identifier"
                    )));
                }
                if !seen.insert(role.as_str()) {
                    return Err(incomplete(format!("role '{role}' listed twice in tier '{tier}'")));
                }
                all_roles.insert(role.clone());
            }
            if !roles.iter().any(|r| r == OTHER_ROLE) {
                return Err(incomplete(format!("tier '{tier}' does not expose the '{OTHER_ROLE}' role")));
            }
        }

        for role in &all_roles {
            let color = spec
                .colors
                .get(role)
                .ok_or_else(|| incomplete(format!("no color for role '{role}'")))?;
            if !is_hex_color(color) {
                return Err(incomplete(format!("color '{color}' for role '{role}' is not #RRGGBB")));
            }
            match spec.role_descriptions.get(role) {
                Some(d) if !d.trim().is_empty() => {}
                _ => return Err(incomplete(format!("no description for role '{role}'"))),
            }
        }

        // Parents: known roles only, no cycles.
        for (child, parent) in &spec.role_parents {
            if !all_roles.contains(child) || !all_roles.contains(parent) {
                return Err(incomplete(format!("role parent '{child}' -> '{parent}' names an unknown role")));
            }
        }
        for start in spec.role_parents.keys() {
            let mut current = start;
            let mut steps = 0;
            while let Some(next) = spec.role_parents.get(current) {
                steps += 1;
                if steps > spec.role_parents.len() {
                    return Err(incomplete(format!("role parents form a cycle through '{start}'")));
                }
                current = next;
            }
        }

        let mut role_aliases = BTreeMap::new();
        for (alias, target) in &spec.role_aliases {
            if !all_roles.contains(target) {
                return Err(incomplete(format!("role alias '{alias}' targets unknown role '{target}'")));
            }
            role_aliases.insert(normalize_key(alias), target.clone());
        }

        let mut field_aliases: BTreeMap<String, String> = DEFAULT_FIELD_ALIASES
            .iter()
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .collect();
        for (alias, target) in &spec.field_aliases {
            let alias = normalize_key(alias);
            if !CANONICAL_FIELDS.contains(&target.as_str()) {
                return Err(incomplete(format!("field alias '{alias}' targets unknown field '{target}'")));
            }
            if CANONICAL_FIELDS.contains(&alias.as_str()) {
                return Err(incomplete(format!("field alias '{alias}' shadows a canonical field")));
            }
            field_aliases.insert(alias, target.clone());
        }

        let markers = spec
            .markers
            .iter()
            .map(|(tier, list)| {
                let mut cleaned: Vec<String> = list
                    .iter()
                    .map(|m| m.trim().to_lowercase())
                    .filter(|m| !m.is_empty())
                    .collect();
                cleaned.dedup();
                (*tier, cleaned)
            })
            .collect();

        if spec.fallback_rules.is_empty() {
            return Err(incomplete("no fallback rules".into()));
        }
        let mut rules = Vec::with_capacity(spec.fallback_rules.len());
        for rule in &spec.fallback_rules {
            if !all_roles.contains(&rule.role) {
                return Err(ConfigurationError::InvalidRule {
                    language: language.clone(),
                    role: rule.role.clone(),
                    reason: "role is not in any tier".into(),
                });
            }
            let compiled = CompiledRule::compile(rule).map_err(|reason| ConfigurationError::InvalidRule {
                language: language.clone(),
                role: rule.role.clone(),
                reason,
            })?;
            rules.push(compiled);
        }

        let prompts = spec.prompts;
        if prompts.system.trim().is_empty() {
            return Err(incomplete("system prompt is empty".into()));
        }
        for (name, template, required) in [
            ("single", &prompts.single, &["{sentence}", "{schema}"][..]),
            ("batch", &prompts.batch, &["{sentences}", "{count}", "{schema}"][..]),
        ] {
            for placeholder in required {
                if !template.contains(placeholder) {
                    return Err(incomplete(format!("{name} prompt template lacks {placeholder}")));
                }
            }
        }
        if !spec.fallback_template.contains("{word}") {
            return Err(incomplete("fallback template lacks {word}".into()));
        }

        let display_name = if spec.display_name.trim().is_empty() {
            language.clone()
        } else {
            spec.display_name.trim().to_string()
        };

        Ok(Self {
            language_id: language,
            display_name,
            tiers: spec.tiers,
            colors: spec.colors.into_iter().filter(|(r, _)| all_roles.contains(r)).collect(),
            role_descriptions: spec.role_descriptions,
            role_parents: spec.role_parents,
            role_aliases,
            field_aliases,
            markers,
            boilerplate: spec
                .boilerplate
                .iter()
                .map(|b| b.trim().to_lowercase())
                .filter(|b| !b.is_empty())
                .collect(),
            rules,
            prompts,
            fallback_template: spec.fallback_template,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let spec: ProfileSpec =
            serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidJson(e.to_string()))?;
        Self::from_spec(spec)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigurationError::ProfileNotFound(path.display().to_string())
            } else {
                ConfigurationError::Io(format!("{}: {e}", path.display()))
            }
        })?;
        let profile = Self::from_json_str(&json)?;
        tracing::info!(language = %profile.language_id, path = %path.display(), "Loaded language profile");
        Ok(profile)
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Roles exposed at a tier, in declared order.
    pub fn roles(&self, tier: ComplexityTier) -> &[String] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_role(&self, tier: ComplexityTier, role: &str) -> bool {
        self.roles(tier).iter().any(|r| r == role)
    }

    /// Canonical display color; every known role has one.
    pub fn color(&self, role: &str) -> &str {
        self.colors
            .get(role)
            .or_else(|| self.colors.get(OTHER_ROLE))
            .map(String::as_str)
            .unwrap_or("#808080")
    }

    /// Full role → color table, for rendering collaborators.
    pub fn colors(&self) -> &BTreeMap<String, String> {
        &self.colors
    }

    pub fn description(&self, role: &str) -> &str {
        self.role_descriptions
            .get(role)
            .map(String::as_str)
            .unwrap_or("a word whose function could not be determined")
    }

    pub fn markers(&self, tier: ComplexityTier) -> &[String] {
        self.markers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn boilerplate(&self) -> &[String] {
        &self.boilerplate
    }

    /// Fallback rules in precedence order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn prompts(&self) -> &PromptTemplates {
        &self.prompts
    }

    /// Canonical name for a reply field, or the normalized key if unaliased.
    pub fn canonical_field(&self, raw: &str) -> String {
        let key = normalize_key(raw);
        match self.field_aliases.get(&key) {
            Some(canonical) => canonical.clone(),
            None => key,
        }
    }

    /// Map any role label into the given tier.
    ///
    /// Aliases resolve first; roles the tier does not expose fold through
    /// their parents; anything left over becomes `other`.
    pub fn resolve_role(&self, raw: &str, tier: ComplexityTier) -> RoleResolution {
        let key = normalize_key(raw);
        let mut role = self.role_aliases.get(&key).cloned().unwrap_or(key);
        let recognized = self.colors.contains_key(&role);
        if !recognized {
            return RoleResolution { role: OTHER_ROLE.to_string(), recognized: false };
        }
        while !self.has_role(tier, &role) {
            match self.role_parents.get(&role) {
                Some(parent) => role = parent.clone(),
                None => return RoleResolution { role: OTHER_ROLE.to_string(), recognized: true },
            }
        }
        RoleResolution { role, recognized: true }
    }

    /// Templated explanation built from a role description.
    pub fn render_explanation(&self, word: &str, role: &str) -> String {
        let role_label = role.replace('_', " ");
        render_template(
            &self.fallback_template,
            &[
                ("role_label", &role_label),
                ("description", self.description(role)),
                ("role", role),
                ("word", word),
            ],
        )
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}
