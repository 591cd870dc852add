//! Placeholder substitution for descriptors, invocations, and configs.
//!
//! Templates are arbitrary JSON documents containing `[[NAME]]` tokens.
//! Substitution serializes the document, replaces every recognized token
//! with its bound value in a single pass, and parses the result back. A
//! replacement value is never scanned for further tokens.
//!
//! Built-in names carry the [`BUILTIN_PREFIX`]; user-defined keys from the
//! dataset configuration may not use it.
//!
//! # Example
//!
//! ```ignore
//! use studyforge::template::{substitute, TemplateBindings};
//!
//! let bindings = TemplateBindings::for_pair(&key);
//! let rendered = substitute(&invocation, &bindings)?;
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::TemplateError;
use crate::study::ParticipantSessionKey;

/// Prefix shared by every built-in placeholder name.
pub const BUILTIN_PREFIX: &str = "STUDYFORGE_";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([A-Za-z_][A-Za-z0-9_]*)\]\]").expect("placeholder regex is valid")
});

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name regex is valid"));

/// Something that contributes built-in bindings (paths, workflow attributes).
///
/// Names are returned without the [`BUILTIN_PREFIX`].
pub trait TemplateContext {
    fn template_bindings(&self) -> Vec<(String, String)>;
}

/// How unresolved placeholders are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Every placeholder must have a binding.
    Strict,
    /// Placeholders without a binding are left untouched.
    Lenient,
}

/// Name → value map used for substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateBindings {
    values: BTreeMap<String, String>,
}

impl TemplateBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings for one participant/session pair, in canonical and BIDS forms.
    pub fn for_pair(key: &ParticipantSessionKey) -> Self {
        Self::new()
            .with_builtin("PARTICIPANT_ID", key.participant_id.as_str())
            .with_builtin("SESSION_ID", key.session_id.as_str())
            .with_builtin("BIDS_PARTICIPANT_ID", key.participant_id.bids())
            .with_builtin("BIDS_SESSION_ID", key.session_id.bids())
    }

    /// Adds a built-in binding; `name` is given without the prefix.
    pub fn with_builtin(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_builtin(name, value);
        self
    }

    pub fn insert_builtin(&mut self, name: &str, value: impl Into<String>) {
        self.values
            .insert(format!("{BUILTIN_PREFIX}{name}"), value.into());
    }

    /// Adds every binding exposed by a context object.
    pub fn with_context(mut self, context: &dyn TemplateContext) -> Self {
        for (name, value) in context.template_bindings() {
            self.insert_builtin(&name, value);
        }
        self
    }

    /// Adds user-defined bindings.
    ///
    /// Keys may be written as `[[NAME]]` or `NAME`. A key using the
    /// built-in prefix is rejected rather than silently shadowed.
    pub fn with_user(mut self, substitutions: &BTreeMap<String, String>) -> Result<Self, TemplateError> {
        for (key, value) in substitutions {
            let name = normalize_key(key)?;
            self.values.insert(name, value.clone());
        }
        Ok(self)
    }

    /// Merges another set of bindings into this one; `other` wins on conflict.
    pub fn merged(mut self, other: &TemplateBindings) -> Self {
        self.values
            .extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Normalizes a user substitution key to a bare placeholder name.
pub fn normalize_key(key: &str) -> Result<String, TemplateError> {
    let trimmed = key.trim();
    let name = trimmed
        .strip_prefix("[[")
        .and_then(|inner| inner.strip_suffix("]]"))
        .unwrap_or(trimmed);
    if !NAME.is_match(name) {
        return Err(TemplateError::InvalidKey(key.to_string()));
    }
    if name.starts_with(BUILTIN_PREFIX) {
        return Err(TemplateError::ReservedKey(name.to_string()));
    }
    Ok(name.to_string())
}

/// Returns the distinct placeholder names found in `text`, in order of appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Substitutes placeholders in plain text.
pub fn substitute_text(
    text: &str,
    bindings: &TemplateBindings,
    resolution: Resolution,
) -> Result<String, TemplateError> {
    render(text, bindings, resolution, |value| value.to_string())
}

/// Substitutes placeholders in a JSON document, failing on any unresolved token.
pub fn substitute(value: &Value, bindings: &TemplateBindings) -> Result<Value, TemplateError> {
    substitute_with(value, bindings, Resolution::Strict)
}

/// Substitutes placeholders in a JSON document with the given resolution mode.
pub fn substitute_with(
    value: &Value,
    bindings: &TemplateBindings,
    resolution: Resolution,
) -> Result<Value, TemplateError> {
    let serialized = serde_json::to_string(value)?;
    let rendered = render(&serialized, bindings, resolution, json_escape)?;
    Ok(serde_json::from_str(&rendered)?)
}

fn render(
    text: &str,
    bindings: &TemplateBindings,
    resolution: Resolution,
    escape: impl Fn(&str) -> String,
) -> Result<String, TemplateError> {
    if resolution == Resolution::Strict {
        let mut missing: Vec<String> = placeholders(text)
            .into_iter()
            .filter(|name| bindings.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(TemplateError::Unresolved { names: missing });
        }
    }

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures| match bindings.get(&caps[1]) {
        Some(value) => escape(value),
        None => caps[0].to_string(),
    });
    Ok(rendered.into_owned())
}

/// Escapes a value for insertion inside an already-quoted JSON string.
fn json_escape(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
