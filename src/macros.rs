//! Macro substitution for tracking URL templates (spec §4.3).
//!
//! Generalizes the ad-hoc `.replace("[DURATION]", ...)` calls in
//! `VastAdProvider::resolve_endpoint` into a declarative two-pass
//! substitution shared by every trackable.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;

/// A (possibly nested) map of macro names to values, e.g. `{"user": {"id": "42"}}`.
/// Dotted paths like `user.id` resolve by walking nested objects.
#[derive(Debug, Clone, Default)]
pub struct MacroMap(Value);

impl MacroMap {
    pub fn new() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    pub fn from_flat(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut map = serde_json::Map::new();
        for (k, v) in pairs {
            map.insert(k, Value::String(v));
        }
        Self(Value::Object(map))
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let Value::Object(map) = &mut self.0 {
            map.insert(name.into(), Value::String(value.into()));
        }
    }

    /// Merge `other` into `self`, with `other`'s keys taking precedence.
    pub fn merged_over(mut self, other: &MacroMap) -> Self {
        if let (Value::Object(base), Value::Object(top)) = (&mut self.0, &other.0) {
            for (k, v) in top {
                base.insert(k.clone(), v.clone());
            }
        }
        self
    }

    fn resolve(&self, dotted_path: &str) -> Option<String> {
        let mut cursor = &self.0;
        for part in dotted_path.split('.') {
            cursor = cursor.get(part)?;
        }
        match cursor {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.0.to_string().hash(&mut hasher);
        hasher.finish()
    }
}

/// Builds the automatic macros the caller's context supplies per spec §4.3:
/// `CACHEBUSTER`, `TIMESTAMP`, `CONTENTPLAYHEAD`, `CREATIVE_ID`, `DEVICE_ID`.
pub struct AutomaticMacros;

impl AutomaticMacros {
    pub fn build(offset_secs: f64, creative_id: Option<&str>, device_id: Option<&str>) -> MacroMap {
        let mut map = MacroMap::new();
        map.set("CACHEBUSTER", rand::thread_rng().r#gen::<u32>().to_string());
        map.set("TIMESTAMP", Utc::now().timestamp().to_string());
        map.set("CONTENTPLAYHEAD", format_content_playhead(offset_secs));
        if let Some(id) = creative_id {
            map.set("CREATIVE_ID", id);
        }
        if let Some(id) = device_id {
            map.set("DEVICE_ID", id);
        }
        map
    }
}

fn format_content_playhead(offset_secs: f64) -> String {
    let total_ms = (offset_secs.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    format!("{hours:02}:{mins:02}:{secs:02}.{ms:03}")
}

/// Per-trackable substitution cache: `(template, macro fingerprint) -> result`.
/// Avoids repeated substitution work across retries of the same trackable.
#[derive(Default)]
pub struct SubstitutionCache {
    cache: DashMap<(String, u64), String>,
}

impl SubstitutionCache {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    pub fn substitute(&self, template: &str, macros: &MacroMap) -> String {
        let key = (template.to_string(), macros.fingerprint());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let result = substitute(template, macros);
        self.cache.insert(key, result.clone());
        result
    }
}

/// Substitutes `[NAME]` then `${NAME}` placeholders in `template`. Missing
/// names are left untouched. Applying this twice with the same macro map
/// yields the same string as applying it once, since a fully-substituted
/// template no longer contains `[NAME]`/`${NAME}` syntax to re-match.
pub fn substitute(template: &str, macros: &MacroMap) -> String {
    let after_brackets = substitute_bracket(template, macros);
    substitute_dollar_brace(&after_brackets, macros)
}

fn substitute_bracket(template: &str, macros: &MacroMap) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(end) = template[i + 1..].find(']') {
                let name = &template[i + 1..i + 1 + end];
                if is_macro_name(name) {
                    match macros.resolve(name) {
                        Some(val) => out.push_str(&val),
                        None => out.push_str(&template[i..=i + 1 + end]),
                    }
                    i = i + 1 + end + 1;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn substitute_dollar_brace(template: &str, macros: &MacroMap) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && template[i..].starts_with("${") {
            if let Some(end) = template[i + 2..].find('}') {
                let name = &template[i + 2..i + 2 + end];
                if is_macro_name(name) {
                    match macros.resolve(name) {
                        Some(val) => {
                            out.push_str(&val);
                            i = i + 2 + end + 1;
                            continue;
                        }
                        None => {
                            // leave untouched, including the ${...} wrapper
                            out.push_str(&template[i..i + 2 + end + 1]);
                            i = i + 2 + end + 1;
                            continue;
                        }
                    }
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn is_macro_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
