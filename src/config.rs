//! Four-level configuration merge with validation and memoization
//! (spec §4.11).
//!
//! Replaces env-var loading (`Config::from_env` in the original) with an
//! explicit deep-merge over already-resolved `serde_json::Value` layers:
//! the core never reads environment or files itself (spec §1's
//! out-of-scope list), it only merges configuration the caller supplies.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{Result, VastClientError};

/// The four precedence levels, lowest to highest.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub global_defaults: Value,
    pub provider_defaults: Value,
    pub publisher_overrides: Value,
    pub per_call_override: Value,
}

impl ConfigLayers {
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for layer in [
            &self.global_defaults,
            &self.provider_defaults,
            &self.publisher_overrides,
            &self.per_call_override,
        ] {
            layer.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Deep-merges `overlay` onto `base`: nested objects merge key-by-key with
/// `overlay` winning; scalars and arrays are replaced wholesale unless the
/// overlay carries a sibling `__append: {key: [...]}` marker for that key,
/// in which case the array is concatenated onto the base array instead.
fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                if key == "__append" {
                    continue;
                }
                let appended = overlay_map
                    .get("__append")
                    .and_then(|v| v.get(key))
                    .and_then(|v| v.as_array());
                let merged_value = match (merged.get(key), appended) {
                    (Some(Value::Array(existing)), Some(to_append)) => {
                        let mut combined = existing.clone();
                        combined.extend(to_append.clone());
                        Value::Array(combined)
                    }
                    (Some(base_value), _) => deep_merge(base_value, overlay_value),
                    (None, _) => overlay_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

fn validate(value: &Value) -> Result<()> {
    validate_path(value, "")
}

fn validate_path(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                validate_field(&child_path, v)?;
                validate_path(v, &child_path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_field(path: &str, value: &Value) -> Result<()> {
    let lower = path.to_lowercase();
    if lower.contains("probability") {
        if let Some(n) = value.as_f64() {
            if !(0.0..=1.0).contains(&n) {
                return Err(VastClientError::ConfigError(format!(
                    "{path} must be in [0, 1], got {n}"
                )));
            }
        }
    }
    if lower.contains("duration") || lower.ends_with("timeout") {
        if let Some(n) = value.as_f64() {
            if n <= 0.0 {
                return Err(VastClientError::ConfigError(format!(
                    "{path} must be > 0, got {n}"
                )));
            }
        }
    }
    if lower.contains("retries") {
        if let Some(n) = value.as_i64() {
            if n < 0 {
                return Err(VastClientError::ConfigError(format!(
                    "{path} must be >= 0, got {n}"
                )));
            }
        }
    }
    if lower.contains("backoff") && lower.contains("multiplier") {
        if let Some(n) = value.as_f64() {
            if n < 1.0 {
                return Err(VastClientError::ConfigError(format!(
                    "{path} must be >= 1, got {n}"
                )));
            }
        }
    }
    if lower.ends_with("sources") {
        if let Some(arr) = value.as_array() {
            if arr.is_empty() {
                return Err(VastClientError::ConfigError(format!(
                    "{path} must be non-empty"
                )));
            }
        }
    }
    if lower.contains("wrapper_depth_limit") {
        if let Some(n) = value.as_i64() {
            if n < 0 {
                return Err(VastClientError::ConfigError(format!(
                    "{path} must be >= 0, got {n}"
                )));
            }
        }
    }
    Ok(())
}

/// Merges and validates config layers, memoizing by a fingerprint of the
/// four input layers so repeated calls on hot paths skip re-merging.
pub struct ConfigResolver {
    cache: DashMap<u64, Value>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    pub fn resolve(&self, layers: &ConfigLayers) -> Result<Value> {
        validate(&layers.global_defaults)?;
        validate(&layers.provider_defaults)?;
        validate(&layers.publisher_overrides)?;
        validate(&layers.per_call_override)?;

        let fingerprint = layers.fingerprint();
        if let Some(cached) = self.cache.get(&fingerprint) {
            return Ok(cached.clone());
        }

        let merged = deep_merge(&layers.global_defaults, &layers.provider_defaults);
        let merged = deep_merge(&merged, &layers.publisher_overrides);
        let merged = deep_merge(&merged, &layers.per_call_override);

        validate(&merged)?;
        self.cache.insert(fingerprint, merged.clone());
        Ok(merged)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn higher_level_scalars_override_lower() {
        let layers = ConfigLayers {
            global_defaults: json!({"retries": 2}),
            provider_defaults: json!({}),
            publisher_overrides: json!({"retries": 5}),
            per_call_override: json!({}),
        };
        let resolver = ConfigResolver::new();
        let merged = resolver.resolve(&layers).unwrap();
        assert_eq!(merged["retries"], 5);
    }

    #[test]
    fn unmentioned_nested_keys_survive_from_lower_levels() {
        let layers = ConfigLayers {
            global_defaults: json!({"tracker": {"max_retries": 2, "parallel": false}}),
            provider_defaults: json!({}),
            publisher_overrides: json!({"tracker": {"parallel": true}}),
            per_call_override: json!({}),
        };
        let resolver = ConfigResolver::new();
        let merged = resolver.resolve(&layers).unwrap();
        assert_eq!(merged["tracker"]["max_retries"], 2);
        assert_eq!(merged["tracker"]["parallel"], true);
    }

    #[test]
    fn lists_are_replaced_not_concatenated_by_default() {
        let layers = ConfigLayers {
            global_defaults: json!({"sources": ["a", "b"]}),
            provider_defaults: json!({}),
            publisher_overrides: json!({"sources": ["c"]}),
            per_call_override: json!({}),
        };
        let resolver = ConfigResolver::new();
        let merged = resolver.resolve(&layers).unwrap();
        assert_eq!(merged["sources"], json!(["c"]));
    }

    #[test]
    fn append_marker_concatenates_instead_of_replacing() {
        let layers = ConfigLayers {
            global_defaults: json!({"sources": ["a", "b"]}),
            provider_defaults: json!({}),
            publisher_overrides: json!({"sources": ["c"], "__append": {"sources": ["c"]}}),
            per_call_override: json!({}),
        };
        let resolver = ConfigResolver::new();
        let merged = resolver.resolve(&layers).unwrap();
        assert_eq!(merged["sources"], json!(["a", "b", "c"]));
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let layers = ConfigLayers {
            global_defaults: json!({"interruption_probability": 1.5}),
            ..Default::default()
        };
        let resolver = ConfigResolver::new();
        assert!(resolver.resolve(&layers).is_err());
    }

    #[test]
    fn rejects_empty_sources_list() {
        let layers = ConfigLayers {
            global_defaults: json!({"sources": []}),
            ..Default::default()
        };
        let resolver = ConfigResolver::new();
        assert!(resolver.resolve(&layers).is_err());
    }

    #[test]
    fn merge_is_idempotent() {
        let layers = ConfigLayers {
            global_defaults: json!({"retries": 2, "sources": ["a"]}),
            provider_defaults: json!({"tracker": {"parallel": true}}),
            ..Default::default()
        };
        let resolver = ConfigResolver::new();
        let once = resolver.resolve(&layers).unwrap();

        let layers_again = ConfigLayers {
            global_defaults: once.clone(),
            ..Default::default()
        };
        let resolver2 = ConfigResolver::new();
        let twice = resolver2.resolve(&layers_again).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn repeated_resolve_hits_cache() {
        let layers = ConfigLayers {
            global_defaults: json!({"retries": 2, "sources": ["a"]}),
            ..Default::default()
        };
        let resolver = ConfigResolver::new();
        resolver.resolve(&layers).unwrap();
        resolver.resolve(&layers).unwrap();
        assert_eq!(resolver.cache_len(), 1);
    }
}
