//! Style profile type and deterministic version fingerprinting
//!
//! A profile version is the first 16 hex characters (64 bits) of the SHA-256
//! digest of the profile's canonical JSON form. Identical profile content
//! always hashes to the same token regardless of key insertion order, so the
//! token doubles as half of the analysis cache key: any preference change
//! produces a new token and silently invalidates every cached analysis for
//! the old one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Reserved version token for "no profile". Never produced by real content
/// since real tokens are always 16 hex characters.
pub const BASIC_VERSION: &str = "basic";

/// A user's style profile: an unordered mapping of named preference lists
/// and scalars (fit preferences, color palette, body type, ...).
///
/// The broker never edits profile content, only fingerprints and renders it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleProfile(serde_json::Map<String, Value>);

impl StyleProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }

    /// Parse a profile from a JSON object value. Non-object values are
    /// rejected since a profile is always a mapping.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &serde_json::Map<String, Value> {
        &self.0
    }
}

/// Compute the version token for a profile, or [`BASIC_VERSION`] when no
/// profile is present.
pub fn version_of(profile: Option<&StyleProfile>) -> String {
    let profile = match profile {
        Some(p) => p,
        None => return BASIC_VERSION.to_string(),
    };

    let mut canonical = String::new();
    write_canonical(&Value::Object(profile.0.clone()), &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());

    // First 8 bytes = first 16 hex characters of the full digest.
    let mut token = String::with_capacity(16);
    for byte in &digest[..8] {
        token.push_str(&format!("{byte:02x}"));
    }
    token
}

/// Serialize a JSON value with sorted object keys, compact separators, and
/// arrays in original order. Key order must not depend on which map backing
/// serde_json was compiled with, so sorting is done explicitly here.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(value: Value) -> StyleProfile {
        StyleProfile::from_value(value).expect("profile fixture must be an object")
    }

    #[test]
    fn test_absent_profile_is_basic() {
        assert_eq!(version_of(None), BASIC_VERSION);
    }

    #[test]
    fn test_version_is_16_hex_chars() {
        let p = profile(json!({"body_type": "athletic"}));
        let token = version_of(Some(&p));

        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, BASIC_VERSION);
    }

    #[test]
    fn test_version_is_deterministic() {
        let p = profile(json!({
            "fit_preferences": ["slim", "regular"],
            "color_palette": ["navy", "grey"],
        }));

        assert_eq!(version_of(Some(&p)), version_of(Some(&p)));
    }

    #[test]
    fn test_version_invariant_under_key_order() {
        let mut a = StyleProfile::new();
        a.insert("fit_preferences", json!(["slim"]));
        a.insert("body_type", json!("athletic"));

        let mut b = StyleProfile::new();
        b.insert("body_type", json!("athletic"));
        b.insert("fit_preferences", json!(["slim"]));

        assert_eq!(version_of(Some(&a)), version_of(Some(&b)));
    }

    #[test]
    fn test_version_sensitive_to_any_change() {
        let base = profile(json!({"body_type": "athletic", "priorities": ["comfort"]}));
        let changed = profile(json!({"body_type": "petite", "priorities": ["comfort"]}));

        assert_ne!(version_of(Some(&base)), version_of(Some(&changed)));
    }

    #[test]
    fn test_version_sensitive_to_list_order() {
        let a = profile(json!({"color_palette": ["navy", "grey"]}));
        let b = profile(json!({"color_palette": ["grey", "navy"]}));

        assert_ne!(version_of(Some(&a)), version_of(Some(&b)));
    }

    #[test]
    fn test_empty_profile_is_not_basic() {
        let p = StyleProfile::new();
        let token = version_of(Some(&p));

        assert_eq!(token.len(), 16);
        assert_ne!(token, BASIC_VERSION);
    }

    #[test]
    fn test_nested_keys_are_sorted() {
        let a = profile(json!({"sizing": {"top": "m", "bottom": "32"}}));
        let mut b_inner = serde_json::Map::new();
        b_inner.insert("bottom".to_string(), json!("32"));
        b_inner.insert("top".to_string(), json!("m"));
        let mut b = StyleProfile::new();
        b.insert("sizing", Value::Object(b_inner));

        assert_eq!(version_of(Some(&a)), version_of(Some(&b)));
    }
}
