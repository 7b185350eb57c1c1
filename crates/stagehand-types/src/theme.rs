//! Theme lane: active theme package and overlay presentation values.

use crate::error::{Issues, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Theme id used when nothing else is configured.
pub const DEFAULT_THEME_ID: &str = "default";

/// Default placeholder shown instead of masked links.
pub const DEFAULT_LINK_PLACEHOLDER: &str = "[link]";

fn default_theme_id() -> String {
    DEFAULT_THEME_ID.to_string()
}

fn default_values() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("fadeMs".into(), json!(400));
    map.insert("lifetimeMs".into(), json!(30000));
    map.insert("disappear".into(), json!(true));
    map.insert("showNames".into(), json!(true));
    map.insert("customCss".into(), json!(""));
    map.insert("linkPlaceholder".into(), json!(DEFAULT_LINK_PLACEHOLDER));
    map
}

/// Active theme plus an open map of presentation values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeState {
    #[serde(default = "default_theme_id")]
    pub active_theme_id: String,
    #[serde(default = "default_values")]
    pub values: Map<String, Value>,
}

impl Default for ThemeState {
    fn default() -> Self {
        Self {
            active_theme_id: default_theme_id(),
            values: default_values(),
        }
    }
}

/// A partial theme proposed by a control client.
///
/// `values` is merged key by key; a `null` value removes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThemePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_theme_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Map<String, Value>>,
}

impl ThemePatch {
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::malformed("theme", &e))
    }
}

/// Numeric values with an accepted inclusive range.
const NUMERIC_RANGES: &[(&str, i64, i64)] = &[("fadeMs", 0, 10_000), ("lifetimeMs", 1_000, 300_000)];
const BOOLEAN_KEYS: &[&str] = &["disappear", "showNames"];
const STRING_KEYS: &[&str] = &["customCss", "linkPlaceholder"];

impl ThemeState {
    /// Returns `self` with `patch` applied. Does not validate.
    pub fn merged(&self, patch: &ThemePatch) -> ThemeState {
        let mut next = self.clone();
        if let Some(id) = &patch.active_theme_id {
            next.active_theme_id = id.trim().to_string();
        }
        if let Some(values) = &patch.values {
            for (key, value) in values {
                if value.is_null() {
                    next.values.remove(key);
                } else {
                    next.values.insert(key.clone(), value.clone());
                }
            }
        }
        next
    }

    /// Checks the schema constraints on a complete (merged) theme.
    ///
    /// Whether the theme id exists in the catalog is checked by the caller,
    /// which owns the catalog.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Issues::default();
        if self.active_theme_id.is_empty() {
            issues.push("activeThemeId", "must not be empty");
        }
        for (key, min, max) in NUMERIC_RANGES {
            if let Some(v) = self.values.get(*key) {
                match v.as_i64() {
                    Some(n) if (*min..=*max).contains(&n) => {}
                    _ => issues.push(
                        format!("values.{key}"),
                        format!("must be an integer between {min} and {max}"),
                    ),
                }
            }
        }
        for key in BOOLEAN_KEYS {
            if self.values.get(*key).is_some_and(|v| !v.is_boolean()) {
                issues.push(format!("values.{key}"), "must be a boolean");
            }
        }
        for key in STRING_KEYS {
            if self.values.get(*key).is_some_and(|v| !v.is_string()) {
                issues.push(format!("values.{key}"), "must be a string");
            }
        }
        issues.finish("theme")
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Text used in place of masked links.
    pub fn link_placeholder(&self) -> &str {
        self.string("linkPlaceholder")
            .unwrap_or(DEFAULT_LINK_PLACEHOLDER)
    }
}
