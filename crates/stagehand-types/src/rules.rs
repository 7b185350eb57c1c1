//! Ruleset lane: operator-defined match predicates and render actions.

use crate::error::{Issues, ValidationError};
use crate::event::{EventKind, Platform, UserRole};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The only ruleset schema version.
pub const RULESET_VERSION: u32 = 1;

/// Longest accepted `textRegex` source.
pub const MAX_REGEX_LEN: usize = 200;

/// Largest accepted per-rule cooldown.
pub const MAX_COOLDOWN_MS: u64 = 1_000_000;

/// Side-effect-free instruction attached to an evaluated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RenderAction {
    AddClass { value: String },
    SetVar { name: String, value: String },
    Suppress,
    MaskUrl,
}

/// Predicate half of a [`Rule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_all: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_has_role: Option<UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_includes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_regex: Option<String>,
}

impl RuleMatch {
    /// A predicate on `kind` with no conditions set.
    pub fn for_kind(kind: EventKind) -> Self {
        Self {
            kind,
            match_all: None,
            platform: None,
            user_has_role: None,
            text_includes: None,
            text_regex: None,
        }
    }

    fn has_condition(&self) -> bool {
        self.platform.is_some()
            || self.user_has_role.is_some()
            || self.text_includes.is_some()
            || self.text_regex.is_some()
    }
}

fn default_enabled() -> bool {
    true
}

/// A single operator rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "match")]
    pub match_: RuleMatch,
    #[serde(default)]
    pub actions: Vec<RenderAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
}

/// Versioned list of rules, evaluated in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self {
            version: RULESET_VERSION,
            rules: Vec::new(),
        }
    }
}

impl Ruleset {
    /// Ruleset shipped with a fresh install: a disabled link-masking rule.
    pub fn builtin() -> Self {
        Self {
            version: RULESET_VERSION,
            rules: vec![Rule {
                id: "system-hide-links".to_string(),
                enabled: false,
                match_: RuleMatch {
                    text_regex: Some(r"(https?://|www\.)\S+".to_string()),
                    ..RuleMatch::for_kind(EventKind::ChatMessage)
                },
                actions: vec![RenderAction::MaskUrl],
                cooldown_ms: None,
            }],
        }
    }

    /// Decodes a full ruleset from the raw JSON a client sent.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::malformed("rules", &e))
    }

    /// Checks the schema constraints on a complete ruleset.
    ///
    /// Regex syntax is deliberately not checked here: a rule with a broken
    /// pattern is accepted and simply never matches.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Issues::default();
        if self.version != RULESET_VERSION {
            issues.push("version", format!("must be {RULESET_VERSION}"));
        }

        let mut seen = HashSet::new();
        for (i, rule) in self.rules.iter().enumerate() {
            let at = |field: &str| format!("rules.{i}.{field}");

            if rule.id.trim().is_empty() {
                issues.push(at("id"), "must not be empty");
            } else if !seen.insert(rule.id.as_str()) {
                issues.push(at("id"), format!("duplicate rule id '{}'", rule.id));
            }

            let m = &rule.match_;
            if m.match_all != Some(true) && !m.has_condition() {
                issues.push(
                    at("match"),
                    "must specify at least one condition unless matchAll is true",
                );
            }
            if m.text_includes.as_deref().is_some_and(str::is_empty) {
                issues.push(at("match.textIncludes"), "must not be empty");
            }
            if let Some(re) = &m.text_regex {
                if re.is_empty() || re.chars().count() > MAX_REGEX_LEN {
                    issues.push(
                        at("match.textRegex"),
                        format!("must be 1 to {MAX_REGEX_LEN} characters"),
                    );
                }
            }
            if rule.cooldown_ms.is_some_and(|c| c > MAX_COOLDOWN_MS) {
                issues.push(at("cooldownMs"), format!("must be at most {MAX_COOLDOWN_MS}"));
            }

            for (j, action) in rule.actions.iter().enumerate() {
                match action {
                    RenderAction::AddClass { value } if value.is_empty() => {
                        issues.push(format!("rules.{i}.actions.{j}.value"), "must not be empty");
                    }
                    RenderAction::SetVar { name, .. } if name.is_empty() => {
                        issues.push(format!("rules.{i}.actions.{j}.name"), "must not be empty");
                    }
                    _ => {}
                }
            }
        }
        issues.finish("rules")
    }
}
