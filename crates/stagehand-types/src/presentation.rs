//! Rendering-agnostic presentation payloads and locale templates.

use crate::event::{AppEvent, MessagePart};
use crate::rules::RenderAction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Separates the singular and plural alternatives inside a template.
pub const PLURAL_DELIMITER: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Chat,
    Alert,
}

/// A named, ordered group of parts (e.g. `name`, `message`, `title`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub parts: Vec<MessagePart>,
}

impl Layer {
    pub fn new(name: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        Self {
            name: name.into(),
            parts,
        }
    }
}

/// Derived per event from the active theme; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationPayload {
    pub layout: Layout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub layers: Vec<Layer>,
}

impl PresentationPayload {
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }
}

/// Output of the event processor, as stored in the event log and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedEvent {
    pub event: AppEvent,
    pub actions: Vec<RenderAction>,
    pub presentation: PresentationPayload,
    /// Set when a moderator removed the message after it was delivered.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Locale string table of the active theme.
///
/// Lookups fall back to the built-in English strings so a theme package only
/// has to override what it changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locales(HashMap<String, String>);

const BUILTIN_LOCALES: &[(&str, &str)] = &[
    ("alert.follow", "{name} just followed!"),
    (
        "alert.sub",
        "{name} subscribed at tier {tier} for {months} month!|{name} subscribed at tier {tier} for {months} months!",
    ),
    ("alert.sub.gift", "{name} received a tier {tier} gift sub!"),
    (
        "alert.raid",
        "{name} is raiding with {viewers} viewer!|{name} is raiding with {viewers} viewers!",
    ),
    ("alert.cheer", "{name} cheered {bits} bit!|{name} cheered {bits} bits!"),
    ("chat.deleted", "message deleted"),
];

impl Locales {
    pub fn new(table: HashMap<String, String>) -> Self {
        Self(table)
    }

    /// Template for `key`, falling back to the built-in string, then the key.
    pub fn get<'a>(&'a self, key: &'a str) -> &'a str {
        if let Some(v) = self.0.get(key) {
            return v;
        }
        BUILTIN_LOCALES
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fills `{var}` placeholders in `template`.
///
/// If the template holds a `singular|plural` pair, the singular form is used
/// when `count == Some(1)` and the plural form otherwise. Unknown placeholders
/// are left as written.
pub fn render_template(template: &str, vars: &[(&str, String)], count: Option<u64>) -> String {
    let chosen = match template.split_once(PLURAL_DELIMITER) {
        Some((singular, _)) if count == Some(1) => singular,
        Some((_, plural)) => plural,
        None => template,
    };

    let mut out = String::with_capacity(chosen.len());
    let mut rest = chosen;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
