//! Operator configuration lane.

use crate::error::{Issues, ValidationError};
use serde::{Deserialize, Serialize};

/// Upper bound on `max_messages`, the retained event-log length.
pub const MAX_MESSAGES_LIMIT: usize = 200;

const MAX_BLOCKLIST_ENTRY_LEN: usize = 100;

/// Shared operator configuration.
///
/// Credential fields are never broadcast as-is; see [`AppConfig::redacted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Channel login to join (without `#`).
    pub channel: String,
    /// Hard cap on the retained event log.
    pub max_messages: usize,
    /// Shared secret required from `control` clients, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitch_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitch_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seventv_user_id: Option<String>,
    /// Case-insensitive substrings that force a `suppress` action.
    #[serde(default)]
    pub blocklist: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel: "test".to_string(),
            max_messages: 50,
            api_key: None,
            twitch_username: None,
            twitch_token: None,
            seventv_user_id: None,
            blocklist: Vec::new(),
        }
    }
}

/// A partial config proposed by a control client.
///
/// Credential fields use `Option<Option<_>>`: absent means "leave as is",
/// `null` or an empty string clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub api_key: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub twitch_username: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub twitch_token: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub seventv_user_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklist: Option<Vec<String>>,
}

fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ConfigPatch {
    /// Decodes a patch from the raw JSON a client sent.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::malformed("config", &e))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The same patch with credential values replaced by presence markers.
    pub fn redacted(&self) -> RedactedConfigPatch {
        RedactedConfigPatch {
            channel: self.channel.clone(),
            max_messages: self.max_messages,
            has_api_key: self.api_key.as_ref().map(|v| v.is_some()),
            twitch_username: self.twitch_username.clone(),
            has_twitch_token: self.twitch_token.as_ref().map(|v| v.is_some()),
            seventv_user_id: self.seventv_user_id.clone(),
            blocklist: self.blocklist.clone(),
        }
    }
}

impl AppConfig {
    /// Returns `self` with `patch` applied. Does not validate.
    pub fn merged(&self, patch: &ConfigPatch) -> AppConfig {
        let mut next = self.clone();
        if let Some(channel) = &patch.channel {
            next.channel = channel.trim().trim_start_matches('#').to_string();
        }
        if let Some(max) = patch.max_messages {
            next.max_messages = max;
        }
        if let Some(v) = &patch.api_key {
            next.api_key = non_blank(v.clone());
        }
        if let Some(v) = &patch.twitch_username {
            next.twitch_username = non_blank(v.clone());
        }
        if let Some(v) = &patch.twitch_token {
            next.twitch_token = non_blank(v.clone());
        }
        if let Some(v) = &patch.seventv_user_id {
            next.seventv_user_id = non_blank(v.clone());
        }
        if let Some(list) = &patch.blocklist {
            next.blocklist = list.clone();
        }
        next
    }

    /// Checks the schema constraints on a complete (merged) config.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Issues::default();
        if self.channel.trim().is_empty() {
            issues.push("channel", "must not be empty");
        }
        if self.max_messages < 1 || self.max_messages > MAX_MESSAGES_LIMIT {
            issues.push(
                "maxMessages",
                format!("must be between 1 and {MAX_MESSAGES_LIMIT}"),
            );
        }
        for (i, entry) in self.blocklist.iter().enumerate() {
            if entry.chars().count() > MAX_BLOCKLIST_ENTRY_LEN {
                issues.push(
                    format!("blocklist.{i}"),
                    format!("must be at most {MAX_BLOCKLIST_ENTRY_LEN} characters"),
                );
            }
        }
        issues.finish("config")
    }

    /// The fields whose values differ between `self` and `next`, as a patch.
    pub fn diff(&self, next: &AppConfig) -> ConfigPatch {
        fn changed<T: PartialEq + Clone>(a: &T, b: &T) -> Option<T> {
            (a != b).then(|| b.clone())
        }
        ConfigPatch {
            channel: changed(&self.channel, &next.channel),
            max_messages: changed(&self.max_messages, &next.max_messages),
            api_key: changed(&self.api_key, &next.api_key),
            twitch_username: changed(&self.twitch_username, &next.twitch_username),
            twitch_token: changed(&self.twitch_token, &next.twitch_token),
            seventv_user_id: changed(&self.seventv_user_id, &next.seventv_user_id),
            blocklist: changed(&self.blocklist, &next.blocklist),
        }
    }

    /// Whether a change from `self` to `next` requires the ingestion adapters
    /// (and channel-scoped resources) to be restarted.
    pub fn ingest_identity_changed(&self, next: &AppConfig) -> bool {
        self.channel != next.channel
            || self.twitch_username != next.twitch_username
            || self.twitch_token != next.twitch_token
            || self.seventv_user_id != next.seventv_user_id
    }

    /// The config as it may be shown to clients.
    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            channel: self.channel.clone(),
            max_messages: self.max_messages,
            has_api_key: self.api_key.is_some(),
            twitch_username: self.twitch_username.clone(),
            has_twitch_token: self.twitch_token.is_some(),
            seventv_user_id: self.seventv_user_id.clone(),
            blocklist: self.blocklist.clone(),
        }
    }
}

/// [`AppConfig`] with secrets replaced by presence flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedConfig {
    pub channel: String,
    pub max_messages: usize,
    pub has_api_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitch_username: Option<String>,
    pub has_twitch_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seventv_user_id: Option<String>,
    pub blocklist: Vec<String>,
}

/// [`ConfigPatch`] with secrets replaced by presence flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_api_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitch_username: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_twitch_token: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seventv_user_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklist: Option<Vec<String>>,
}

/// Whether `text` contains any blocklist entry (case-insensitive).
pub fn is_blocked(text: &str, blocklist: &[String]) -> bool {
    if blocklist.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    blocklist.iter().any(|entry| {
        let entry = entry.trim();
        !entry.is_empty() && lower.contains(&entry.to_lowercase())
    })
}
