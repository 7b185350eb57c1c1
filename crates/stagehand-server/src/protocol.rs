//! JSON frames exchanged with overlay and control clients.
//!
//! Every frame is an object tagged by `op`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagehand_state::LoggedEvent;
use stagehand_types::{
    PresentationPayload, RedactedConfig, RedactedConfigPatch, Ruleset, ThemeState, ValidationError,
};

/// Role declared in `hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Overlay,
    Control,
}

impl ClientRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overlay => "overlay",
            Self::Control => "control",
        }
    }
}

/// Client to server frames.
///
/// Mutation payloads stay raw JSON here; decoding them into lane types is
/// part of validation, so a bad patch is a validation error rather than a
/// protocol error.
#[derive(Debug, Deserialize)]
#[serde(tag = "op")]
pub enum ClientMessage {
    #[serde(rename = "hello", rename_all = "camelCase")]
    Hello {
        role: ClientRole,
        protocol_version: u32,
        #[serde(default)]
        secret: Option<String>,
    },
    #[serde(rename = "config:patch")]
    ConfigPatch { patch: Value },
    #[serde(rename = "rules:set")]
    RulesSet { rules: Value },
    #[serde(rename = "theme:patch")]
    ThemePatch { patch: Value },
}

impl ClientMessage {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::ConfigPatch { .. } => "config:patch",
            Self::RulesSet { .. } => "rules:set",
            Self::ThemePatch { .. } => "theme:patch",
        }
    }
}

/// A lane value tagged with its revision.
#[derive(Debug, Clone, Serialize)]
pub struct Versioned<T> {
    pub rev: u64,
    pub data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// Fields changed on an already-delivered event.
#[derive(Debug, Clone, Serialize)]
pub struct EventPatch {
    pub deleted: bool,
    pub presentation: PresentationPayload,
}

/// Server to client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op")]
pub enum ServerMessage {
    #[serde(rename = "state")]
    State {
        config: Versioned<RedactedConfig>,
        rules: Versioned<Ruleset>,
        theme: Versioned<ThemeState>,
    },
    #[serde(rename = "replay")]
    Replay { events: Vec<LoggedEvent> },
    #[serde(rename = "config:changed")]
    ConfigChanged { rev: u64, patch: RedactedConfigPatch },
    #[serde(rename = "rules:changed")]
    RulesChanged { rev: u64, data: Ruleset },
    #[serde(rename = "theme:changed")]
    ThemeChanged { rev: u64, data: ThemeState },
    #[serde(rename = "event")]
    Event(LoggedEvent),
    #[serde(rename = "event:update")]
    EventUpdate { id: String, patch: EventPatch },
    #[serde(rename = "control:notice")]
    ControlNotice {
        #[serde(skip_serializing_if = "Option::is_none")]
        rev: Option<u64>,
        level: NoticeLevel,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }

    /// Encodes the frame. Serialization of these types cannot fail in
    /// practice; a failure is logged and yields `None`.
    pub fn encode(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("failed to serialize outgoing frame: {}", e);
                None
            }
        }
    }
}

/// Field list attached to validation failures.
pub fn validation_details(err: &ValidationError) -> Option<Value> {
    serde_json::to_value(&err.issues).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_uses_camel_case_fields() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "op": "hello", "role": "control", "protocolVersion": 1, "secret": "s"
        }))
        .unwrap();
        match msg {
            ClientMessage::Hello {
                role,
                protocol_version,
                secret,
            } => {
                assert_eq!(role, ClientRole::Control);
                assert_eq!(protocol_version, 1);
                assert_eq!(secret.as_deref(), Some("s"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_ops_and_roles_do_not_decode() {
        assert!(serde_json::from_value::<ClientMessage>(json!({ "op": "shout" })).is_err());
        assert!(serde_json::from_value::<ClientMessage>(
            json!({ "op": "hello", "role": "admin", "protocolVersion": 1 })
        )
        .is_err());
    }

    #[test]
    fn patch_payload_is_kept_raw() {
        let msg: ClientMessage =
            serde_json::from_value(json!({ "op": "config:patch", "patch": { "nope": 1 } })).unwrap();
        assert_eq!(msg.op(), "config:patch");
    }

    #[test]
    fn notices_omit_empty_fields() {
        let frame = ServerMessage::ControlNotice {
            rev: None,
            level: NoticeLevel::Warn,
            message: "rolled back".into(),
            details: None,
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "op": "control:notice", "level": "warn", "message": "rolled back" })
        );
    }
}
