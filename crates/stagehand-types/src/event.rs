//! Normalized event model produced by the ingestion adapters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Streaming platforms an event can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Twitch,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twitch => "twitch",
        }
    }
}

/// Roles a chatter can hold in the channel.
///
/// Ordering is only used to give [`ChatUser::roles`] a stable set order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Broadcaster,
    Mod,
    Vip,
    Sub,
    Founder,
    Member,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcaster => "broadcaster",
            Self::Mod => "mod",
            Self::Vip => "vip",
            Self::Sub => "sub",
            Self::Founder => "founder",
            Self::Member => "member",
        }
    }
}

/// A chat badge resolved against the badge catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBadge {
    pub set_id: String,
    pub version: String,
    pub url: String,
    pub title: String,
}

/// Platform identity of the user behind an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    pub display_name: String,
    /// Set semantics: duplicates collapse on construction and deserialization.
    #[serde(default)]
    pub roles: BTreeSet<UserRole>,
    #[serde(default)]
    pub badges: Vec<UserBadge>,
}

impl ChatUser {
    /// Builds a user with the given roles and no resolved badges.
    pub fn new(
        display_name: impl Into<String>,
        login: Option<String>,
        id: Option<String>,
        roles: impl IntoIterator<Item = UserRole>,
    ) -> Self {
        Self {
            platform: Platform::Twitch,
            id,
            login,
            display_name: display_name.into(),
            roles: roles.into_iter().collect(),
            badges: Vec::new(),
        }
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        self.roles.contains(&role)
    }
}

/// One segment of a chat message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text {
        content: String,
    },
    Emote {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Mention {
        user: String,
    },
    Link {
        url: String,
        text: String,
    },
}

impl MessagePart {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }
}

/// Provider-specific metadata, decoded once at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum ProviderMetadata {
    /// Metadata carried by a chat-relay line.
    #[serde(rename_all = "camelCase")]
    ChatRelay {
        /// Raw badge tag (`set/version,set/version`), resolved by the processor.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        badges: Option<String>,
        /// The line used the `/me` action framing.
        #[serde(default)]
        is_action: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    /// Metadata carried by an alert notification.
    #[serde(rename_all = "camelCase")]
    Alert {
        subscription_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageEvent {
    pub id: String,
    pub ts: i64,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    pub user: ChatUser,
    pub text: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderMetadata>,
}

/// A new follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEvent {
    pub id: String,
    pub ts: i64,
    pub user: ChatUser,
}

/// A new subscription or a resubscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubEvent {
    pub id: String,
    pub ts: i64,
    pub user: ChatUser,
    /// Raw tier code (`1000`, `2000`, `3000`).
    pub tier: String,
    #[serde(default)]
    pub is_gift: bool,
    pub months: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubEvent {
    /// Human tier number derived from the raw tier code.
    pub fn tier_label(&self) -> &str {
        match self.tier.as_str() {
            "1000" => "1",
            "2000" => "2",
            "3000" => "3",
            other => other,
        }
    }
}

/// An incoming raid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaidEvent {
    pub id: String,
    pub ts: i64,
    pub user: ChatUser,
    pub viewers: u64,
}

/// A bits cheer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheerEvent {
    pub id: String,
    pub ts: i64,
    pub user: ChatUser,
    pub bits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Discriminant of [`AppEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "chat.message")]
    ChatMessage,
    #[serde(rename = "platform.follow")]
    Follow,
    #[serde(rename = "platform.sub")]
    Sub,
    #[serde(rename = "platform.raid")]
    Raid,
    #[serde(rename = "platform.cheer")]
    Cheer,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatMessage => "chat.message",
            Self::Follow => "platform.follow",
            Self::Sub => "platform.sub",
            Self::Raid => "platform.raid",
            Self::Cheer => "platform.cheer",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat.message" => Ok(Self::ChatMessage),
            "platform.follow" => Ok(Self::Follow),
            "platform.sub" => Ok(Self::Sub),
            "platform.raid" => Ok(Self::Raid),
            "platform.cheer" => Ok(Self::Cheer),
            _ => Err(ParseEventKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event kind string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct ParseEventKindError(pub String);

/// A normalized event, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AppEvent {
    #[serde(rename = "chat.message")]
    ChatMessage(ChatMessageEvent),
    #[serde(rename = "platform.follow")]
    Follow(FollowEvent),
    #[serde(rename = "platform.sub")]
    Sub(SubEvent),
    #[serde(rename = "platform.raid")]
    Raid(RaidEvent),
    #[serde(rename = "platform.cheer")]
    Cheer(CheerEvent),
}

impl AppEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ChatMessage(_) => EventKind::ChatMessage,
            Self::Follow(_) => EventKind::Follow,
            Self::Sub(_) => EventKind::Sub,
            Self::Raid(_) => EventKind::Raid,
            Self::Cheer(_) => EventKind::Cheer,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::ChatMessage(e) => &e.id,
            Self::Follow(e) => &e.id,
            Self::Sub(e) => &e.id,
            Self::Raid(e) => &e.id,
            Self::Cheer(e) => &e.id,
        }
    }

    pub fn ts(&self) -> i64 {
        match self {
            Self::ChatMessage(e) => e.ts,
            Self::Follow(e) => e.ts,
            Self::Sub(e) => e.ts,
            Self::Raid(e) => e.ts,
            Self::Cheer(e) => e.ts,
        }
    }

    pub fn user(&self) -> &ChatUser {
        match self {
            Self::ChatMessage(e) => &e.user,
            Self::Follow(e) => &e.user,
            Self::Sub(e) => &e.user,
            Self::Raid(e) => &e.user,
            Self::Cheer(e) => &e.user,
        }
    }

    /// Platform of the event. Alerts only come from Twitch today.
    pub fn platform(&self) -> Platform {
        match self {
            Self::ChatMessage(e) => e.platform,
            _ => self.user().platform,
        }
    }

    /// Free text carried by the event, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::ChatMessage(e) => Some(&e.text),
            Self::Sub(e) => e.message.as_deref(),
            Self::Cheer(e) => e.message.as_deref(),
            Self::Follow(_) | Self::Raid(_) => None,
        }
    }
}

/// Generates a collision-resistant event id.
pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
