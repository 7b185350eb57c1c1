//! Shared types for the Stagehand event pipeline.
//!
//! This crate holds the data model every other crate speaks: the normalized
//! [`AppEvent`] produced by ingestion, the three mutable lanes
//! ([`AppConfig`], [`Ruleset`], [`ThemeState`]) with their merge and
//! validation rules, and the [`PresentationPayload`] handed to overlays.
//!
//! Nothing here performs I/O. Validation always runs against a fully merged
//! value so partial patches can never leave a lane half-valid.

mod config;
mod error;
mod event;
mod presentation;
mod rules;
mod text;
mod theme;

pub use config::{
    is_blocked, AppConfig, ConfigPatch, RedactedConfig, RedactedConfigPatch, MAX_MESSAGES_LIMIT,
};
pub use error::{FieldIssue, ValidationError};
pub use event::{
    new_event_id, AppEvent, ChatMessageEvent, ChatUser, CheerEvent, EventKind, FollowEvent,
    MessagePart, ParseEventKindError, Platform, ProviderMetadata, RaidEvent, SubEvent, UserBadge,
    UserRole,
};
pub use presentation::{
    render_template, EvaluatedEvent, Layer, Layout, Locales, PresentationPayload,
    PLURAL_DELIMITER,
};
pub use rules::{
    RenderAction, Rule, RuleMatch, Ruleset, MAX_COOLDOWN_MS, MAX_REGEX_LEN, RULESET_VERSION,
};
pub use text::strip_invisible;
pub use theme::{ThemePatch, ThemeState, DEFAULT_LINK_PLACEHOLDER, DEFAULT_THEME_ID};

/// Wire protocol version spoken by overlay and control clients.
pub const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests;
