//! Chat-relay protocol: Twitch IRC lines carried over a WebSocket.
//!
//! Everything in this module is pure. [`ChatRelaySession::handle_line`]
//! turns one raw line into one [`RelayAction`]; the socket loop in
//! [`crate::runner`] performs the I/O.

use crate::error::IngestError;
use stagehand_types::{
    new_event_id, strip_invisible, AppEvent, ChatMessageEvent, ChatUser, MessagePart, Platform,
    ProviderMetadata, UserRole,
};
use std::collections::HashMap;

/// Public chat-relay endpoint.
pub const CHAT_RELAY_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Capabilities requested right after registration.
const CAPABILITIES: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership";

const ACTION_PREFIX: &str = "\u{1}ACTION ";
const ACTION_SUFFIX: char = '\u{1}';

/// Notices that mean the credentials will never work.
const AUTH_FAILURE_NOTICES: &[&str] = &["Login authentication failed", "Improperly formatted auth"];

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcLine {
    pub tags: HashMap<String, String>,
    /// Source prefix without the leading `:`.
    pub prefix: Option<String>,
    pub command: String,
    /// Middle parameters followed by the trailing parameter, if any.
    pub params: Vec<String>,
}

impl IrcLine {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Last parameter, which for most commands is the trailing text.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Nickname part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        prefix.split('!').next().filter(|n| !n.is_empty())
    }
}

/// Parses one line. Returns `None` for blank or command-less input.
pub fn parse_line(line: &str) -> Option<IrcLine> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut parsed = IrcLine::default();

    if let Some(stripped) = rest.strip_prefix('@') {
        let (tags, after) = stripped.split_once(' ')?;
        parsed.tags = parse_tags(tags);
        rest = after.trim_start();
    }

    if let Some(stripped) = rest.strip_prefix(':') {
        let (prefix, after) = stripped.split_once(' ')?;
        parsed.prefix = Some(prefix.to_string());
        rest = after.trim_start();
    }

    let (command, mut params) = match rest.split_once(' ') {
        Some((c, p)) => (c, p),
        None => (rest, ""),
    };
    if command.is_empty() {
        return None;
    }
    parsed.command = command.to_string();

    while !params.is_empty() {
        if let Some(trailing) = params.strip_prefix(':') {
            parsed.params.push(trailing.to_string());
            break;
        }
        match params.split_once(' ') {
            Some((param, after)) => {
                if !param.is_empty() {
                    parsed.params.push(param.to_string());
                }
                params = after;
            }
            None => {
                parsed.params.push(params.to_string());
                break;
            }
        }
    }

    Some(parsed)
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => (k.to_string(), unescape_tag(v)),
            None => (kv.to_string(), String::new()),
        })
        .collect()
}

/// Reverses IRCv3 tag-value escaping.
fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Login credentials for an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCredentials {
    pub username: String,
    pub token: String,
}

/// Outcome of handling one line.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Write this line back immediately (keepalive reply).
    Send(String),
    Chat(AppEvent),
    MessageDeleted { id: String },
    UserTimedOut {
        login: String,
        duration_seconds: Option<u64>,
    },
    /// Upstream refused the credentials; stop reconnecting.
    AuthFailed(String),
    /// Upstream asked us to reconnect.
    Reconnect,
    Ignore,
}

/// Per-channel protocol state.
#[derive(Debug, Clone)]
pub struct ChatRelaySession {
    channel: String,
}

impl ChatRelaySession {
    /// # Errors
    ///
    /// Returns `IngestError::Config` if `channel` is blank.
    pub fn new(channel: &str) -> Result<Self, IngestError> {
        let channel = channel.trim().trim_start_matches('#').to_lowercase();
        if channel.is_empty() {
            return Err(IngestError::Config("channel is required".into()));
        }
        Ok(Self { channel })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Lines to send right after the socket opens.
    ///
    /// Without credentials the anonymous `justinfan<n>` login is used.
    pub fn handshake(&self, credentials: Option<&RelayCredentials>, anonymous_suffix: u32) -> Vec<String> {
        let mut lines = Vec::with_capacity(4);
        match credentials {
            Some(c) => {
                let token = c.token.strip_prefix("oauth:").unwrap_or(&c.token);
                lines.push(format!("PASS oauth:{token}"));
                lines.push(format!("NICK {}", c.username.to_lowercase()));
            }
            None => {
                lines.push("PASS SCHMOOPIIE".to_string());
                lines.push(format!("NICK justinfan{anonymous_suffix}"));
            }
        }
        lines.push(CAPABILITIES.to_string());
        lines.push(format!("JOIN #{}", self.channel));
        lines
    }

    /// Handles one raw line received at `now` (epoch ms).
    pub fn handle_line(&self, raw: &str, now: i64) -> RelayAction {
        let Some(line) = parse_line(raw) else {
            return RelayAction::Ignore;
        };

        match line.command.as_str() {
            "PING" => {
                let payload = line.trailing().unwrap_or("tmi.twitch.tv");
                RelayAction::Send(format!("PONG :{payload}"))
            }
            "PRIVMSG" => match self.chat_event(&line, now) {
                Some(event) => RelayAction::Chat(event),
                None => RelayAction::Ignore,
            },
            "CLEARMSG" => match line.tag("target-msg-id") {
                Some(id) => RelayAction::MessageDeleted { id: id.to_string() },
                None => RelayAction::Ignore,
            },
            // Without a target login this clears the whole channel, which
            // overlays do not mirror.
            "CLEARCHAT" if line.params.len() >= 2 => {
                let login = line.trailing().unwrap_or_default().trim().to_lowercase();
                if login.is_empty() {
                    return RelayAction::Ignore;
                }
                RelayAction::UserTimedOut {
                    login,
                    duration_seconds: line.tag("ban-duration").and_then(|d| d.parse().ok()),
                }
            }
            "NOTICE" => {
                let text = line.trailing().unwrap_or_default();
                if AUTH_FAILURE_NOTICES.iter().any(|n| text.contains(n)) {
                    RelayAction::AuthFailed(text.to_string())
                } else {
                    tracing::debug!(notice = text, "chat relay notice");
                    RelayAction::Ignore
                }
            }
            "RECONNECT" => RelayAction::Reconnect,
            _ => RelayAction::Ignore,
        }
    }

    fn chat_event(&self, line: &IrcLine, now: i64) -> Option<AppEvent> {
        let channel = line
            .params
            .first()
            .map(|c| c.trim_start_matches('#').to_lowercase())
            .unwrap_or_else(|| self.channel.clone());
        let body = line.params.get(1)?;

        let login = line.nick().unwrap_or("unknown").to_lowercase();
        let (text, is_action) = unwrap_action(body);

        let parts = sanitize_parts(segment_emotes(text, line.tag("emotes")));
        let roles = roles_from_tags(line, &channel, &login);
        let display_name = line.tag("display-name").unwrap_or(&login).to_string();

        let user = ChatUser::new(
            display_name,
            Some(login.clone()),
            line.tag("user-id").map(str::to_string),
            roles,
        );

        Some(AppEvent::ChatMessage(ChatMessageEvent {
            id: line.tag("id").map(str::to_string).unwrap_or_else(new_event_id),
            ts: line
                .tag("tmi-sent-ts")
                .and_then(|t| t.parse().ok())
                .unwrap_or(now),
            platform: Platform::Twitch,
            channel_name: Some(channel),
            user,
            text: strip_invisible(text),
            parts,
            provider: Some(ProviderMetadata::ChatRelay {
                badges: line.tag("badges").map(str::to_string),
                is_action,
                color: line.tag("color").map(str::to_string),
            }),
        }))
    }
}

/// Strips `\x01ACTION ...\x01` framing, reporting whether it was present.
fn unwrap_action(body: &str) -> (&str, bool) {
    match body.strip_prefix(ACTION_PREFIX) {
        Some(inner) => (inner.strip_suffix(ACTION_SUFFIX).unwrap_or(inner), true),
        None => (body, false),
    }
}

fn roles_from_tags(line: &IrcLine, channel: &str, login: &str) -> Vec<UserRole> {
    let mut roles = vec![UserRole::Member];
    if login.eq_ignore_ascii_case(channel) {
        roles.push(UserRole::Broadcaster);
    }
    if line.tag("mod") == Some("1") {
        roles.push(UserRole::Mod);
    }
    for badge in line.tag("badges").unwrap_or_default().split(',') {
        if badge.starts_with("vip/") {
            roles.push(UserRole::Vip);
        } else if badge.starts_with("subscriber/") {
            roles.push(UserRole::Sub);
        } else if badge.starts_with("founder/") {
            roles.push(UserRole::Founder);
        }
    }
    roles
}

/// Emote occurrence in code-point offsets, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EmoteRange {
    id: String,
    start: usize,
    end: usize,
}

/// Decodes `id:s-e,s-e/id:s-e`, sorted by start offset.
fn parse_emote_ranges(tag: &str) -> Vec<EmoteRange> {
    let mut ranges: Vec<EmoteRange> = tag
        .split('/')
        .filter_map(|group| group.split_once(':'))
        .filter(|(id, _)| !id.is_empty())
        .flat_map(|(id, positions)| {
            positions.split(',').filter_map(move |pos| {
                let (s, e) = pos.split_once('-')?;
                Some(EmoteRange {
                    id: id.to_string(),
                    start: s.parse().ok()?,
                    end: e.parse().ok()?,
                })
            })
        })
        .collect();
    ranges.sort_by_key(|r| r.start);
    ranges
}

/// Splits `text` into text and emote parts at the tagged ranges.
///
/// Ranges that are inverted, out of bounds or overlap an earlier range are
/// skipped.
pub fn segment_emotes(text: &str, emotes_tag: Option<&str>) -> Vec<MessagePart> {
    let Some(tag) = emotes_tag else {
        return vec![MessagePart::text(text)];
    };

    let chars: Vec<char> = text.chars().collect();
    let slice = |from: usize, to: usize| chars[from..to].iter().collect::<String>();

    let mut parts = Vec::new();
    let mut cursor = 0;
    for range in parse_emote_ranges(tag) {
        if range.start > range.end || range.end >= chars.len() || range.start < cursor {
            continue;
        }
        if range.start > cursor {
            parts.push(MessagePart::text(slice(cursor, range.start)));
        }
        parts.push(MessagePart::Emote {
            id: range.id,
            name: slice(range.start, range.end + 1),
            url: None,
        });
        cursor = range.end + 1;
    }
    if cursor < chars.len() {
        parts.push(MessagePart::text(slice(cursor, chars.len())));
    }
    parts
}

/// Strips invisible characters from every part, dropping text parts left
/// empty.
fn sanitize_parts(parts: Vec<MessagePart>) -> Vec<MessagePart> {
    parts
        .into_iter()
        .filter_map(|part| match part {
            MessagePart::Text { content } => {
                let content = strip_invisible(&content);
                (!content.is_empty()).then_some(MessagePart::Text { content })
            }
            MessagePart::Emote { id, name, url } => Some(MessagePart::Emote {
                id,
                name: strip_invisible(&name),
                url,
            }),
            other => Some(other),
        })
        .collect()
}
