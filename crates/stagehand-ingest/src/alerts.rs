//! Alerting protocol: Twitch EventSub over WebSocket.
//!
//! [`AlertSession`] is the explicit session state machine:
//!
//! ```text
//! Connecting -> AwaitingWelcome -> Subscribing -> Live
//!                                      |            |
//!                                      +------------+--> ReconnectRequested
//!                                                   +--> KeepaliveTimeout
//!                                                   +--> Closed
//! ```
//!
//! It only interprets frames and tracks the keepalive interval; the socket
//! loop in [`crate::runner`] owns timers and I/O.

use crate::error::IngestError;
use serde::Deserialize;
use serde_json::Value;
use stagehand_types::{
    new_event_id, strip_invisible, AppEvent, ChatUser, CheerEvent, FollowEvent, RaidEvent,
    SubEvent, UserRole,
};
use std::time::Duration;

/// Public EventSub WebSocket endpoint.
pub const ALERTS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Keepalive interval assumed until the welcome frame says otherwise.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

/// Slack added on top of the advertised keepalive interval.
pub const KEEPALIVE_GRACE: Duration = Duration::from_secs(3);

/// Bounds applied to the keepalive interval advertised by the welcome frame.
const KEEPALIVE_RANGE_SECS: (u64, u64) = (10, 600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Connecting,
    AwaitingWelcome,
    Subscribing,
    Live,
    ReconnectRequested,
    KeepaliveTimeout,
    Closed,
}

/// What the socket loop should do after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertStep {
    /// Session established: register subscriptions for `session_id`.
    Welcome { session_id: String },
    /// A notification; `None` when its category is not one we map.
    Notification(Option<AppEvent>),
    Keepalive,
    /// Close and reconnect to `url`.
    Reconnect { url: String },
    /// A subscription was revoked upstream.
    Revoked { subscription_type: String },
    Ignored,
}

#[derive(Debug)]
pub struct AlertSession {
    phase: AlertPhase,
    keepalive: Duration,
}

impl Default for AlertSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSession {
    pub fn new() -> Self {
        Self {
            phase: AlertPhase::Connecting,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    /// Time without any frame after which the session is considered dead.
    pub fn watchdog(&self) -> Duration {
        self.keepalive.saturating_add(KEEPALIVE_GRACE)
    }

    /// The socket opened; a new session always starts from the default
    /// keepalive.
    pub fn on_connected(&mut self) {
        self.phase = AlertPhase::AwaitingWelcome;
        self.keepalive = DEFAULT_KEEPALIVE;
    }

    /// Subscription registration finished (successfully or not).
    pub fn on_subscribed(&mut self) {
        if self.phase == AlertPhase::Subscribing {
            self.phase = AlertPhase::Live;
        }
    }

    pub fn on_watchdog_expired(&mut self) {
        self.phase = AlertPhase::KeepaliveTimeout;
    }

    pub fn on_closed(&mut self) {
        self.phase = AlertPhase::Closed;
    }

    /// Interprets one text frame received at `now` (epoch ms).
    ///
    /// # Errors
    ///
    /// `IngestError::Parse` for undecodable JSON and `IngestError::Protocol`
    /// for frames that are invalid in the current phase. Neither changes
    /// the phase.
    pub fn on_frame(&mut self, raw: &str, now: i64) -> Result<AlertStep, IngestError> {
        let frame: Frame = serde_json::from_str(raw)?;
        let kind = frame.metadata.message_type.as_str();

        if self.phase == AlertPhase::AwaitingWelcome && kind != "session_welcome" {
            return Err(IngestError::Protocol(format!(
                "expected session_welcome, got {kind}"
            )));
        }

        match kind {
            "session_welcome" => {
                let payload: SessionPayload = serde_json::from_value(frame.payload)?;
                if let Some(secs) = payload.session.keepalive_timeout_seconds {
                    let (min, max) = KEEPALIVE_RANGE_SECS;
                    self.keepalive = Duration::from_secs(secs.clamp(min, max));
                }
                self.phase = AlertPhase::Subscribing;
                Ok(AlertStep::Welcome {
                    session_id: payload.session.id,
                })
            }
            "session_keepalive" => Ok(AlertStep::Keepalive),
            "notification" => {
                let payload: NotificationPayload = serde_json::from_value(frame.payload)?;
                let ts = frame
                    .metadata
                    .message_timestamp
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or(now);
                let id = frame.metadata.message_id.unwrap_or_else(new_event_id);
                let event = map_notification(&payload.subscription.kind, payload.event, id, ts)?;
                Ok(AlertStep::Notification(event))
            }
            "session_reconnect" => {
                let payload: SessionPayload = serde_json::from_value(frame.payload)?;
                let url = payload.session.reconnect_url.ok_or_else(|| {
                    IngestError::Protocol("session_reconnect without reconnect_url".into())
                })?;
                self.phase = AlertPhase::ReconnectRequested;
                Ok(AlertStep::Reconnect { url })
            }
            "revocation" => {
                let payload: NotificationPayload = serde_json::from_value(frame.payload)?;
                Ok(AlertStep::Revoked {
                    subscription_type: payload.subscription.kind,
                })
            }
            _ => Ok(AlertStep::Ignored),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.timestamp_millis())
}

// ── wire shapes ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Frame {
    metadata: Metadata,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    message_id: Option<String>,
    message_type: String,
    #[serde(default)]
    message_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    session: SessionInfo,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    id: String,
    #[serde(default)]
    keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    reconnect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    subscription: SubscriptionInfo,
    #[serde(default)]
    event: Value,
}

#[derive(Debug, Deserialize)]
struct SubscriptionInfo {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct UserFields {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_login: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscribeFields {
    #[serde(flatten)]
    user: UserFields,
    tier: String,
    #[serde(default)]
    is_gift: bool,
}

#[derive(Debug, Deserialize)]
struct ResubFields {
    #[serde(flatten)]
    user: UserFields,
    tier: String,
    #[serde(default)]
    cumulative_months: Option<u32>,
    #[serde(default)]
    streak_months: Option<u32>,
    #[serde(default)]
    message: Option<ResubMessage>,
}

#[derive(Debug, Deserialize)]
struct ResubMessage {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RaidFields {
    from_broadcaster_user_id: Option<String>,
    from_broadcaster_user_login: Option<String>,
    from_broadcaster_user_name: Option<String>,
    viewers: u64,
}

#[derive(Debug, Deserialize)]
struct CheerFields {
    #[serde(flatten)]
    user: UserFields,
    #[serde(default)]
    is_anonymous: bool,
    bits: u64,
    #[serde(default)]
    message: Option<String>,
}

fn alert_user(name: Option<String>, login: Option<String>, id: Option<String>) -> ChatUser {
    let login = login.unwrap_or_default();
    let display_name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| login.clone());
    let login = (!login.is_empty()).then_some(login);
    ChatUser::new(display_name, login, id, [UserRole::Member])
}

impl UserFields {
    fn into_user(self) -> ChatUser {
        alert_user(self.user_name, self.user_login, self.user_id)
    }
}

fn sanitized(text: Option<String>) -> Option<String> {
    text.map(|t| strip_invisible(&t)).filter(|t| !t.is_empty())
}

/// Maps a notification body by subscription type. Unknown types yield
/// `Ok(None)`.
fn map_notification(
    subscription_type: &str,
    event: Value,
    id: String,
    ts: i64,
) -> Result<Option<AppEvent>, IngestError> {
    let mapped = match subscription_type {
        "channel.follow" => {
            let f: UserFields = serde_json::from_value(event)?;
            AppEvent::Follow(FollowEvent {
                id,
                ts,
                user: f.into_user(),
            })
        }
        "channel.subscribe" => {
            let f: SubscribeFields = serde_json::from_value(event)?;
            AppEvent::Sub(SubEvent {
                id,
                ts,
                user: f.user.into_user(),
                tier: f.tier,
                is_gift: f.is_gift,
                months: 1,
                streak: None,
                message: None,
            })
        }
        "channel.subscription.message" => {
            let f: ResubFields = serde_json::from_value(event)?;
            AppEvent::Sub(SubEvent {
                id,
                ts,
                user: f.user.into_user(),
                tier: f.tier,
                is_gift: false,
                months: f.cumulative_months.unwrap_or(1),
                streak: f.streak_months,
                message: sanitized(f.message.map(|m| m.text)),
            })
        }
        "channel.raid" => {
            let f: RaidFields = serde_json::from_value(event)?;
            AppEvent::Raid(RaidEvent {
                id,
                ts,
                user: alert_user(
                    f.from_broadcaster_user_name,
                    f.from_broadcaster_user_login,
                    f.from_broadcaster_user_id,
                ),
                viewers: f.viewers,
            })
        }
        "channel.cheer" => {
            let f: CheerFields = serde_json::from_value(event)?;
            let user = if f.is_anonymous {
                alert_user(Some("Anonymous".into()), Some("anonymous".into()), None)
            } else {
                f.user.into_user()
            };
            AppEvent::Cheer(CheerEvent {
                id,
                ts,
                user,
                bits: f.bits,
                message: sanitized(f.message),
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(mapped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn welcome(keepalive: u64) -> String {
        json!({
            "metadata": { "message_id": "w", "message_type": "session_welcome", "message_timestamp": "2024-01-01T00:00:00Z" },
            "payload": { "session": { "id": "sess-1", "status": "connected", "keepalive_timeout_seconds": keepalive, "reconnect_url": null } }
        })
        .to_string()
    }

    fn notification(kind: &str, event: Value) -> String {
        json!({
            "metadata": {
                "message_id": "n-1",
                "message_type": "notification",
                "message_timestamp": "2024-01-01T00:00:01.500000000Z"
            },
            "payload": { "subscription": { "type": kind, "version": "1" }, "event": event }
        })
        .to_string()
    }

    fn live_session() -> AlertSession {
        let mut s = AlertSession::new();
        s.on_connected();
        s.on_frame(&welcome(30), 0).unwrap();
        s.on_subscribed();
        s
    }

    fn event(step: AlertStep) -> AppEvent {
        match step {
            AlertStep::Notification(Some(ev)) => ev,
            other => panic!("expected mapped notification, got {other:?}"),
        }
    }

    #[test]
    fn welcome_sets_session_and_watchdog() {
        let mut s = AlertSession::new();
        assert_eq!(s.phase(), AlertPhase::Connecting);
        s.on_connected();
        assert_eq!(s.watchdog(), DEFAULT_KEEPALIVE + KEEPALIVE_GRACE);

        let step = s.on_frame(&welcome(20), 0).unwrap();
        assert_eq!(
            step,
            AlertStep::Welcome {
                session_id: "sess-1".into()
            }
        );
        assert_eq!(s.phase(), AlertPhase::Subscribing);
        assert_eq!(s.watchdog(), Duration::from_secs(23));

        s.on_subscribed();
        assert_eq!(s.phase(), AlertPhase::Live);
    }

    #[test]
    fn advertised_keepalive_is_clamped() {
        let mut s = AlertSession::new();
        s.on_connected();
        s.on_frame(&welcome(u64::MAX), 0).unwrap();
        assert_eq!(s.watchdog(), Duration::from_secs(603));

        let mut s = AlertSession::new();
        s.on_connected();
        s.on_frame(&welcome(0), 0).unwrap();
        assert_eq!(s.watchdog(), Duration::from_secs(13));
    }

    #[test]
    fn first_frame_must_be_welcome() {
        let mut s = AlertSession::new();
        s.on_connected();
        let keepalive = json!({ "metadata": { "message_type": "session_keepalive" }, "payload": {} });
        assert!(matches!(
            s.on_frame(&keepalive.to_string(), 0),
            Err(IngestError::Protocol(_))
        ));
        assert_eq!(s.phase(), AlertPhase::AwaitingWelcome);
    }

    #[test]
    fn malformed_frames_are_errors_not_panics() {
        let mut s = live_session();
        assert!(matches!(s.on_frame("{nope", 0), Err(IngestError::Parse(_))));
        assert!(s.on_frame(&notification("channel.raid", json!({"viewers": "many"})), 0).is_err());
        assert_eq!(s.phase(), AlertPhase::Live);
    }

    #[test]
    fn reconnect_request_carries_new_url() {
        let mut s = live_session();
        let frame = json!({
            "metadata": { "message_type": "session_reconnect" },
            "payload": { "session": { "id": "sess-1", "reconnect_url": "wss://elsewhere.test/ws?id=1" } }
        });
        assert_eq!(
            s.on_frame(&frame.to_string(), 0).unwrap(),
            AlertStep::Reconnect {
                url: "wss://elsewhere.test/ws?id=1".into()
            }
        );
        assert_eq!(s.phase(), AlertPhase::ReconnectRequested);

        // The replacement socket starts a fresh session.
        s.on_connected();
        assert_eq!(s.phase(), AlertPhase::AwaitingWelcome);
        assert_eq!(s.watchdog(), DEFAULT_KEEPALIVE + KEEPALIVE_GRACE);
    }

    #[test]
    fn watchdog_and_close_transitions() {
        let mut s = live_session();
        s.on_watchdog_expired();
        assert_eq!(s.phase(), AlertPhase::KeepaliveTimeout);
        s.on_closed();
        assert_eq!(s.phase(), AlertPhase::Closed);
    }

    #[test]
    fn follow_maps_user_and_metadata() {
        let mut s = live_session();
        let ev = event(
            s.on_frame(
                &notification(
                    "channel.follow",
                    json!({ "user_id": "9", "user_login": "ada", "user_name": "Ada" }),
                ),
                0,
            )
            .unwrap(),
        );
        assert_eq!(ev.id(), "n-1");
        assert_eq!(ev.ts(), 1_704_067_201_500);
        assert_eq!(ev.user().display_name, "Ada");
        assert_eq!(ev.user().login.as_deref(), Some("ada"));
        assert!(ev.user().has_role(UserRole::Member));
    }

    #[test]
    fn resub_carries_months_streak_and_sanitized_message() {
        let mut s = live_session();
        let ev = event(
            s.on_frame(
                &notification(
                    "channel.subscription.message",
                    json!({
                        "user_id": "9", "user_login": "ada", "user_name": "Ada",
                        "tier": "2000",
                        "message": { "text": "still\u{200B} here", "emotes": [] },
                        "cumulative_months": 14,
                        "streak_months": null,
                        "duration_months": 1
                    }),
                ),
                0,
            )
            .unwrap(),
        );
        let AppEvent::Sub(sub) = ev else {
            panic!("expected sub")
        };
        assert_eq!(sub.months, 14);
        assert_eq!(sub.streak, None);
        assert_eq!(sub.message.as_deref(), Some("still here"));
        assert!(!sub.is_gift);
    }

    #[test]
    fn raid_uses_raiding_broadcaster() {
        let mut s = live_session();
        let ev = event(
            s.on_frame(
                &notification(
                    "channel.raid",
                    json!({
                        "from_broadcaster_user_id": "1", "from_broadcaster_user_login": "raider", "from_broadcaster_user_name": "Raider",
                        "to_broadcaster_user_id": "2", "to_broadcaster_user_login": "me", "to_broadcaster_user_name": "Me",
                        "viewers": 42
                    }),
                ),
                0,
            )
            .unwrap(),
        );
        let AppEvent::Raid(raid) = ev else {
            panic!("expected raid")
        };
        assert_eq!(raid.user.display_name, "Raider");
        assert_eq!(raid.viewers, 42);
    }

    #[test]
    fn anonymous_cheer_gets_placeholder_user() {
        let mut s = live_session();
        let ev = event(
            s.on_frame(
                &notification(
                    "channel.cheer",
                    json!({ "is_anonymous": true, "user_id": null, "user_login": null, "user_name": null, "bits": 100, "message": "Cheer100 gg" }),
                ),
                0,
            )
            .unwrap(),
        );
        let AppEvent::Cheer(cheer) = ev else {
            panic!("expected cheer")
        };
        assert_eq!(cheer.user.display_name, "Anonymous");
        assert_eq!(cheer.user.login.as_deref(), Some("anonymous"));
        assert_eq!(cheer.bits, 100);
        assert_eq!(cheer.message.as_deref(), Some("Cheer100 gg"));
    }

    #[test]
    fn unknown_categories_are_ignored() {
        let mut s = live_session();
        assert_eq!(
            s.on_frame(&notification("channel.poll.begin", json!({})), 0).unwrap(),
            AlertStep::Notification(None)
        );
    }
}
