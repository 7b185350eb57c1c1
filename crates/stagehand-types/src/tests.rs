//! Wire-shape tests for the event model.

use crate::event::*;
use serde_json::json;

fn chatter() -> ChatUser {
    ChatUser::new(
        "Ada",
        Some("ada".into()),
        Some("42".into()),
        [UserRole::Mod, UserRole::Member, UserRole::Mod],
    )
}

#[test]
fn roles_collapse_duplicates() {
    let user = chatter();
    assert_eq!(user.roles.len(), 2);
    assert!(user.has_role(UserRole::Mod));

    let decoded: ChatUser = serde_json::from_value(json!({
        "displayName": "Bob",
        "roles": ["vip", "vip", "sub"]
    }))
    .unwrap();
    assert_eq!(decoded.roles.len(), 2);
    assert_eq!(decoded.platform, Platform::Twitch);
}

#[test]
fn chat_message_is_tagged_by_kind() {
    let ev = AppEvent::ChatMessage(ChatMessageEvent {
        id: "m1".into(),
        ts: 1_700_000_000_000,
        platform: Platform::Twitch,
        channel_name: Some("chan".into()),
        user: chatter(),
        text: "hi Kappa".into(),
        parts: vec![
            MessagePart::text("hi "),
            MessagePart::Emote {
                id: "25".into(),
                name: "Kappa".into(),
                url: None,
            },
        ],
        provider: Some(ProviderMetadata::ChatRelay {
            badges: Some("moderator/1".into()),
            is_action: false,
            color: None,
        }),
    });

    let value = serde_json::to_value(&ev).unwrap();
    assert_eq!(value["kind"], "chat.message");
    assert_eq!(value["user"]["displayName"], "Ada");
    assert_eq!(value["parts"][1]["type"], "emote");
    assert_eq!(value["provider"]["source"], "chatRelay");
    assert_eq!(value["provider"]["badges"], "moderator/1");

    let back: AppEvent = serde_json::from_value(value).unwrap();
    assert_eq!(back, ev);
    assert_eq!(back.kind(), EventKind::ChatMessage);
    assert_eq!(back.text(), Some("hi Kappa"));
}

#[test]
fn alert_variants_expose_common_fields() {
    let ev = AppEvent::Raid(RaidEvent {
        id: "r1".into(),
        ts: 5,
        user: ChatUser::new("Raider", Some("raider".into()), None, [UserRole::Member]),
        viewers: 12,
    });
    assert_eq!(ev.kind().as_str(), "platform.raid");
    assert_eq!(ev.id(), "r1");
    assert_eq!(ev.ts(), 5);
    assert_eq!(ev.text(), None);
    assert_eq!(serde_json::to_value(&ev).unwrap()["kind"], "platform.raid");
}

#[test]
fn event_kind_parses_from_wire_names() {
    assert_eq!("platform.cheer".parse::<EventKind>().unwrap(), EventKind::Cheer);
    assert!("twitch.cheer".parse::<EventKind>().is_err());
}

#[test]
fn sub_tier_label_maps_codes() {
    let sub = SubEvent {
        id: "s".into(),
        ts: 0,
        user: chatter(),
        tier: "2000".into(),
        is_gift: false,
        months: 3,
        streak: None,
        message: None,
    };
    assert_eq!(sub.tier_label(), "2");
}
