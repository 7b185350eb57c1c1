//! Unit tests for the state store.

use crate::*;
use stagehand_types::{
    AppConfig, AppEvent, ChatMessageEvent, ChatUser, EvaluatedEvent, Layer, Layout, Locales,
    MessagePart, Platform, PresentationPayload, Ruleset, ThemeState, UserRole,
};
use std::collections::HashMap;

fn state_with_max(max_messages: usize) -> State {
    let config = AppConfig {
        max_messages,
        ..AppConfig::default()
    };
    State::new(config, Ruleset::default(), ThemeState::default(), Locales::default())
}

fn chat(id: &str, login: &str) -> EvaluatedEvent {
    EvaluatedEvent {
        event: AppEvent::ChatMessage(ChatMessageEvent {
            id: id.into(),
            ts: 0,
            platform: Platform::Twitch,
            channel_name: None,
            user: ChatUser::new(login, Some(login.into()), None, [UserRole::Member]),
            text: "hi".into(),
            parts: vec![MessagePart::text("hi")],
            provider: None,
        }),
        actions: Vec::new(),
        presentation: PresentationPayload {
            layout: Layout::Chat,
            style: None,
            layers: vec![Layer::new("message", vec![MessagePart::text("hi")])],
        },
        deleted: false,
    }
}

fn image(url: &str) -> BadgeImage {
    BadgeImage {
        url: url.into(),
        title: url.into(),
    }
}

fn badge_map(entries: &[(&str, &str, &str)]) -> BadgeMap {
    let mut map = BadgeMap::new();
    for (set, version, url) in entries {
        map.entry(set.to_string())
            .or_insert_with(HashMap::new)
            .insert(version.to_string(), image(url));
    }
    map
}

// ── event log ────────────────────────────────────────────────────────

#[test]
fn log_never_exceeds_max_messages() {
    let mut state = state_with_max(3);
    for i in 0..10 {
        state.append_event(chat(&format!("m{i}"), "ada"));
        assert!(state.event_log().len() <= 3);
    }
    let seqs: Vec<u64> = state.event_log().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![8, 9, 10]);
    assert_eq!(state.event_sequence(), 10);
}

#[test]
fn shrinking_max_messages_evicts_oldest() {
    let mut state = state_with_max(5);
    for i in 0..5 {
        state.append_event(chat(&format!("m{i}"), "ada"));
    }
    let config = AppConfig {
        max_messages: 2,
        ..state.config().clone()
    };
    state.set_config(config);
    assert_eq!(state.event_log().len(), 5, "shrink waits for settlement");

    state.settle_log_bound();
    let ids: Vec<&str> = state
        .event_log()
        .iter()
        .map(|e| e.payload.event.id())
        .collect();
    assert_eq!(ids, vec!["m3", "m4"]);
}

#[test]
fn growing_max_messages_applies_at_once() {
    let mut state = state_with_max(2);
    let config = AppConfig {
        max_messages: 4,
        ..state.config().clone()
    };
    state.set_config(config);
    for i in 0..4 {
        state.append_event(chat(&format!("m{i}"), "ada"));
    }
    assert_eq!(state.event_log().len(), 4);
}

#[test]
fn timeouts_select_chat_by_login() {
    let mut state = state_with_max(10);
    state.append_event(chat("a1", "ada"));
    state.append_event(chat("b1", "bob"));
    state.append_event(chat("a2", "Ada"));
    let hits: Vec<String> = state
        .event_log_mut()
        .chat_from_login_mut("ada")
        .map(|e| e.payload.event.id().to_string())
        .collect();
    assert_eq!(hits, vec!["a1", "a2"]);
    assert!(state.event_log_mut().find_mut("b1").is_some());
    assert!(state.event_log_mut().find_mut("zz").is_none());
}

// ── resources ────────────────────────────────────────────────────────

#[test]
fn channel_badges_override_global_and_unknown_are_dropped() {
    let resources = Resources {
        emotes: EmoteMap::new(),
        global_badges: badge_map(&[("A", "v1", "g")]),
        channel_badges: badge_map(&[("A", "v1", "c")]),
    };
    let badges = resources.resolve_badges("A/v1,A/v2");
    assert_eq!(badges.len(), 1);
    assert_eq!(badges[0].set_id, "A");
    assert_eq!(badges[0].version, "v1");
    assert_eq!(badges[0].url, "c");
}

#[test]
fn global_badges_fill_in_when_channel_lacks_version() {
    let resources = Resources {
        global_badges: badge_map(&[("moderator", "1", "g-mod")]),
        ..Resources::default()
    };
    let badges = resources.resolve_badges("moderator/1,broken,/1,x/");
    assert_eq!(badges.len(), 1);
    assert_eq!(badges[0].url, "g-mod");
}

#[test]
fn only_latest_resource_reload_installs() {
    let mut state = state_with_max(10);
    let first = state.begin_resource_reload();
    let second = state.begin_resource_reload();

    let mut newer = Resources::default();
    newer.emotes.insert("Kappa".into(), "https://cdn.test/kappa".into());
    assert!(state.finish_resource_reload(second, newer));

    let mut stale = Resources::default();
    stale.emotes.insert("Stale".into(), "https://cdn.test/stale".into());
    assert!(!state.finish_resource_reload(first, stale));

    assert_eq!(state.resources().emote_url("Kappa"), Some("https://cdn.test/kappa"));
    assert_eq!(state.resources().emote_url("Stale"), None);
}

// ── lanes ────────────────────────────────────────────────────────────

#[test]
fn revisions_start_at_zero_and_advance_on_commit() {
    let mut state = state_with_max(10);
    assert_eq!(state.revision(Lane::Rules), 0);
    let token = state.lanes_mut().issue(Lane::Rules);
    state.set_ruleset(Ruleset::builtin());
    assert_eq!(state.lanes_mut().commit(token), Some(1));
    assert_eq!(state.revision(Lane::Rules), 1);
    assert_eq!(state.ruleset(), &Ruleset::builtin());
}
