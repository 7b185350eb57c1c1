//! Unit tests for rule compilation and evaluation.

use crate::CompiledEngine;
use stagehand_types::{
    AppEvent, ChatMessageEvent, ChatUser, EventKind, FollowEvent, MessagePart, Platform,
    RenderAction, Rule, RuleMatch, Ruleset, UserRole,
};

fn chat(text: &str, roles: &[UserRole]) -> AppEvent {
    AppEvent::ChatMessage(ChatMessageEvent {
        id: format!("id-{text}"),
        ts: 0,
        platform: Platform::Twitch,
        channel_name: None,
        user: ChatUser::new("Viewer", Some("viewer".into()), None, roles.iter().copied()),
        text: text.to_string(),
        parts: vec![MessagePart::text(text)],
        provider: None,
    })
}

fn follow() -> AppEvent {
    AppEvent::Follow(FollowEvent {
        id: "f1".into(),
        ts: 0,
        user: ChatUser::new("Fan", Some("fan".into()), None, [UserRole::Member]),
    })
}

fn class(value: &str) -> RenderAction {
    RenderAction::AddClass {
        value: value.into(),
    }
}

fn rule(id: &str, m: RuleMatch, actions: Vec<RenderAction>) -> Rule {
    Rule {
        id: id.into(),
        enabled: true,
        match_: m,
        actions,
        cooldown_ms: None,
    }
}

fn chat_match() -> RuleMatch {
    RuleMatch::for_kind(EventKind::ChatMessage)
}

fn engine(rules: Vec<Rule>) -> CompiledEngine {
    CompiledEngine::compile(&Ruleset { version: 1, rules })
}

// ── matching ─────────────────────────────────────────────────────────

#[test]
fn substring_match_is_case_insensitive() {
    let mut e = engine(vec![rule(
        "hello",
        RuleMatch {
            text_includes: Some("HeLLo".into()),
            ..chat_match()
        },
        vec![class("greet")],
    )]);
    assert_eq!(e.evaluate(&chat("well hello there", &[]), 0), vec![class("greet")]);
    assert!(e.evaluate(&chat("goodbye", &[]), 0).is_empty());
}

#[test]
fn conditions_are_combined_with_and() {
    let mut e = engine(vec![rule(
        "mod-links",
        RuleMatch {
            user_has_role: Some(UserRole::Mod),
            text_regex: Some(r"https?://".into()),
            ..chat_match()
        },
        vec![class("mod-link")],
    )]);
    assert!(e.evaluate(&chat("see https://x.test", &[]), 0).is_empty());
    assert!(e.evaluate(&chat("no link", &[UserRole::Mod]), 0).is_empty());
    assert_eq!(
        e.evaluate(&chat("see https://x.test", &[UserRole::Mod]), 0),
        vec![class("mod-link")]
    );
}

#[test]
fn match_all_short_circuits_other_conditions() {
    let mut e = engine(vec![rule(
        "everything",
        RuleMatch {
            match_all: Some(true),
            user_has_role: Some(UserRole::Broadcaster),
            ..chat_match()
        },
        vec![class("all")],
    )]);
    assert_eq!(e.evaluate(&chat("anything", &[]), 0), vec![class("all")]);
}

#[test]
fn kind_restriction_is_respected() {
    let mut e = engine(vec![rule(
        "chat-only",
        RuleMatch {
            match_all: Some(true),
            ..chat_match()
        },
        vec![class("chat")],
    )]);
    assert!(e.evaluate(&follow(), 0).is_empty());

    let mut e = engine(vec![rule(
        "follows",
        RuleMatch {
            match_all: Some(true),
            ..RuleMatch::for_kind(EventKind::Follow)
        },
        vec![class("follow")],
    )]);
    assert_eq!(e.evaluate(&follow(), 0), vec![class("follow")]);
}

#[test]
fn actions_accumulate_across_rules_in_order() {
    let any = RuleMatch {
        match_all: Some(true),
        ..chat_match()
    };
    let mut disabled = rule("off", any.clone(), vec![class("never")]);
    disabled.enabled = false;

    let mut e = engine(vec![
        rule("first", any.clone(), vec![class("a"), RenderAction::MaskUrl]),
        disabled,
        rule("second", any, vec![class("b")]),
    ]);
    assert_eq!(
        e.evaluate(&chat("x", &[]), 0),
        vec![class("a"), RenderAction::MaskUrl, class("b")]
    );
}

// ── invalid patterns ─────────────────────────────────────────────────

#[test]
fn invalid_regex_never_throws_and_never_matches() {
    let mut e = engine(vec![
        rule(
            "broken",
            RuleMatch {
                text_regex: Some("(".into()),
                ..chat_match()
            },
            vec![class("broken")],
        ),
        rule(
            "fine",
            RuleMatch {
                text_includes: Some("(".into()),
                ..chat_match()
            },
            vec![class("fine")],
        ),
    ]);
    assert_eq!(e.inert_rules().collect::<Vec<_>>(), vec!["broken"]);
    for text in ["(", "", "anything at all", "((("] {
        let actions = e.evaluate(&chat(text, &[UserRole::Broadcaster]), 0);
        assert!(!actions.contains(&class("broken")), "inert rule fired for {text:?}");
    }
    assert_eq!(e.evaluate(&chat("a ( b", &[]), 0), vec![class("fine")]);
}

#[test]
fn regex_is_case_insensitive() {
    let mut e = engine(vec![rule(
        "caps",
        RuleMatch {
            text_regex: Some("^gg$".into()),
            ..chat_match()
        },
        vec![class("gg")],
    )]);
    assert_eq!(e.evaluate(&chat("GG", &[]), 0), vec![class("gg")]);
}

// ── cooldowns ────────────────────────────────────────────────────────

fn cooled_engine(cooldown: u64) -> CompiledEngine {
    let mut r = rule(
        "cool",
        RuleMatch {
            match_all: Some(true),
            ..chat_match()
        },
        vec![class("cool")],
    );
    r.cooldown_ms = Some(cooldown);
    engine(vec![r])
}

#[test]
fn cooldown_blocks_refire_until_elapsed() {
    let c = 1_000;
    for (delta, expect_fire) in [(0, false), (1, false), (999, false), (1_000, true), (5_000, true)] {
        let mut e = cooled_engine(c);
        let t = 10_000;
        assert_eq!(e.evaluate(&chat("x", &[]), t).len(), 1, "first event always fires");
        let fired = !e.evaluate(&chat("x", &[]), t + delta).is_empty();
        assert_eq!(fired, expect_fire, "delta = {delta}");
    }
}

#[test]
fn blocked_evaluations_do_not_extend_cooldown() {
    let mut e = cooled_engine(1_000);
    assert!(!e.evaluate(&chat("x", &[]), 0).is_empty());
    assert!(e.evaluate(&chat("x", &[]), 500).is_empty());
    assert!(!e.evaluate(&chat("x", &[]), 1_000).is_empty());
}

#[test]
fn recompiling_discards_cooldowns() {
    let mut e = cooled_engine(60_000);
    assert!(!e.evaluate(&chat("x", &[]), 0).is_empty());
    assert!(e.evaluate(&chat("x", &[]), 1).is_empty());

    let mut fresh = cooled_engine(60_000);
    assert!(!fresh.evaluate(&chat("x", &[]), 1).is_empty());
}

#[test]
fn zero_cooldown_always_fires() {
    let mut e = cooled_engine(0);
    assert!(!e.evaluate(&chat("x", &[]), 0).is_empty());
    assert!(!e.evaluate(&chat("x", &[]), 0).is_empty());
}

#[test]
fn ruleset_from_wire_compiles() {
    let rs: Ruleset = serde_json::from_value(serde_json::json!({
        "version": 1,
        "rules": [{
            "id": "subs",
            "match": { "kind": "chat.message", "userHasRole": "sub" },
            "actions": [{ "type": "setVar", "name": "--accent", "value": "gold" }]
        }]
    }))
    .unwrap();
    let mut e = CompiledEngine::compile(&rs);
    assert_eq!(e.len(), 1);
    assert_eq!(
        e.evaluate(&chat("hi", &[UserRole::Sub]), 0),
        vec![RenderAction::SetVar {
            name: "--accent".into(),
            value: "gold".into()
        }]
    );
}
