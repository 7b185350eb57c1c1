//! Turns normalized events into presentation-ready [`EvaluatedEvent`]s.
//!
//! Chat messages are enriched (badges, emotes, links) and run through the
//! rules engine; alerts go straight to presentation. Nothing here touches a
//! socket: the hub calls these functions while it holds the state lock.

use stagehand_state::{Resources, State};
use stagehand_types::{
    is_blocked, render_template, AppEvent, ChatMessageEvent, EvaluatedEvent, Layer, Layout,
    Locales, MessagePart, PresentationPayload, ProviderMetadata, RenderAction, ThemeState,
};

/// Locale key of the body shown in place of a deleted message.
pub const DELETED_KEY: &str = "chat.deleted";

/// Evaluates `event` against the current state at time `now` (epoch ms).
///
/// Advances rule cooldowns as a side effect.
pub fn evaluate(state: &mut State, event: AppEvent, now: i64) -> EvaluatedEvent {
    match event {
        AppEvent::ChatMessage(chat) => evaluate_chat(state, chat, now),
        other => {
            let presentation = alert_presentation(&other, state.locales());
            EvaluatedEvent {
                event: other,
                actions: Vec::new(),
                presentation,
                deleted: false,
            }
        }
    }
}

fn evaluate_chat(state: &mut State, mut chat: ChatMessageEvent, now: i64) -> EvaluatedEvent {
    if let Some(ProviderMetadata::ChatRelay {
        badges: Some(raw), ..
    }) = &chat.provider
    {
        chat.user.badges = state.resources().resolve_badges(raw);
    }

    let actions = if is_blocked(&chat.text, &state.config().blocklist) {
        tracing::debug!(id = %chat.id, "message matched blocklist");
        vec![RenderAction::Suppress]
    } else {
        let event = AppEvent::ChatMessage(chat.clone());
        state.engine_mut().evaluate(&event, now)
    };

    if !chat.parts.is_empty() {
        let masked = actions.contains(&RenderAction::MaskUrl);
        let parts = enrich_parts(std::mem::take(&mut chat.parts), state.resources());
        chat.parts = if masked {
            mask_links(parts, state.theme().link_placeholder())
        } else {
            parts
        };
    }

    let presentation = chat_presentation(&chat, state.theme());
    EvaluatedEvent {
        event: AppEvent::ChatMessage(chat),
        actions,
        presentation,
        deleted: false,
    }
}

/// Substitutes emote names, then splits out links, inside every text part.
pub fn enrich_parts(parts: Vec<MessagePart>, resources: &Resources) -> Vec<MessagePart> {
    parts
        .into_iter()
        .flat_map(|part| match part {
            MessagePart::Text { content } => split_text(&content, resources),
            other => vec![other],
        })
        .collect()
}

/// Replaces link parts with text parts showing `placeholder`.
pub fn mask_links(parts: Vec<MessagePart>, placeholder: &str) -> Vec<MessagePart> {
    parts
        .into_iter()
        .map(|part| match part {
            MessagePart::Link { .. } => MessagePart::text(placeholder),
            other => other,
        })
        .collect()
}

fn split_text(content: &str, resources: &Resources) -> Vec<MessagePart> {
    let mut parts = Vec::new();
    let mut pending = String::new();

    for token in whitespace_tokens(content) {
        let special = if token.starts_with(char::is_whitespace) {
            None
        } else if let Some(url) = resources.emote_url(token) {
            Some(MessagePart::Emote {
                id: format!("7tv-{token}"),
                name: token.to_string(),
                url: Some(url.to_string()),
            })
        } else {
            link_for(token)
        };

        match special {
            Some(part) => {
                if !pending.is_empty() {
                    parts.push(MessagePart::text(std::mem::take(&mut pending)));
                }
                parts.push(part);
            }
            None => pending.push_str(token),
        }
    }
    if !pending.is_empty() {
        parts.push(MessagePart::text(pending));
    }
    parts
}

fn link_for(token: &str) -> Option<MessagePart> {
    let lower = token.to_ascii_lowercase();
    let url = if lower.starts_with("http://") || lower.starts_with("https://") {
        token.to_string()
    } else if lower.starts_with("www.") {
        format!("https://{token}")
    } else {
        return None;
    };
    Some(MessagePart::Link {
        url,
        text: token.to_string(),
    })
}

/// Splits `s` into alternating runs of whitespace and non-whitespace.
fn whitespace_tokens(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let ws = first.is_whitespace();
        let end = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace() != ws)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (token, tail) = rest.split_at(end);
        rest = tail;
        Some(token)
    })
}

fn chat_presentation(chat: &ChatMessageEvent, theme: &ThemeState) -> PresentationPayload {
    let mut layers = Vec::with_capacity(2);
    if theme.flag("showNames", true) {
        layers.push(Layer::new(
            "name",
            vec![MessagePart::text(chat.user.display_name.clone())],
        ));
    }
    let body = if chat.parts.is_empty() {
        vec![MessagePart::text(chat.text.clone())]
    } else {
        chat.parts.clone()
    };
    layers.push(Layer::new("message", body));

    let is_action = matches!(
        chat.provider,
        Some(ProviderMetadata::ChatRelay {
            is_action: true,
            ..
        })
    );
    PresentationPayload {
        layout: Layout::Chat,
        style: is_action.then(|| "action".to_string()),
        layers,
    }
}

fn alert_presentation(event: &AppEvent, locales: &Locales) -> PresentationPayload {
    let name = event.user().display_name.clone();
    let (style, title, message) = match event {
        AppEvent::Follow(_) => (
            "follow",
            render_template(locales.get("alert.follow"), &[("name", name)], None),
            None,
        ),
        AppEvent::Sub(sub) => {
            let key = if sub.is_gift { "alert.sub.gift" } else { "alert.sub" };
            let vars = [
                ("name", name),
                ("tier", sub.tier_label().to_string()),
                ("months", sub.months.to_string()),
            ];
            (
                "sub",
                render_template(locales.get(key), &vars, Some(u64::from(sub.months))),
                sub.message.clone(),
            )
        }
        AppEvent::Raid(raid) => (
            "raid",
            render_template(
                locales.get("alert.raid"),
                &[("name", name), ("viewers", raid.viewers.to_string())],
                Some(raid.viewers),
            ),
            None,
        ),
        AppEvent::Cheer(cheer) => (
            "cheer",
            render_template(
                locales.get("alert.cheer"),
                &[("name", name), ("bits", cheer.bits.to_string())],
                Some(cheer.bits),
            ),
            cheer.message.clone(),
        ),
        AppEvent::ChatMessage(chat) => ("chat", chat.text.clone(), None),
    };

    let mut layers = vec![Layer::new("title", vec![MessagePart::text(title)])];
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        layers.push(Layer::new("message", vec![MessagePart::text(message)]));
    }
    PresentationPayload {
        layout: Layout::Alert,
        style: Some(style.to_string()),
        layers,
    }
}

/// Marks a logged event as deleted and replaces its message body with
/// `body`. Returns `false` if it was already deleted.
pub fn mark_deleted(payload: &mut EvaluatedEvent, body: &str) -> bool {
    if payload.deleted {
        return false;
    }
    payload.deleted = true;
    let parts = vec![MessagePart::text(body)];
    let layers = &mut payload.presentation.layers;
    match layers.iter_mut().find(|l| l.name == "message") {
        Some(layer) => layer.parts = parts,
        None => layers.push(Layer::new("message", parts)),
    }
    true
}
