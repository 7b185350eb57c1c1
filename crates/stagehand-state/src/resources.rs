//! Third-party emote and badge catalogs used to enrich chat events.

use stagehand_types::UserBadge;
use std::collections::HashMap;

/// Image and title of one badge version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeImage {
    pub url: String,
    pub title: String,
}

/// Badge set id -> version -> image.
pub type BadgeMap = HashMap<String, HashMap<String, BadgeImage>>;

/// Emote name -> image URL.
pub type EmoteMap = HashMap<String, String>;

/// Loaded resource catalogs. Empty until the first reload completes.
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub emotes: EmoteMap,
    pub global_badges: BadgeMap,
    pub channel_badges: BadgeMap,
}

impl Resources {
    /// Resolves a raw badge tag (`set/version,set/version`).
    ///
    /// Channel badges take precedence over global ones; pairs found in
    /// neither catalog are dropped.
    pub fn resolve_badges(&self, raw: &str) -> Vec<UserBadge> {
        raw.split(',')
            .filter_map(|pair| {
                let (set_id, version) = pair.split_once('/')?;
                if set_id.is_empty() || version.is_empty() {
                    return None;
                }
                let image = lookup(&self.channel_badges, set_id, version)
                    .or_else(|| lookup(&self.global_badges, set_id, version))?;
                Some(UserBadge {
                    set_id: set_id.to_string(),
                    version: version.to_string(),
                    url: image.url.clone(),
                    title: image.title.clone(),
                })
            })
            .collect()
    }

    /// URL of the emote named exactly `token`.
    pub fn emote_url(&self, token: &str) -> Option<&str> {
        self.emotes.get(token).map(String::as_str)
    }
}

fn lookup<'a>(map: &'a BadgeMap, set_id: &str, version: &str) -> Option<&'a BadgeImage> {
    map.get(set_id)?.get(version)
}

/// Ticket for an in-flight resource reload. Only the newest ticket may
/// install its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadTicket(u64);

#[derive(Debug, Default)]
pub(crate) struct ReloadGate {
    issued: u64,
}

impl ReloadGate {
    pub(crate) fn begin(&mut self) -> ReloadTicket {
        self.issued += 1;
        ReloadTicket(self.issued)
    }

    pub(crate) fn is_current(&self, ticket: ReloadTicket) -> bool {
        ticket.0 == self.issued
    }
}
