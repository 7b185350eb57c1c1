//! Loaders for the third-party badge and emote catalogs.
//!
//! Badges come from IVR (global and per channel), emotes from 7TV (global
//! set plus the channel's active set). A failed request only leaves that
//! catalog empty; chat keeps flowing without the enrichment.

use serde::Deserialize;
use stagehand_state::{BadgeImage, BadgeMap, EmoteMap, Resources};
use stagehand_types::AppConfig;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const IVR_API: &str = "https://api.ivr.fi/v2/twitch";
const SEVENTV_API: &str = "https://api.7tv.app/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel name used by fresh installs; it has no channel catalogs.
const PLACEHOLDER_CHANNEL: &str = "test";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}")]
    Upstream { endpoint: String, status: u16 },
}

#[derive(Debug, Deserialize)]
struct IvrBadgeSet {
    set_id: String,
    #[serde(default)]
    versions: Vec<IvrBadgeVersion>,
}

#[derive(Debug, Deserialize)]
struct IvrBadgeVersion {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    image_url_1x: Option<String>,
    #[serde(default)]
    image_url_2x: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IvrUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmoteSet {
    #[serde(default)]
    emotes: Vec<SevenTvEmote>,
}

#[derive(Debug, Deserialize)]
struct SevenTvUser {
    #[serde(default)]
    emote_set: Option<SevenTvEmoteSet>,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmote {
    name: String,
    #[serde(default)]
    data: Option<SevenTvEmoteData>,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmoteData {
    host: SevenTvHost,
}

#[derive(Debug, Deserialize)]
struct SevenTvHost {
    url: String,
    #[serde(default)]
    files: Vec<SevenTvFile>,
}

#[derive(Debug, Deserialize)]
struct SevenTvFile {
    name: String,
    #[serde(default)]
    format: String,
}

fn badge_map(sets: Vec<IvrBadgeSet>) -> BadgeMap {
    sets.into_iter()
        .map(|set| {
            let versions: HashMap<String, BadgeImage> = set
                .versions
                .into_iter()
                .filter_map(|v| {
                    let url = v
                        .image_url_2x
                        .filter(|u| !u.is_empty())
                        .or(v.image_url_1x)?;
                    Some((v.id, BadgeImage { url, title: v.title }))
                })
                .collect();
            (set.set_id, versions)
        })
        .collect()
}

/// Adds every emote of `emotes` to `map`, preferring the 2x WEBP file.
fn extend_emotes(map: &mut EmoteMap, emotes: Vec<SevenTvEmote>) {
    for emote in emotes {
        let Some(host) = emote.data.map(|d| d.host) else {
            continue;
        };
        let file = host
            .files
            .iter()
            .find(|f| f.format == "WEBP" && f.name == "2x.webp")
            .or_else(|| host.files.iter().find(|f| f.format == "WEBP"))
            .or_else(|| host.files.first());
        let Some(file) = file else {
            continue;
        };
        let base = match host.url.strip_prefix("//") {
            Some(rest) => format!("https://{rest}"),
            None => host.url.clone(),
        };
        map.insert(emote.name, format!("{base}/{}", file.name));
    }
}

/// HTTP client for the badge and emote catalogs.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    ivr_api: String,
    seventv_api: String,
}

impl Default for CatalogClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogClient {
    pub fn new() -> Self {
        Self::with_endpoints(IVR_API, SEVENTV_API)
    }

    /// Client talking to alternative API roots.
    pub fn with_endpoints(ivr_api: impl Into<String>, seventv_api: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("stagehand/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            http,
            ivr_api: ivr_api.into(),
            seventv_api: seventv_api.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, CatalogError> {
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Upstream {
                endpoint: url,
                status: status.as_u16(),
            });
        }
        Ok(resp.json().await?)
    }

    pub async fn global_badges(&self) -> Result<BadgeMap, CatalogError> {
        let sets: Vec<IvrBadgeSet> = self.get_json(format!("{}/badges/global", self.ivr_api)).await?;
        Ok(badge_map(sets))
    }

    pub async fn channel_badges(&self, channel: &str) -> Result<BadgeMap, CatalogError> {
        let sets: Vec<IvrBadgeSet> = self
            .get_json(format!("{}/badges/channel/{channel}", self.ivr_api))
            .await?;
        Ok(badge_map(sets))
    }

    /// Twitch user id of `login`, if the user exists.
    pub async fn twitch_user_id(&self, login: &str) -> Result<Option<String>, CatalogError> {
        let users: Vec<IvrUser> = self
            .get_json(format!("{}/user?login={login}", self.ivr_api))
            .await?;
        Ok(users.into_iter().next().map(|u| u.id))
    }

    pub async fn global_emotes(&self) -> Result<EmoteMap, CatalogError> {
        let set: SevenTvEmoteSet = self
            .get_json(format!("{}/emote-sets/global", self.seventv_api))
            .await?;
        let mut map = EmoteMap::new();
        extend_emotes(&mut map, set.emotes);
        Ok(map)
    }

    /// Emotes of the 7TV set linked to a Twitch user id.
    pub async fn channel_emotes(&self, twitch_user_id: &str) -> Result<EmoteMap, CatalogError> {
        let user: SevenTvUser = self
            .get_json(format!("{}/users/twitch/{twitch_user_id}", self.seventv_api))
            .await?;
        let mut map = EmoteMap::new();
        match user.emote_set {
            Some(set) => extend_emotes(&mut map, set.emotes),
            None => tracing::warn!(twitch_user_id, "no 7TV emote set for user"),
        }
        Ok(map)
    }

    /// Loads every catalog relevant to `config`. Individual failures are
    /// logged and leave that catalog empty.
    pub async fn load(&self, config: &AppConfig) -> Resources {
        let channel = config.channel.trim().to_lowercase();
        let has_channel = !channel.is_empty() && channel != PLACEHOLDER_CHANNEL;

        let global_badges = self.global_badges().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load global badges");
            BadgeMap::new()
        });
        let channel_badges = if has_channel {
            self.channel_badges(&channel).await.unwrap_or_else(|e| {
                tracing::warn!(channel = %channel, error = %e, "failed to load channel badges");
                BadgeMap::new()
            })
        } else {
            BadgeMap::new()
        };

        let mut emotes = self.global_emotes().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load global emotes");
            EmoteMap::new()
        });
        let twitch_user_id = match &config.seventv_user_id {
            Some(id) => Some(id.clone()),
            None if has_channel => self.twitch_user_id(&channel).await.unwrap_or_else(|e| {
                tracing::warn!(channel = %channel, error = %e, "failed to look up channel id");
                None
            }),
            None => None,
        };
        if let Some(id) = twitch_user_id {
            match self.channel_emotes(&id).await {
                Ok(channel_emotes) => emotes.extend(channel_emotes),
                Err(e) => tracing::warn!(twitch_user_id = %id, error = %e, "failed to load channel emotes"),
            }
        }

        tracing::info!(
            channel = %channel,
            emotes = emotes.len(),
            global_badge_sets = global_badges.len(),
            channel_badge_sets = channel_badges.len(),
            "loaded chat catalogs"
        );
        Resources {
            emotes,
            global_badges,
            channel_badges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn badge_urls_prefer_2x_and_skip_imageless_versions() {
        let sets: Vec<IvrBadgeSet> = serde_json::from_value(json!([
            {
                "set_id": "subscriber",
                "versions": [
                    { "id": "0", "title": "Sub", "image_url_1x": "u1", "image_url_2x": "u2" },
                    { "id": "3", "title": "Sub 3", "image_url_1x": "only1" },
                    { "id": "6", "title": "Broken" }
                ]
            }
        ]))
        .unwrap();
        let map = badge_map(sets);
        let sub = &map["subscriber"];
        assert_eq!(sub["0"].url, "u2");
        assert_eq!(sub["3"].url, "only1");
        assert!(!sub.contains_key("6"));
    }

    #[test]
    fn emote_file_choice_prefers_2x_webp() {
        let set: SevenTvEmoteSet = serde_json::from_value(json!({
            "emotes": [
                { "name": "A", "data": { "host": { "url": "//cdn.test/a", "files": [
                    { "name": "1x.avif", "format": "AVIF" },
                    { "name": "1x.webp", "format": "WEBP" },
                    { "name": "2x.webp", "format": "WEBP" }
                ] } } },
                { "name": "B", "data": { "host": { "url": "https://cdn.test/b", "files": [
                    { "name": "1x.avif", "format": "AVIF" },
                    { "name": "4x.webp", "format": "WEBP" }
                ] } } },
                { "name": "C", "data": { "host": { "url": "//cdn.test/c", "files": [
                    { "name": "1x.gif", "format": "GIF" }
                ] } } },
                { "name": "D", "data": { "host": { "url": "//cdn.test/d", "files": [] } } },
                { "name": "E" }
            ]
        }))
        .unwrap();

        let mut map = EmoteMap::new();
        extend_emotes(&mut map, set.emotes);
        assert_eq!(map["A"], "https://cdn.test/a/2x.webp");
        assert_eq!(map["B"], "https://cdn.test/b/4x.webp");
        assert_eq!(map["C"], "https://cdn.test/c/1x.gif");
        assert!(!map.contains_key("D"));
        assert!(!map.contains_key("E"));
    }

    #[test]
    fn user_without_emote_set_decodes() {
        let user: SevenTvUser = serde_json::from_value(json!({ "id": "x", "username": "y" })).unwrap();
        assert!(user.emote_set.is_none());
    }
}
