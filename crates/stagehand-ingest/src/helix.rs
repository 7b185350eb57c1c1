//! Helix and OAuth calls needed by the alerting adapter.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

const HELIX_API: &str = "https://api.twitch.tv/helix";
const OAUTH_API: &str = "https://id.twitch.tv/oauth2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity behind an OAuth token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenIdentity {
    pub client_id: String,
    pub login: String,
    pub user_id: String,
}

/// Removes the `oauth:` prefix chat tokens are commonly stored with.
pub fn bare_token(token: &str) -> &str {
    token.strip_prefix("oauth:").unwrap_or(token)
}

/// One EventSub subscription request, minus the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: &'static str,
    pub condition: BTreeMap<&'static str, String>,
}

impl SubscriptionRequest {
    fn new(kind: &'static str, version: &'static str, condition: &[(&'static str, &str)]) -> Self {
        Self {
            kind,
            version,
            condition: condition
                .iter()
                .map(|(k, v)| (*k, v.to_string()))
                .collect(),
        }
    }
}

/// The alert categories the overlay cares about, scoped to `broadcaster_id`.
pub fn alert_subscriptions(broadcaster_id: &str) -> Vec<SubscriptionRequest> {
    vec![
        SubscriptionRequest::new(
            "channel.follow",
            "2",
            &[
                ("broadcaster_user_id", broadcaster_id),
                ("moderator_user_id", broadcaster_id),
            ],
        ),
        SubscriptionRequest::new("channel.subscribe", "1", &[("broadcaster_user_id", broadcaster_id)]),
        SubscriptionRequest::new(
            "channel.subscription.message",
            "1",
            &[("broadcaster_user_id", broadcaster_id)],
        ),
        SubscriptionRequest::new("channel.raid", "1", &[("to_broadcaster_user_id", broadcaster_id)]),
        SubscriptionRequest::new("channel.cheer", "1", &[("broadcaster_user_id", broadcaster_id)]),
    ]
}

/// Thin Helix client.
#[derive(Debug, Clone)]
pub struct HelixClient {
    http: reqwest::Client,
}

impl Default for HelixClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HelixClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("stagehand/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Validates `token` and returns who it belongs to.
    ///
    /// # Errors
    ///
    /// `IngestError::Auth` if the token is rejected (401), otherwise
    /// `IngestError::Upstream` / `IngestError::Http`.
    pub async fn validate_token(&self, token: &str) -> Result<TokenIdentity, IngestError> {
        let resp = self
            .http
            .get(format!("{OAUTH_API}/validate"))
            .header("Authorization", format!("OAuth {}", bare_token(token)))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IngestError::Auth("token validation returned 401".into()));
        }
        if !status.is_success() {
            return Err(IngestError::Upstream {
                endpoint: "oauth2/validate",
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Creates one EventSub subscription bound to a WebSocket session.
    pub async fn create_subscription(
        &self,
        token: &str,
        identity: &TokenIdentity,
        session_id: &str,
        request: &SubscriptionRequest,
    ) -> Result<(), IngestError> {
        let body = json!({
            "type": request.kind,
            "version": request.version,
            "condition": request.condition,
            "transport": { "method": "websocket", "session_id": session_id },
        });

        let resp = self
            .http
            .post(format!("{HELIX_API}/eventsub/subscriptions"))
            .header("Client-ID", &identity.client_id)
            .bearer_auth(bare_token(token))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IngestError::Auth(format!("{} subscription returned 401", request.kind)));
        }
        if !status.is_success() {
            return Err(IngestError::Upstream {
                endpoint: "eventsub/subscriptions",
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Registers every alert subscription for `session_id`.
    ///
    /// Individual failures are logged and counted; partial registration is
    /// acceptable. Returns the number of subscriptions created.
    pub async fn subscribe_alerts(
        &self,
        token: &str,
        identity: &TokenIdentity,
        session_id: &str,
    ) -> usize {
        let mut created = 0;
        for request in alert_subscriptions(&identity.user_id) {
            match self
                .create_subscription(token, identity, session_id, &request)
                .await
            {
                Ok(()) => created += 1,
                Err(e) => tracing::warn!(kind = request.kind, error = %e, "alert subscription failed"),
            }
        }
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_prefix_is_stripped() {
        assert_eq!(bare_token("oauth:abc"), "abc");
        assert_eq!(bare_token("abc"), "abc");
    }

    #[test]
    fn five_alert_categories_are_requested() {
        let subs = alert_subscriptions("123");
        let kinds: Vec<&str> = subs.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                "channel.follow",
                "channel.subscribe",
                "channel.subscription.message",
                "channel.raid",
                "channel.cheer"
            ]
        );
        assert_eq!(subs[0].version, "2");
        assert_eq!(subs[0].condition["moderator_user_id"], "123");
        assert_eq!(subs[3].condition["to_broadcaster_user_id"], "123");
    }

    #[test]
    fn subscription_request_serializes_type_field() {
        let value = serde_json::to_value(&alert_subscriptions("1")[1]).unwrap();
        assert_eq!(value["type"], "channel.subscribe");
        assert_eq!(value["condition"]["broadcaster_user_id"], "1");
    }
}
