//! HTTP handlers for the Stagehand server.

use crate::hub::{now_ms, StateView};
use crate::themes::{ThemeError, ThemePackage};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Json, Path},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use stagehand_state::LoggedEvent;
use stagehand_types::{
    new_event_id, AppEvent, ChatMessageEvent, ChatUser, CheerEvent, EventKind, FollowEvent,
    MessagePart, Platform, RaidEvent, SubEvent, UserRole,
};
use std::sync::Arc;
use thiserror::Error;

const FAKE_TEXT: &str = "simulation test";

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<ThemeError> for ApiError {
    fn from(e: ThemeError) -> Self {
        match e {
            ThemeError::NotFound(_) | ThemeError::InvalidId(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

/// Handler for `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handler for `GET /api/state`.
pub async fn get_state_handler(Extension(state): Extension<Arc<AppState>>) -> Json<StateView> {
    Json(state.hub.view().await)
}

/// Handler for `GET /api/themes`.
pub async fn list_themes_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.hub.themes().list().await?))
}

/// Handler for `GET /api/themes/{id}`.
pub async fn get_theme_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ThemePackage>, ApiError> {
    Ok(Json(state.hub.themes().load(&id).await?))
}

/// Request body for `POST /api/dev/fake`. Every field is optional and an
/// empty body is accepted.
#[derive(Debug, Default, Deserialize)]
pub struct FakeEventRequest {
    pub kind: Option<String>,
    pub text: Option<String>,
}

/// Handler for `POST /api/dev/fake`.
///
/// Synthesizes an event, runs it through the processor and broadcasts it
/// like an upstream event. Requires `Authorization: Bearer <apiKey>` when an
/// API key is configured.
pub async fn fake_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LoggedEvent>, ApiError> {
    let config = state.hub.config().await;
    if let Some(expected) = &config.api_key {
        if bearer_token(&headers) != Some(expected.as_str()) {
            tracing::warn!("dev fake request with missing or wrong api key");
            return Err(ApiError::Unauthorized);
        }
    }

    let request: FakeEventRequest = if body.is_empty() {
        FakeEventRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let kind = match request.kind.as_deref() {
        None => EventKind::ChatMessage,
        Some(raw) => raw
            .parse::<EventKind>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };
    let text = request.text.unwrap_or_else(|| FAKE_TEXT.to_string());

    let event = fake_event(kind, text, &config.channel);
    tracing::info!(kind = %kind, id = %event.id(), "publishing synthesized event");
    Ok(Json(state.hub.publish(event).await))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn fake_event(kind: EventKind, text: String, channel: &str) -> AppEvent {
    let id = new_event_id();
    let ts = now_ms();
    let user = ChatUser::new(
        "TestUser",
        Some("testuser".to_string()),
        None,
        [UserRole::Member],
    );
    match kind {
        EventKind::ChatMessage => AppEvent::ChatMessage(ChatMessageEvent {
            id,
            ts,
            platform: Platform::Twitch,
            channel_name: Some(channel.to_string()),
            user,
            parts: vec![MessagePart::text(text.clone())],
            text,
            provider: None,
        }),
        EventKind::Follow => AppEvent::Follow(FollowEvent { id, ts, user }),
        EventKind::Sub => AppEvent::Sub(SubEvent {
            id,
            ts,
            user,
            tier: "1000".to_string(),
            is_gift: false,
            months: 1,
            streak: None,
            message: None,
        }),
        EventKind::Raid => AppEvent::Raid(RaidEvent {
            id,
            ts,
            user,
            viewers: rand::thread_rng().gen_range(1..=100),
        }),
        EventKind::Cheer => AppEvent::Cheer(CheerEvent {
            id,
            ts,
            user,
            bits: 100,
            message: Some(text),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(bearer_token(&headers), Some("s3cret"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn fake_chat_carries_channel_and_text() {
        let AppEvent::ChatMessage(chat) = fake_event(EventKind::ChatMessage, "hi".into(), "chan")
        else {
            panic!("expected chat message");
        };
        assert_eq!(chat.text, "hi");
        assert_eq!(chat.parts, vec![MessagePart::text("hi")]);
        assert_eq!(chat.channel_name.as_deref(), Some("chan"));
        assert_eq!(chat.user.login.as_deref(), Some("testuser"));
    }

    #[test]
    fn fake_raid_has_viewers() {
        let AppEvent::Raid(raid) = fake_event(EventKind::Raid, String::new(), "chan") else {
            panic!("expected raid");
        };
        assert!((1..=100).contains(&raid.viewers));
    }
}
