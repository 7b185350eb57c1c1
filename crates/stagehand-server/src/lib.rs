//! Stagehand server library logic.
//!
//! Upstream chat and alert adapters feed the [`hub::Hub`], which evaluates
//! each event with the rules engine, logs it and broadcasts it to overlay
//! and control clients over WebSocket. Control clients mutate the config,
//! rules and theme lanes; every change is persisted before it is
//! acknowledged.

pub mod api;
pub mod api_ws;
pub mod catalog;
mod commit;
pub mod config;
pub mod connections;
pub mod hub;
pub mod ingest;
pub mod processor;
pub mod protocol;
pub mod themes;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use hub::Hub;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/ws", get(api_ws::ws_handler))
        .route("/api/state", get(api::get_state_handler))
        .route("/api/themes", get(api::list_themes_handler))
        .route("/api/themes/{id}", get(api::get_theme_handler))
        .route("/api/dev/fake", post(api::fake_event_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::themes::DirectoryThemeCatalog;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use stagehand_state::State;
    use stagehand_store::FilePersistor;
    use stagehand_types::{AppConfig, Locales, Ruleset, ThemeState};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app(dir: &std::path::Path) -> Router {
        let state = State::new(
            AppConfig::default(),
            Ruleset::builtin(),
            ThemeState::default(),
            Locales::default(),
        );
        let persistence = Arc::new(FilePersistor::new(
            dir.join("state.json"),
            Duration::from_millis(10),
        ));
        let themes = Arc::new(DirectoryThemeCatalog::new(dir.join("themes")));
        app(AppState {
            hub: Arc::new(Hub::new(state, persistence, themes)),
        })
    }

    #[tokio::test]
    async fn health_check() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn unknown_theme_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(
                Request::builder()
                    .uri("/api/themes/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
