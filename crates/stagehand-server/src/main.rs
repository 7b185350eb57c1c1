//! Stagehand server binary.
//!
//! Loads the persisted lanes, starts the upstream adapters and serves the
//! overlay hub with graceful shutdown on SIGTERM/SIGINT.

use stagehand_server::catalog::CatalogClient;
use stagehand_server::config;
use stagehand_server::hub::Hub;
use stagehand_server::ingest::start_ingest;
use stagehand_server::themes::{DirectoryThemeCatalog, ThemeCatalog};
use stagehand_server::{app, AppState};
use stagehand_state::State;
use stagehand_store::{load_or_create, FilePersistor, PersistedState, Persistence};
use stagehand_types::Locales;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("STAGEHAND_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let snapshot = load_or_create(&config.storage.data_dir, &PersistedState::default())
        .await
        .expect("failed to prepare the data directory, check storage.data_dir in config");
    tracing::info!(
        path = %snapshot.path.display(),
        origin = ?snapshot.origin,
        "loaded state snapshot"
    );

    let themes = Arc::new(DirectoryThemeCatalog::new(&config.themes.dir));
    let theme_id = snapshot.state.theme.active_theme_id.clone();
    let locales = match themes.load(&theme_id).await {
        Ok(package) => package.locales,
        Err(e) => {
            tracing::warn!(theme = %theme_id, error = %e, "active theme unavailable, using default locales");
            Locales::default()
        }
    };

    let PersistedState {
        config: app_config,
        rules,
        theme,
        ..
    } = snapshot.state;
    let state = State::new(app_config.clone(), rules, theme, locales);

    let persistence = Arc::new(FilePersistor::new(
        snapshot.path.clone(),
        config.storage.debounce(),
    ));
    let hub = Arc::new(Hub::new(state, persistence.clone(), themes));

    let ingest = if config.ingest.enabled {
        let (hook, handle) = start_ingest(Arc::clone(&hub), app_config, CatalogClient::new());
        hub.add_config_hook(hook);
        Some(handle)
    } else {
        tracing::info!("ingest disabled, upstream adapters not started");
        None
    };

    let app = app(AppState {
        hub: Arc::clone(&hub),
    });
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting stagehand server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    if let Some(ingest) = ingest {
        ingest.shutdown().await;
    }
    if let Err(e) = persistence.flush().await {
        tracing::error!(error = %e, "failed to flush state on shutdown");
    }

    tracing::info!("stagehand server shut down");
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, draining connections"); }
        () = terminate => { tracing::info!("received SIGTERM, draining connections"); }
    }
}
