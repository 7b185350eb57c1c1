//! Supervision of the upstream adapters.
//!
//! The supervisor owns the chat relay and alert adapters, pumps their output
//! into the [`Hub`] and restarts them when an acknowledged config change
//! touches the ingest identity (channel, credentials or 7TV user). Each
//! restart also reloads the badge and emote catalogs.

use crate::catalog::CatalogClient;
use crate::hub::{ConfigHook, Hub};
use stagehand_ingest::{
    spawn_alerts, spawn_chat_relay, AdapterHandle, AlertOptions, ChatRelayOptions, IngestEvent,
    RelayCredentials,
};
use stagehand_types::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

const INGEST_QUEUE: usize = 256;
const ADAPTER_GRACE: Duration = Duration::from_secs(3);

/// Which adapters a config calls for.
#[derive(Debug, Clone)]
struct AdapterPlan {
    relay: Option<ChatRelayOptions>,
    alerts: Option<AlertOptions>,
}

impl AdapterPlan {
    fn for_config(config: &AppConfig) -> Self {
        let channel = config.channel.trim().trim_start_matches('#').to_lowercase();
        let credentials = match (&config.twitch_username, &config.twitch_token) {
            (Some(username), Some(token)) if !username.is_empty() && !token.is_empty() => {
                Some(RelayCredentials {
                    username: username.clone(),
                    token: token.clone(),
                })
            }
            _ => None,
        };
        let relay = (!channel.is_empty()).then(|| ChatRelayOptions::new(channel, credentials));
        let alerts = config
            .twitch_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(AlertOptions::new);
        Self { relay, alerts }
    }
}

/// [`ConfigHook`] forwarding acknowledged configs to the supervisor task.
pub struct IngestSupervisor {
    config_tx: watch::Sender<AppConfig>,
}

impl ConfigHook for IngestSupervisor {
    fn config_committed(&self, config: &AppConfig) {
        self.config_tx.send_replace(config.clone());
    }
}

/// Handle to the running supervisor task.
pub struct IngestHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl IngestHandle {
    /// Stops the adapters and waits for the supervisor to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!("ingest supervisor join error: {}", e);
        }
    }
}

/// Starts adapters for `initial` and returns the hook to register on the hub.
pub fn start_ingest(
    hub: Arc<Hub>,
    initial: AppConfig,
    catalogs: CatalogClient,
) -> (Arc<IngestSupervisor>, IngestHandle) {
    let (config_tx, config_rx) = watch::channel(initial);
    let shutdown = Arc::new(Notify::new());
    let task = tokio::spawn(supervise(hub, config_rx, Arc::clone(&shutdown), catalogs));
    (
        Arc::new(IngestSupervisor { config_tx }),
        IngestHandle { shutdown, task },
    )
}

async fn supervise(
    hub: Arc<Hub>,
    mut config_rx: watch::Receiver<AppConfig>,
    shutdown: Arc<Notify>,
    catalogs: CatalogClient,
) {
    let (tx, mut rx) = mpsc::channel::<IngestEvent>(INGEST_QUEUE);
    let pump = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move {
            while let Some(item) = rx.recv().await {
                hub.ingest(item).await;
            }
        }
    });

    let mut current = config_rx.borrow_and_update().clone();
    let mut adapters = start_adapters(&current, &tx);
    spawn_catalog_reload(Arc::clone(&hub), catalogs.clone());

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = config_rx.borrow_and_update().clone();
                if current.ingest_identity_changed(&next) {
                    tracing::info!(channel = %next.channel, "ingest identity changed, restarting adapters");
                    stop_adapters(adapters).await;
                    adapters = start_adapters(&next, &tx);
                    spawn_catalog_reload(Arc::clone(&hub), catalogs.clone());
                }
                current = next;
            }
        }
    }

    stop_adapters(adapters).await;
    drop(tx);
    if tokio::time::timeout(ADAPTER_GRACE, pump).await.is_err() {
        tracing::warn!("ingest pump did not drain in time");
    }
    tracing::info!("ingest supervisor stopped");
}

fn start_adapters(config: &AppConfig, sink: &mpsc::Sender<IngestEvent>) -> Vec<AdapterHandle> {
    let plan = AdapterPlan::for_config(config);
    let mut adapters = Vec::new();
    if let Some(options) = plan.relay {
        let channel = options.channel.clone();
        let authenticated = options.credentials.is_some();
        match spawn_chat_relay(options, sink.clone()) {
            Ok(handle) => {
                tracing::info!(channel = %channel, authenticated, "chat relay started");
                adapters.push(handle);
            }
            Err(e) => tracing::warn!(channel = %channel, error = %e, "chat relay not started"),
        }
    }
    if let Some(options) = plan.alerts {
        tracing::info!("alert adapter started");
        adapters.push(spawn_alerts(options, sink.clone()));
    }
    adapters
}

async fn stop_adapters(adapters: Vec<AdapterHandle>) {
    for adapter in adapters {
        let name = adapter.name();
        adapter.shutdown(ADAPTER_GRACE).await;
        tracing::debug!(adapter = name, "adapter stopped");
    }
}

fn spawn_catalog_reload(hub: Arc<Hub>, catalogs: CatalogClient) {
    tokio::spawn(async move {
        let (ticket, config) = hub.begin_resource_reload().await;
        let resources = catalogs.load(&config).await;
        if !hub.finish_resource_reload(ticket, resources).await {
            tracing::debug!("catalog reload superseded");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_relay_without_credentials() {
        let config = AppConfig {
            channel: " #SomeChannel ".into(),
            ..AppConfig::default()
        };
        let plan = AdapterPlan::for_config(&config);
        let relay = plan.relay.unwrap();
        assert_eq!(relay.channel, "somechannel");
        assert!(relay.credentials.is_none());
        assert!(plan.alerts.is_none());
    }

    #[test]
    fn token_enables_login_and_alerts() {
        let config = AppConfig {
            channel: "chan".into(),
            twitch_username: Some("bot".into()),
            twitch_token: Some("oauth:abc".into()),
            ..AppConfig::default()
        };
        let plan = AdapterPlan::for_config(&config);
        assert_eq!(
            plan.relay.unwrap().credentials,
            Some(RelayCredentials {
                username: "bot".into(),
                token: "oauth:abc".into(),
            })
        );
        assert_eq!(plan.alerts.unwrap().token, "oauth:abc");
    }

    #[test]
    fn token_without_username_stays_anonymous() {
        let config = AppConfig {
            channel: "chan".into(),
            twitch_token: Some("abc".into()),
            ..AppConfig::default()
        };
        let plan = AdapterPlan::for_config(&config);
        assert!(plan.relay.unwrap().credentials.is_none());
        assert!(plan.alerts.is_some());
    }

    #[test]
    fn blank_channel_skips_relay() {
        let config = AppConfig {
            channel: "  ".into(),
            ..AppConfig::default()
        };
        assert!(AdapterPlan::for_config(&config).relay.is_none());
    }

    #[test]
    fn hook_forwards_latest_config() {
        let (config_tx, mut rx) = watch::channel(AppConfig::default());
        let hook = IngestSupervisor { config_tx };
        let next = AppConfig {
            channel: "other".into(),
            ..AppConfig::default()
        };
        hook.config_committed(&next);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().channel, "other");
    }
}
