//! The connection hub.
//!
//! One [`Hub`] is built at startup and shared by every handler. It owns the
//! pipeline [`State`] behind a single async mutex, the registry of admitted
//! connections and the persistence and theme collaborators.
//!
//! Every broadcast is issued while the state lock is held, so all
//! connections observe events and lane changes in the same order. The lock
//! is never held while waiting on persistence.

use crate::connections::{ConnectionManager, Outbound};
use crate::processor::{self, DELETED_KEY};
use crate::protocol::{
    validation_details, ClientMessage, ClientRole, EventPatch, NoticeLevel, ServerMessage,
    Versioned,
};
use crate::themes::ThemeCatalog;
use serde::Serialize;
use serde_json::Value;
use stagehand_ingest::IngestEvent;
use stagehand_state::{Lane, LoggedEvent, ReloadTicket, Resources, State};
use stagehand_store::{PersistError, Persistence};
use stagehand_types::{
    AppConfig, AppEvent, RedactedConfig, Ruleset, ThemeState, ValidationError, PROTOCOL_VERSION,
};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Close code for malformed frames, unknown ops and duplicate `hello`.
pub const CLOSE_PROTOCOL_ERROR: u16 = 4000;
/// Close code for an unsupported protocol version.
pub const CLOSE_UNSUPPORTED_VERSION: u16 = 4001;
/// Close code for a control `hello` with the wrong secret.
pub const CLOSE_BAD_SECRET: u16 = 4003;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported protocol version {0}, expected {PROTOCOL_VERSION}")]
    UnsupportedVersion(u32),

    #[error("invalid secret")]
    BadSecret,

    #[error("{0} requires the control role")]
    Unauthorized(&'static str),

    #[error("hello required before {0}")]
    NotRegistered(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistError),
}

impl HubError {
    /// Close code for errors that end the connection.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Protocol(_) => Some(CLOSE_PROTOCOL_ERROR),
            Self::UnsupportedVersion(_) => Some(CLOSE_UNSUPPORTED_VERSION),
            Self::BadSecret => Some(CLOSE_BAD_SECRET),
            Self::Unauthorized(_)
            | Self::NotRegistered(_)
            | Self::Validation(_)
            | Self::Persistence(_) => None,
        }
    }

    /// The `error` frame reporting this failure.
    pub fn frame(&self) -> ServerMessage {
        let details = match self {
            Self::Validation(e) => validation_details(e),
            _ => None,
        };
        ServerMessage::error(self.to_string(), details)
    }
}

/// Side effect run after a config change is acknowledged.
pub trait ConfigHook: Send + Sync + 'static {
    fn config_committed(&self, config: &AppConfig);
}

/// Per-connection data owned by the socket task.
#[derive(Debug)]
pub struct ConnectionContext {
    id: Uuid,
    role: Option<ClientRole>,
    outbound: mpsc::Sender<Outbound>,
}

impl ConnectionContext {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: None,
            outbound,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Role declared in `hello`; `None` until registered.
    pub fn role(&self) -> Option<ClientRole> {
        self.role
    }

    /// Queues `frame` on this connection only.
    pub fn send(&self, frame: &ServerMessage) {
        if let Some(json) = frame.encode() {
            if let Err(e) = self.outbound.try_send(Outbound::Text(json)) {
                tracing::warn!(connection = %self.id, "dropping direct message: {}", e);
            }
        }
    }
}

/// Pipeline state plus the bookkeeping the commit path needs alongside it.
pub(crate) struct Shared {
    pub(crate) state: State,
    /// Config as of the last acknowledged commit. `config:changed` patches
    /// are diffs against it.
    pub(crate) acknowledged_config: AppConfig,
}

/// Read-only view served by `GET /api/state`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub config: Versioned<RedactedConfig>,
    pub rules: Versioned<Ruleset>,
    pub theme: Versioned<ThemeState>,
    pub event_sequence: u64,
    pub logged_events: usize,
    pub connections: usize,
}

pub struct Hub {
    pub(crate) shared: Mutex<Shared>,
    pub(crate) connections: ConnectionManager,
    pub(crate) persistence: Arc<dyn Persistence>,
    pub(crate) themes: Arc<dyn ThemeCatalog>,
    hooks: RwLock<Vec<Arc<dyn ConfigHook>>>,
}

impl Hub {
    pub fn new(
        state: State,
        persistence: Arc<dyn Persistence>,
        themes: Arc<dyn ThemeCatalog>,
    ) -> Self {
        let acknowledged_config = state.config().clone();
        Self {
            shared: Mutex::new(Shared {
                state,
                acknowledged_config,
            }),
            connections: ConnectionManager::new(),
            persistence,
            themes,
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn themes(&self) -> &Arc<dyn ThemeCatalog> {
        &self.themes
    }

    pub fn add_config_hook(&self, hook: Arc<dyn ConfigHook>) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    pub(crate) fn run_config_hooks(&self, config: &AppConfig) {
        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            hook.config_committed(config);
        }
    }

    /// Handles one text frame received on `ctx`.
    ///
    /// Mutations are applied before this returns; their persistence outcome
    /// is settled on a separate task so later frames are not held up.
    ///
    /// # Errors
    ///
    /// Any error is reported to the client with [`HubError::frame`]; the
    /// connection must be closed when [`HubError::close_code`] is `Some`.
    pub async fn handle_frame(
        self: &Arc<Self>,
        ctx: &mut ConnectionContext,
        frame: &str,
    ) -> Result<(), HubError> {
        let message: ClientMessage =
            serde_json::from_str(frame).map_err(|e| HubError::Protocol(e.to_string()))?;
        let op = message.op();

        let staged = match message {
            ClientMessage::Hello {
                role,
                protocol_version,
                secret,
            } => return self.register(ctx, role, protocol_version, secret).await,
            ClientMessage::ConfigPatch { patch } => {
                authorize(ctx, op)?;
                self.stage_config(ctx.id, patch).await?
            }
            ClientMessage::RulesSet { rules } => {
                authorize(ctx, op)?;
                self.stage_rules(ctx.id, rules).await?
            }
            ClientMessage::ThemePatch { patch } => {
                authorize(ctx, op)?;
                self.stage_theme(ctx.id, patch).await?
            }
        };

        let hub = Arc::clone(self);
        tokio::spawn(async move { hub.settle(staged).await });
        Ok(())
    }

    async fn register(
        &self,
        ctx: &mut ConnectionContext,
        role: ClientRole,
        protocol_version: u32,
        secret: Option<String>,
    ) -> Result<(), HubError> {
        if ctx.role.is_some() {
            return Err(HubError::Protocol("duplicate hello".into()));
        }
        if protocol_version != PROTOCOL_VERSION {
            return Err(HubError::UnsupportedVersion(protocol_version));
        }

        let shared = self.shared.lock().await;
        if role == ClientRole::Control {
            if let Some(expected) = &shared.state.config().api_key {
                if secret.as_deref() != Some(expected.as_str()) {
                    tracing::warn!(connection = %ctx.id, "control hello with bad secret");
                    return Err(HubError::BadSecret);
                }
            }
        }

        ctx.send(&state_frame(&shared.state));
        if role == ClientRole::Overlay {
            ctx.send(&ServerMessage::Replay {
                events: shared.state.event_log().snapshot(),
            });
        }
        self.connections
            .add(ctx.id, role, ctx.outbound.clone())
            .await;
        ctx.role = Some(role);
        drop(shared);

        tracing::info!(connection = %ctx.id, role = role.as_str(), "client registered");
        Ok(())
    }

    /// Removes `ctx` from broadcast distribution.
    pub async fn disconnect(&self, ctx: &ConnectionContext) {
        if ctx.role.is_some() {
            self.connections.remove(ctx.id).await;
            tracing::info!(connection = %ctx.id, "client disconnected");
        }
    }

    /// Routes one adapter output into the pipeline.
    pub async fn ingest(&self, item: IngestEvent) {
        match item {
            IngestEvent::Event(event) => {
                self.publish(event).await;
            }
            IngestEvent::MessageDeleted { id } => {
                self.delete_message(&id).await;
            }
            IngestEvent::UserTimedOut {
                login,
                duration_seconds,
            } => {
                let count = self.clear_user(&login).await;
                tracing::info!(login = %login, ?duration_seconds, cleared = count, "user timed out");
            }
            IngestEvent::Status { adapter, message } => {
                self.notify_control(NoticeLevel::Info, format!("{adapter}: {message}"))
                    .await;
            }
            IngestEvent::Error { adapter, message } => {
                self.notify_control(NoticeLevel::Warn, format!("{adapter}: {message}"))
                    .await;
            }
        }
    }

    /// Evaluates `event`, appends it to the log and broadcasts it.
    pub async fn publish(&self, event: AppEvent) -> LoggedEvent {
        let mut shared = self.shared.lock().await;
        let evaluated = processor::evaluate(&mut shared.state, event, now_ms());
        let entry = shared.state.append_event(evaluated);
        self.broadcast(&ServerMessage::Event(entry.clone())).await;
        tracing::debug!(seq = entry.seq, kind = %entry.payload.event.kind(), "event published");
        entry
    }

    /// Marks the logged message `id` as deleted. Returns whether an update
    /// was broadcast.
    pub async fn delete_message(&self, id: &str) -> bool {
        let mut shared = self.shared.lock().await;
        let body = shared.state.locales().get(DELETED_KEY).to_string();
        let update = shared
            .state
            .event_log_mut()
            .find_mut(id)
            .and_then(|entry| {
                processor::mark_deleted(&mut entry.payload, &body).then(|| update_frame(entry))
            });
        match update {
            Some(frame) => {
                self.broadcast(&frame).await;
                true
            }
            None => false,
        }
    }

    /// Marks every logged message from `login` as deleted. Returns how many
    /// entries changed.
    pub async fn clear_user(&self, login: &str) -> usize {
        let mut shared = self.shared.lock().await;
        let body = shared.state.locales().get(DELETED_KEY).to_string();
        let updates: Vec<ServerMessage> = shared
            .state
            .event_log_mut()
            .chat_from_login_mut(login)
            .filter_map(|entry| {
                processor::mark_deleted(&mut entry.payload, &body).then(|| update_frame(entry))
            })
            .collect();
        for frame in &updates {
            self.broadcast(frame).await;
        }
        updates.len()
    }

    pub(crate) async fn broadcast(&self, frame: &ServerMessage) {
        if let Some(json) = frame.encode() {
            self.connections.broadcast(&json).await;
        }
    }

    async fn notify_control(&self, level: NoticeLevel, message: String) {
        let _shared = self.shared.lock().await;
        let frame = ServerMessage::ControlNotice {
            rev: None,
            level,
            message,
            details: None,
        };
        if let Some(json) = frame.encode() {
            self.connections.notify_control(&json, None).await;
        }
    }

    pub async fn config(&self) -> AppConfig {
        self.shared.lock().await.state.config().clone()
    }

    pub async fn view(&self) -> StateView {
        let shared = self.shared.lock().await;
        let state = &shared.state;
        StateView {
            config: Versioned {
                rev: state.revision(Lane::Config),
                data: state.config().redacted(),
            },
            rules: Versioned {
                rev: state.revision(Lane::Rules),
                data: state.ruleset().clone(),
            },
            theme: Versioned {
                rev: state.revision(Lane::Theme),
                data: state.theme().clone(),
            },
            event_sequence: state.event_sequence(),
            logged_events: state.event_log().len(),
            connections: self.connections.len().await,
        }
    }

    /// Starts a catalog reload for the current config, superseding any
    /// reload still running.
    pub async fn begin_resource_reload(&self) -> (ReloadTicket, AppConfig) {
        let mut shared = self.shared.lock().await;
        let ticket = shared.state.begin_resource_reload();
        (ticket, shared.state.config().clone())
    }

    pub async fn finish_resource_reload(&self, ticket: ReloadTicket, resources: Resources) -> bool {
        self.shared
            .lock()
            .await
            .state
            .finish_resource_reload(ticket, resources)
    }
}

fn authorize(ctx: &ConnectionContext, op: &'static str) -> Result<(), HubError> {
    match ctx.role {
        None => Err(HubError::NotRegistered(op)),
        Some(ClientRole::Overlay) => Err(HubError::Unauthorized(op)),
        Some(ClientRole::Control) => Ok(()),
    }
}

fn state_frame(state: &State) -> ServerMessage {
    ServerMessage::State {
        config: Versioned {
            rev: state.revision(Lane::Config),
            data: state.config().redacted(),
        },
        rules: Versioned {
            rev: state.revision(Lane::Rules),
            data: state.ruleset().clone(),
        },
        theme: Versioned {
            rev: state.revision(Lane::Theme),
            data: state.theme().clone(),
        },
    }
}

fn update_frame(entry: &LoggedEvent) -> ServerMessage {
    ServerMessage::EventUpdate {
        id: entry.payload.event.id().to_string(),
        patch: EventPatch {
            deleted: entry.payload.deleted,
            presentation: entry.payload.presentation.clone(),
        },
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Details attached to a rollback notice.
pub(crate) fn rollback_details(lane: Lane) -> Option<Value> {
    Some(serde_json::json!({ "lane": lane }))
}
