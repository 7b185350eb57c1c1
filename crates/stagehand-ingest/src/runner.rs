//! Socket loops for the two adapters.
//!
//! Each adapter runs as a single task: connect, pump frames through its
//! session, and consult the [`ReconnectPolicy`] when the connection ends.
//! Shutdown sets the `closed` flag first, then wakes the task.

use crate::alerts::{AlertSession, AlertStep, ALERTS_URL};
use crate::chat_relay::{ChatRelaySession, RelayAction, RelayCredentials, CHAT_RELAY_URL};
use crate::error::IngestError;
use crate::helix::{HelixClient, TokenIdentity};
use crate::reconnect::{Disconnect, NextStep, ReconnectPolicy, RECONNECT_DELAY};
use crate::IngestEvent;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

/// Handle to a running adapter task.
#[derive(Debug)]
pub struct AdapterHandle {
    name: &'static str,
    closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl AdapterHandle {
    fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let closed = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run(Arc::clone(&closed), Arc::clone(&wake)));
        Self {
            name,
            closed,
            wake,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Requests shutdown. Reconnection is disabled permanently.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes the adapter and waits up to `grace` for its task to end.
    pub async fn shutdown(self, grace: Duration) {
        self.close();
        let name = self.name;
        if tokio::time::timeout(grace, self.task).await.is_err() {
            tracing::warn!(adapter = name, "adapter did not stop in time");
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Delivers `event`; `false` means the consumer is gone.
async fn emit(sink: &mpsc::Sender<IngestEvent>, event: IngestEvent) -> bool {
    sink.send(event).await.is_ok()
}

async fn report(sink: &mpsc::Sender<IngestEvent>, adapter: &'static str, err: &IngestError) {
    tracing::warn!(adapter, error = %err, "ingest error");
    let _ = emit(
        sink,
        IngestEvent::Error {
            adapter,
            message: err.to_string(),
        },
    )
    .await;
}

async fn status(sink: &mpsc::Sender<IngestEvent>, adapter: &'static str, message: String) {
    tracing::info!(adapter, "{message}");
    let _ = emit(sink, IngestEvent::Status { adapter, message }).await;
}

/// Runs connections until the policy says stop.
async fn supervise<F, Fut>(
    adapter: &'static str,
    policy: ReconnectPolicy,
    closed: &AtomicBool,
    wake: &Notify,
    sink: &mpsc::Sender<IngestEvent>,
    mut connect: F,
) where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Disconnect>,
{
    let mut target = policy.default_url().to_string();
    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        let why = connect(target.clone()).await;
        match policy.next(closed.load(Ordering::SeqCst), &why) {
            NextStep::Stop => break,
            NextStep::ConnectNow(url) => {
                status(sink, adapter, format!("reconnecting to {url}")).await;
                target = url;
            }
            NextStep::ConnectAfter(delay, url) => {
                status(
                    sink,
                    adapter,
                    format!("disconnected, reconnecting in {}s", delay.as_secs()),
                )
                .await;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wake.notified() => {}
                }
                target = url;
            }
        }
    }
    status(sink, adapter, "stopped".to_string()).await;
}

// ── chat relay ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatRelayOptions {
    pub channel: String,
    pub credentials: Option<RelayCredentials>,
    pub url: String,
    pub reconnect_delay: Duration,
}

impl ChatRelayOptions {
    pub fn new(channel: impl Into<String>, credentials: Option<RelayCredentials>) -> Self {
        Self {
            channel: channel.into(),
            credentials,
            url: CHAT_RELAY_URL.to_string(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

const CHAT_RELAY: &str = "chat-relay";

/// Starts the chat-relay adapter.
///
/// # Errors
///
/// Returns `IngestError::Config` if the channel is blank.
pub fn spawn_chat_relay(
    options: ChatRelayOptions,
    sink: mpsc::Sender<IngestEvent>,
) -> Result<AdapterHandle, IngestError> {
    let session = ChatRelaySession::new(&options.channel)?;
    Ok(AdapterHandle::spawn(CHAT_RELAY, move |closed, wake| async move {
        let policy = ReconnectPolicy::new(options.url.clone(), options.reconnect_delay);
        supervise(CHAT_RELAY, policy, &closed, &wake, &sink, |url| {
            relay_connection(&session, options.credentials.as_ref(), url, &wake, &sink)
        })
        .await;
    }))
}

async fn relay_connection(
    session: &ChatRelaySession,
    credentials: Option<&RelayCredentials>,
    url: String,
    wake: &Notify,
    sink: &mpsc::Sender<IngestEvent>,
) -> Disconnect {
    let (socket, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            report(sink, CHAT_RELAY, &e.into()).await;
            return Disconnect::Dropped;
        }
    };
    let (mut write, mut read) = socket.split();

    let suffix = rand::thread_rng().gen_range(1_000..100_000);
    for line in session.handshake(credentials, suffix) {
        if let Err(e) = write.send(Message::Text(line.into())).await {
            report(sink, CHAT_RELAY, &e.into()).await;
            return Disconnect::Dropped;
        }
    }
    status(sink, CHAT_RELAY, format!("connected, joined #{}", session.channel())).await;

    loop {
        let frame = tokio::select! {
            _ = wake.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return Disconnect::Shutdown;
            }
            frame = read.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return Disconnect::Dropped,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                report(sink, CHAT_RELAY, &e.into()).await;
                return Disconnect::Dropped;
            }
        };

        for line in text.as_str().split("\r\n").filter(|l| !l.is_empty()) {
            let event = match session.handle_line(line, now_ms()) {
                RelayAction::Ignore => continue,
                RelayAction::Send(reply) => {
                    if let Err(e) = write.send(Message::Text(reply.into())).await {
                        report(sink, CHAT_RELAY, &e.into()).await;
                        return Disconnect::Dropped;
                    }
                    continue;
                }
                RelayAction::Chat(event) => IngestEvent::Event(event),
                RelayAction::MessageDeleted { id } => IngestEvent::MessageDeleted { id },
                RelayAction::UserTimedOut {
                    login,
                    duration_seconds,
                } => IngestEvent::UserTimedOut {
                    login,
                    duration_seconds,
                },
                RelayAction::AuthFailed(notice) => {
                    report(sink, CHAT_RELAY, &IngestError::Auth(notice)).await;
                    return Disconnect::AuthFailed;
                }
                RelayAction::Reconnect => {
                    status(sink, CHAT_RELAY, "upstream requested reconnect".into()).await;
                    return Disconnect::ReconnectTo(CHAT_RELAY_URL.to_string());
                }
            };
            if !emit(sink, event).await {
                return Disconnect::Shutdown;
            }
        }
    }
}

// ── alerts ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AlertOptions {
    pub token: String,
    pub url: String,
    pub reconnect_delay: Duration,
    pub helix: HelixClient,
}

impl AlertOptions {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: ALERTS_URL.to_string(),
            reconnect_delay: RECONNECT_DELAY,
            helix: HelixClient::new(),
        }
    }
}

const ALERTS: &str = "alerts";

/// Starts the alerting adapter. The token is validated first; a rejected
/// token ends the adapter without reconnecting.
pub fn spawn_alerts(options: AlertOptions, sink: mpsc::Sender<IngestEvent>) -> AdapterHandle {
    AdapterHandle::spawn(ALERTS, move |closed, wake| async move {
        let Some(identity) = resolve_identity(&options, &closed, &wake, &sink).await else {
            status(&sink, ALERTS, "stopped".to_string()).await;
            return;
        };
        status(&sink, ALERTS, format!("authenticated as {}", identity.login)).await;

        let policy = ReconnectPolicy::new(options.url.clone(), options.reconnect_delay);
        supervise(ALERTS, policy, &closed, &wake, &sink, |url| {
            alert_connection(&options, &identity, url, &wake, &sink)
        })
        .await;
    })
}

/// Validates the token, retrying transient failures until shutdown.
async fn resolve_identity(
    options: &AlertOptions,
    closed: &AtomicBool,
    wake: &Notify,
    sink: &mpsc::Sender<IngestEvent>,
) -> Option<TokenIdentity> {
    loop {
        if closed.load(Ordering::SeqCst) {
            return None;
        }
        match options.helix.validate_token(&options.token).await {
            Ok(identity) => return Some(identity),
            Err(e) if e.is_terminal() => {
                report(sink, ALERTS, &e).await;
                return None;
            }
            Err(e) => {
                report(sink, ALERTS, &e).await;
                tokio::select! {
                    _ = tokio::time::sleep(options.reconnect_delay) => {}
                    _ = wake.notified() => {}
                }
            }
        }
    }
}

async fn alert_connection(
    options: &AlertOptions,
    identity: &TokenIdentity,
    url: String,
    wake: &Notify,
    sink: &mpsc::Sender<IngestEvent>,
) -> Disconnect {
    // Every socket is a fresh session, including after a reconnect request.
    let mut session = AlertSession::new();
    let (socket, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            report(sink, ALERTS, &e.into()).await;
            return Disconnect::Dropped;
        }
    };
    let (mut write, mut read) = socket.split();
    session.on_connected();
    status(sink, ALERTS, "connected".into()).await;

    let mut deadline = Instant::now() + session.watchdog();
    loop {
        let frame = tokio::select! {
            _ = wake.notified() => {
                session.on_closed();
                let _ = write.send(Message::Close(None)).await;
                return Disconnect::Shutdown;
            }
            _ = tokio::time::sleep_until(deadline) => {
                session.on_watchdog_expired();
                status(sink, ALERTS, "keepalive timeout".into()).await;
                let _ = write.send(Message::Close(None)).await;
                return Disconnect::KeepaliveTimeout;
            }
            frame = read.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                session.on_closed();
                return Disconnect::Dropped;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                session.on_closed();
                report(sink, ALERTS, &e.into()).await;
                return Disconnect::Dropped;
            }
        };

        let step = match session.on_frame(text.as_str(), now_ms()) {
            Ok(step) => step,
            Err(e) => {
                report(sink, ALERTS, &e).await;
                continue;
            }
        };
        deadline = Instant::now() + session.watchdog();

        match step {
            AlertStep::Welcome { session_id } => {
                let created = options
                    .helix
                    .subscribe_alerts(&options.token, identity, &session_id)
                    .await;
                session.on_subscribed();
                deadline = Instant::now() + session.watchdog();
                status(sink, ALERTS, format!("live with {created} subscriptions")).await;
            }
            AlertStep::Notification(Some(event)) => {
                if !emit(sink, IngestEvent::Event(event)).await {
                    return Disconnect::Shutdown;
                }
            }
            AlertStep::Reconnect { url } => {
                let _ = write.send(Message::Close(None)).await;
                return Disconnect::ReconnectTo(url);
            }
            AlertStep::Revoked { subscription_type } => {
                tracing::warn!(kind = %subscription_type, "alert subscription revoked");
            }
            AlertStep::Notification(None) | AlertStep::Keepalive | AlertStep::Ignored => {}
        }
    }
}
