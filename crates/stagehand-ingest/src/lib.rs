//! Upstream ingestion adapters for the Stagehand event pipeline.
//!
//! Two independent, reconnecting clients turn third-party protocols into
//! normalized [`AppEvent`](stagehand_types::AppEvent)s:
//!
//! | Adapter | Upstream | Module |
//! |---------|----------|--------|
//! | chat relay | Twitch IRC over WebSocket | [`chat_relay`] |
//! | alerts | Twitch EventSub over WebSocket | [`alerts`] |
//!
//! Protocol handling is pure and tested without sockets; [`runner`] owns the
//! socket loops. Both adapters deliver [`IngestEvent`]s to an `mpsc` sink
//! supplied by the caller and are stopped through their [`AdapterHandle`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::mpsc::channel(256);
//! let relay = spawn_chat_relay(ChatRelayOptions::new("somechannel", None), tx)?;
//! while let Some(ev) = rx.recv().await {
//!     // hand ev to the event processor
//! }
//! relay.shutdown(Duration::from_secs(2)).await;
//! ```

pub mod alerts;
pub mod chat_relay;
mod error;
pub mod helix;
pub mod reconnect;
pub mod runner;

pub use chat_relay::RelayCredentials;
pub use error::IngestError;
pub use helix::{HelixClient, TokenIdentity};
pub use runner::{spawn_alerts, spawn_chat_relay, AdapterHandle, AlertOptions, ChatRelayOptions};

use stagehand_types::AppEvent;

/// Output of an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Event(AppEvent),
    /// A moderator deleted a single chat message.
    MessageDeleted { id: String },
    /// A chatter was timed out (`duration_seconds` set) or banned.
    UserTimedOut {
        login: String,
        duration_seconds: Option<u64>,
    },
    Status {
        adapter: &'static str,
        message: String,
    },
    Error {
        adapter: &'static str,
        message: String,
    },
}
