//! Error types for the ingestion adapters.

/// Errors surfaced by the adapters. None of them abort the process; the
/// adapter loop reports them and applies its reconnect policy.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The adapter was started with unusable settings.
    #[error("invalid adapter configuration: {0}")]
    Config(String),

    /// The upstream socket failed or closed unexpectedly.
    #[error("upstream socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame did not match the expected protocol.
    #[error("upstream protocol error: {0}")]
    Protocol(String),

    /// A JSON frame could not be decoded.
    #[error("malformed upstream frame: {0}")]
    Parse(#[from] serde_json::Error),

    /// Upstream rejected the credentials. Terminal for the adapter.
    #[error("upstream rejected credentials: {0}")]
    Auth(String),

    /// A Helix or catalog HTTP call failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A Helix call returned a non-success status.
    #[error("{endpoint} returned {status}: {body}")]
    Upstream {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
}

impl IngestError {
    /// Whether retrying with the same settings is pointless.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Config(_))
    }
}
