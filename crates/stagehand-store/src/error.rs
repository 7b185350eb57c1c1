//! Error types for snapshot storage.

/// Errors that can occur while preparing the snapshot file at startup.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Creating the data directory failed.
    #[error("snapshot storage error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A failed (or abandoned) persistence request.
///
/// Cloned to every caller whose snapshot was folded into the failed write,
/// so it only carries a rendered message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to persist state: {message}")]
pub struct PersistError {
    message: String,
}

impl PersistError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<StoreError> for PersistError {
    fn from(err: StoreError) -> Self {
        Self::new(err.to_string())
    }
}
