//! Reconnect decisions shared by both adapters.

use std::time::Duration;

/// Fixed delay before reconnecting after an unexpected disconnect.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The owner closed the adapter.
    Shutdown,
    /// Upstream rejected the credentials.
    AuthFailed,
    /// Upstream asked us to move to `url`.
    ReconnectTo(String),
    /// No frame arrived within the keepalive window.
    KeepaliveTimeout,
    /// The socket failed, closed, or could not be opened.
    Dropped,
}

/// What the adapter loop does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Stop,
    ConnectNow(String),
    ConnectAfter(Duration, String),
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    default_url: String,
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(default_url: impl Into<String>, delay: Duration) -> Self {
        Self {
            default_url: default_url.into(),
            delay,
        }
    }

    pub fn default_url(&self) -> &str {
        &self.default_url
    }

    /// Decides the next step. `closed` is the owner's shutdown flag and
    /// wins over everything else.
    pub fn next(&self, closed: bool, why: &Disconnect) -> NextStep {
        if closed {
            return NextStep::Stop;
        }
        match why {
            Disconnect::Shutdown | Disconnect::AuthFailed => NextStep::Stop,
            Disconnect::ReconnectTo(url) => NextStep::ConnectNow(url.clone()),
            Disconnect::KeepaliveTimeout | Disconnect::Dropped => {
                NextStep::ConnectAfter(self.delay, self.default_url.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new("wss://default.test", RECONNECT_DELAY)
    }

    #[test]
    fn shutdown_flag_always_stops() {
        for why in [
            Disconnect::Dropped,
            Disconnect::KeepaliveTimeout,
            Disconnect::ReconnectTo("wss://x.test".into()),
        ] {
            assert_eq!(policy().next(true, &why), NextStep::Stop);
        }
    }

    #[test]
    fn auth_failure_never_retries() {
        assert_eq!(policy().next(false, &Disconnect::AuthFailed), NextStep::Stop);
    }

    #[test]
    fn reconnect_request_goes_straight_to_given_url() {
        assert_eq!(
            policy().next(false, &Disconnect::ReconnectTo("wss://migrated.test".into())),
            NextStep::ConnectNow("wss://migrated.test".into())
        );
    }

    #[test]
    fn drops_and_timeouts_wait_then_use_default_url() {
        for why in [Disconnect::Dropped, Disconnect::KeepaliveTimeout] {
            assert_eq!(
                policy().next(false, &why),
                NextStep::ConnectAfter(RECONNECT_DELAY, "wss://default.test".into())
            );
        }
    }
}
